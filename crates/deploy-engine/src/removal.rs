//! Removal Planner (C2): collects to-remove elements, checks dependents,
//! and groups them for parallel removal (spec.md §4.2).

use std::collections::{HashMap, HashSet};

use deploy_core::changeset::ChangeSet;
use deploy_core::error::{Error, Result};
use deploy_core::instance::InstanceState;

/// A single element scheduled for removal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemovalElement {
    Resource(String),
    Child(String),
    Link(String, String),
}

/// Names of every resource/child about to be removed or recreated — used to
/// exempt a dependent from blocking removal when it is itself scheduled for
/// redeployment (and so will no longer depend on the removed element once
/// this run completes).
fn names_exempt_from_dependent_check(changes: &ChangeSet) -> HashSet<String> {
    let mut exempt: HashSet<String> = HashSet::new();
    exempt.extend(changes.removed_resources.iter().cloned());
    exempt.extend(changes.removed_children.iter().cloned());
    exempt.extend(changes.recreate_children.iter().cloned());
    exempt
}

/// Collect the set of elements to remove this run (spec.md §4.2 step 1).
fn collect_to_remove(changes: &ChangeSet) -> Vec<RemovalElement> {
    let mut elements = Vec::new();
    elements.extend(changes.removed_resources.iter().cloned().map(RemovalElement::Resource));
    elements.extend(changes.removed_children.iter().cloned().map(RemovalElement::Child));
    elements.extend(changes.recreate_children.iter().cloned().map(RemovalElement::Child));
    elements.extend(
        changes
            .removed_links
            .iter()
            .cloned()
            .map(|(a, b)| RemovalElement::Link(a, b)),
    );
    elements
}

/// `nodes_to_be_deployed`: logical names about to be (re)deployed this run,
/// additionally exempting a dependent from blocking removal of its
/// dependency (spec.md §4.2's planner contract takes this as an input
/// alongside the current state and the change set).
pub fn plan_removals(
    instance: &InstanceState,
    changes: &ChangeSet,
    nodes_to_be_deployed: &HashSet<String>,
) -> Result<Vec<Vec<RemovalElement>>> {
    let to_remove = collect_to_remove(changes);
    if to_remove.is_empty() {
        return Ok(Vec::new());
    }

    let mut exempt = names_exempt_from_dependent_check(changes);
    exempt.extend(nodes_to_be_deployed.iter().cloned());

    for element in &to_remove {
        let (kind, name) = match element {
            RemovalElement::Resource(name) => ("resource", name),
            RemovalElement::Child(name) => ("child", name),
            RemovalElement::Link(_, _) => continue,
        };
        let dependents: Vec<String> = instance
            .dependents_of(name)
            .into_iter()
            .filter(|d| !exempt.contains(d))
            .collect();
        if !dependents.is_empty() {
            return Err(match kind {
                "resource" => Error::ResourceToBeRemovedHasDependents {
                    resource: name.clone(),
                    dependents,
                },
                _ => Error::ChildToBeRemovedHasDependents {
                    child: name.clone(),
                    dependents,
                },
            });
        }
    }

    let ordered = topological_order_dependents_first(&to_remove, instance);
    Ok(group_greedily(ordered, instance))
}

/// Orders `to_remove` so that dependents come before dependencies — an
/// element is removed only after everything that points to it is gone
/// (spec.md §4.2 step 3).
fn topological_order_dependents_first(
    to_remove: &[RemovalElement],
    instance: &InstanceState,
) -> Vec<RemovalElement> {
    let present: HashSet<&RemovalElement> = to_remove.iter().collect();
    let mut visited: HashSet<RemovalElement> = HashSet::new();
    let mut ordered = Vec::with_capacity(to_remove.len());

    fn visit(
        element: &RemovalElement,
        instance: &InstanceState,
        present: &HashSet<&RemovalElement>,
        visited: &mut HashSet<RemovalElement>,
        ordered: &mut Vec<RemovalElement>,
    ) {
        if visited.contains(element) {
            return;
        }
        visited.insert(element.clone());

        if let RemovalElement::Resource(name) = element {
            for dependent in instance.dependents_of(name) {
                let candidate = RemovalElement::Resource(dependent);
                if present.contains(&candidate) {
                    visit(&candidate, instance, present, visited, ordered);
                }
            }
        }

        ordered.push(element.clone());
    }

    for element in to_remove {
        visit(element, instance, &present, &mut visited, &mut ordered);
    }

    ordered
}

/// Greedy grouping: emit into the current group until an element depends on
/// one already placed in it, then open a new group (spec.md §4.2 step 4).
fn group_greedily(
    ordered: Vec<RemovalElement>,
    instance: &InstanceState,
) -> Vec<Vec<RemovalElement>> {
    let mut groups: Vec<Vec<RemovalElement>> = Vec::new();
    let mut group_index: HashMap<RemovalElement, usize> = HashMap::new();

    'elements: for element in ordered {
        let dependency_names: Vec<String> = match &element {
            RemovalElement::Resource(name) => instance
                .resources
                .get(name)
                .map(|r| r.depended_on_by.clone())
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        for group_idx in (0..groups.len()).rev() {
            let conflicts = dependency_names.iter().any(|dep| {
                group_index
                    .get(&RemovalElement::Resource(dep.clone()))
                    .is_some_and(|&idx| idx == group_idx)
            });
            if conflicts {
                groups.push(vec![element.clone()]);
                group_index.insert(element, groups.len() - 1);
                continue 'elements;
            }
        }

        if groups.is_empty() {
            groups.push(Vec::new());
        }
        let last = groups.len() - 1;
        groups[last].push(element.clone());
        group_index.insert(element, last);
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use deploy_core::instance::ResourceState;
    use deploy_core::ResourceId;
    use serde_json::json;

    fn instance_with(resources: Vec<(&str, Vec<&str>)>) -> InstanceState {
        let mut instance = InstanceState::new(ResourceId::new());
        for (name, depended_on_by) in resources {
            instance.resources.insert(
                name.to_string(),
                ResourceState {
                    id: ResourceId::new(),
                    resource_name: name.to_string(),
                    spec: json!({}),
                    metadata: json!({}),
                    depended_on_by: depended_on_by.into_iter().map(String::from).collect(),
                },
            );
        }
        instance
    }

    #[test]
    fn empty_removal_set_yields_empty_plan() {
        let instance = instance_with(vec![]);
        let changes = ChangeSet::default();
        let plan = plan_removals(&instance, &changes, &HashSet::new()).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn removal_blocked_by_surviving_dependent() {
        let instance = instance_with(vec![
            ("orders_table", vec!["save_order_function"]),
            ("save_order_function", vec![]),
        ]);
        let changes = ChangeSet {
            removed_resources: vec!["orders_table".to_string()],
            ..Default::default()
        };
        let err = plan_removals(&instance, &changes, &HashSet::new()).unwrap_err();
        match err {
            Error::ResourceToBeRemovedHasDependents { resource, dependents } => {
                assert_eq!(resource, "orders_table");
                assert_eq!(dependents, vec!["save_order_function".to_string()]);
            }
            other => panic!("expected ResourceToBeRemovedHasDependents, got {other:?}"),
        }
    }

    #[test]
    fn removal_allowed_when_dependent_also_removed() {
        let instance = instance_with(vec![
            ("orders_table", vec!["save_order_function"]),
            ("save_order_function", vec![]),
        ]);
        let changes = ChangeSet {
            removed_resources: vec!["orders_table".to_string(), "save_order_function".to_string()],
            ..Default::default()
        };
        let plan = plan_removals(&instance, &changes, &HashSet::new()).unwrap();
        let flat: Vec<&RemovalElement> = plan.iter().flatten().collect();
        assert_eq!(flat.len(), 2);

        let pos = |name: &str| {
            plan.iter()
                .position(|group| group.contains(&RemovalElement::Resource(name.to_string())))
                .unwrap()
        };
        assert!(pos("save_order_function") <= pos("orders_table"));
    }
}
