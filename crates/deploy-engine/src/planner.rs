//! Deployment Planner (C3): walks precomputed parallel groups once, filling
//! each node's `direct_dependencies` (spec.md §4.3).
//!
//! Pure and synchronous: a read-only graph walk producing a side-table,
//! no channels, no async.

use std::collections::HashMap;
use std::sync::Arc;

use deploy_core::changeset::ChangeSet;
use deploy_core::node::{AnnotatedNode, DeploymentNode, ElementKey};
use deploy_core::provider::{LinkProvider, PrioritySide};

/// Registered link providers keyed by the ordered resource-name pair they
/// bind, the same key shape the orchestrator uses to dispatch link work.
pub type LinkProviderMap = HashMap<(String, String), Arc<dyn LinkProvider>>;

/// Resolve which side of a link must exist/update first (spec.md glossary:
/// "priority resource"). Looks the pair up in both orders since a
/// `links_to`/`linked_from` edge may be recorded from either endpoint.
fn priority_side_of(providers: &LinkProviderMap, a: &str, b: &str) -> Option<PrioritySide> {
    if let Some(p) = providers.get(&(a.to_string(), b.to_string())) {
        return Some(p.priority_side());
    }
    providers
        .get(&(b.to_string(), a.to_string()))
        .map(|p| p.priority_side())
}

/// Given a priority and a directed `links_to` edge `from -> to`, return the
/// `(dependent, dependency)` pair this link contributes, or `None` if the
/// link has no declared priority side (DESIGN.md Open Question #3: "no
/// priority" means zero dependency edge, not merely lower urgency).
fn link_dependency_edge(priority: PrioritySide, from: &str, to: &str) -> Option<(String, String)> {
    match priority {
        PrioritySide::ResourceA => Some((to.to_string(), from.to_string())),
        PrioritySide::ResourceB => Some((from.to_string(), to.to_string())),
        PrioritySide::None => None,
    }
}

/// Populate `direct_dependencies` for every node across every group
/// (spec.md §4.3). Groups are otherwise left untouched: ordering across
/// groups is the externally supplied DAG's job, not this planner's.
pub fn plan_direct_dependencies(
    groups: &[Vec<DeploymentNode>],
    changes: &ChangeSet,
    link_providers: &LinkProviderMap,
) -> Vec<Vec<AnnotatedNode>> {
    groups
        .iter()
        .map(|group| {
            group
                .iter()
                .map(|node| annotate(node, changes, link_providers))
                .collect()
        })
        .collect()
}

fn annotate(node: &DeploymentNode, changes: &ChangeSet, link_providers: &LinkProviderMap) -> AnnotatedNode {
    let mut annotated = AnnotatedNode::new(node.clone());

    let DeploymentNode::Resource(chain_link) = node else {
        return annotated;
    };

    for to in &chain_link.links_to {
        if let Some(priority) = priority_side_of(link_providers, &chain_link.resource_name, to) {
            if let Some((dependent, dependency)) =
                link_dependency_edge(priority, &chain_link.resource_name, to)
            {
                if dependent == chain_link.resource_name {
                    annotated
                        .direct_dependencies
                        .insert(ElementKey::Resource(dependency));
                }
            }
        }
    }

    for from in &chain_link.linked_from {
        if let Some(priority) = priority_side_of(link_providers, from, &chain_link.resource_name) {
            if let Some((dependent, dependency)) =
                link_dependency_edge(priority, from, &chain_link.resource_name)
            {
                if dependent == chain_link.resource_name {
                    annotated
                        .direct_dependencies
                        .insert(ElementKey::Resource(dependency));
                }
            }
        }
    }

    if let Some(change) = changes.resource_changes.get(&chain_link.resource_name) {
        for link in change.new_outbound_links.iter().chain(&change.outbound_link_changes) {
            annotated
                .direct_dependencies
                .insert(ElementKey::Resource(link.target_resource_name.clone()));
        }
    }

    annotated
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use deploy_core::node::ChainLinkRef;
    use deploy_core::provider::{
        IntermediaryResourcesOutput, LinkKind, LinkStageInput, LinkStageOutput, ProviderError,
    };
    use deploy_core::retry::RetryPolicy;

    struct FixedPriorityLink(PrioritySide);

    #[async_trait]
    impl LinkProvider for FixedPriorityLink {
        fn kind(&self) -> LinkKind {
            LinkKind::Hard
        }

        fn priority_side(&self) -> PrioritySide {
            self.0
        }

        async fn retry_policy(&self) -> RetryPolicy {
            RetryPolicy::default()
        }

        async fn update_resource_a(
            &self,
            _input: &LinkStageInput,
        ) -> std::result::Result<LinkStageOutput, ProviderError> {
            Ok(LinkStageOutput::default())
        }

        async fn update_resource_b(
            &self,
            _input: &LinkStageInput,
        ) -> std::result::Result<LinkStageOutput, ProviderError> {
            Ok(LinkStageOutput::default())
        }

        async fn update_intermediary_resources(
            &self,
            _input: &LinkStageInput,
        ) -> std::result::Result<IntermediaryResourcesOutput, ProviderError> {
            Ok(IntermediaryResourcesOutput::default())
        }
    }

    fn resource_node(name: &str, links_to: Vec<&str>, linked_from: Vec<&str>) -> DeploymentNode {
        DeploymentNode::Resource(ChainLinkRef {
            resource_name: name.to_string(),
            links_to: links_to.into_iter().map(String::from).collect(),
            linked_from: linked_from.into_iter().map(String::from).collect(),
        })
    }

    #[test]
    fn priority_side_a_makes_the_links_to_target_depend_on_the_source() {
        let mut providers: LinkProviderMap = HashMap::new();
        providers.insert(
            ("save_order_function".to_string(), "orders_table".to_string()),
            Arc::new(FixedPriorityLink(PrioritySide::ResourceA)),
        );
        let groups = vec![vec![
            resource_node("save_order_function", vec!["orders_table"], vec![]),
            resource_node("orders_table", vec![], vec!["save_order_function"]),
        ]];

        let annotated = plan_direct_dependencies(&groups, &ChangeSet::default(), &providers);
        let orders_table = annotated[0]
            .iter()
            .find(|n| n.key() == ElementKey::Resource("orders_table".to_string()))
            .unwrap();
        assert!(orders_table
            .direct_dependencies
            .contains(&ElementKey::Resource("save_order_function".to_string())));
    }

    #[test]
    fn no_declared_priority_yields_zero_dependency_edge() {
        let providers: LinkProviderMap = HashMap::new();
        let groups = vec![vec![resource_node("save_order_function", vec!["orders_table"], vec![])]];

        let annotated = plan_direct_dependencies(&groups, &ChangeSet::default(), &providers);
        assert!(annotated[0][0].direct_dependencies.is_empty());
    }
}
