//! The precomputed change set for a blueprint instance (spec.md §3).
//!
//! Diffing/planning that produces a `ChangeSet` is out of this core's scope
//! (spec.md §1) — the core only consumes one.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::node::DeploymentNode;

/// A single outbound link change on a resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkChange {
    pub link_name: String,
    pub target_resource_name: String,
}

/// Change entry for one resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceChange {
    pub resource_name: String,
    pub new_outbound_links: Vec<LinkChange>,
    pub outbound_link_changes: Vec<LinkChange>,
}

/// The recursive change-set structure. The top level enumerates additions,
/// updates and removals across resources, links, and child blueprints; each
/// child's own changes are represented as a nested `ChangeSet`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    pub new_resources: Vec<String>,
    pub resource_changes: HashMap<String, ResourceChange>,
    pub removed_resources: Vec<String>,

    pub new_children: Vec<String>,
    pub child_changes: HashMap<String, ChangeSet>,
    pub removed_children: Vec<String>,
    pub recreate_children: Vec<String>,

    pub removed_links: Vec<(String, String)>,

    /// Dotted paths to be resolved late, once dependency values are
    /// available (spec.md §3, §4.4 step 2). Resolution itself is an
    /// external collaborator.
    pub resolve_on_deploy: Vec<String>,

    /// Peripheral metadata/export diffs, carried opaquely.
    pub metadata_changes: Option<Value>,
    pub export_changes: Option<Value>,

    /// This blueprint's own precomputed parallel deployment groups (spec.md
    /// §1/§4.1's `DeployInput::groups`). Empty at the top level, where the
    /// caller supplies groups directly to `DeployInput`; populated on a
    /// child's own nested `ChangeSet` so the Child Executor (C6) has
    /// something to schedule when it recurses (spec.md §4.6).
    pub groups: Vec<Vec<DeploymentNode>>,
    /// This blueprint's own per-resource specs, mirroring
    /// `DeployInput::partially_resolved_resources` for the same reason.
    pub partially_resolved_resources: HashMap<String, Value>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.new_resources.is_empty()
            && self.resource_changes.is_empty()
            && self.removed_resources.is_empty()
            && self.new_children.is_empty()
            && self.child_changes.values().all(ChangeSet::is_empty)
            && self.removed_children.is_empty()
            && self.recreate_children.is_empty()
            && self.removed_links.is_empty()
    }

    /// Whether `resource_name` is resolved late under this change set.
    pub fn has_resolve_on_deploy(&self, resource_name: &str) -> bool {
        let prefix = format!("{resource_name}.");
        self.resolve_on_deploy
            .iter()
            .any(|p| p == resource_name || p.starts_with(&prefix))
    }
}
