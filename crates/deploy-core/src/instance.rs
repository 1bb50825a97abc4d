//! Read-mostly view of a blueprint instance's persisted state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::ResourceId;
use crate::status::InstanceStatus;

/// A single resource's persisted record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    pub id: ResourceId,
    pub resource_name: String,
    pub spec: Value,
    pub metadata: Value,
    /// Names of resources that depend on this one via a link, used by the
    /// Removal Planner to find dependents of a to-be-removed resource.
    pub depended_on_by: Vec<String>,
}

/// A single link's persisted record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkState {
    pub resource_a: String,
    pub resource_b: String,
    pub intermediary_resource_ids: Vec<String>,
}

/// Read-mostly snapshot of an instance's current state as loaded from the
/// persistent store at the start of a deployment run (spec.md §3). The
/// orchestrator never mutates this directly — all mutation goes through the
/// `StateStore` trait (an external collaborator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceState {
    pub id: ResourceId,
    pub status: InstanceStatus,
    pub resources: HashMap<String, ResourceState>,
    pub links: HashMap<String, LinkState>,
    pub child_blueprints: HashMap<String, InstanceState>,
    pub exports: Value,
    pub resource_ids: HashMap<String, ResourceId>,
}

impl InstanceState {
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            status: InstanceStatus::Preparing,
            resources: HashMap::new(),
            links: HashMap::new(),
            child_blueprints: HashMap::new(),
            exports: Value::Null,
            resource_ids: HashMap::new(),
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(
            self.status,
            InstanceStatus::Preparing
                | InstanceStatus::Deploying
                | InstanceStatus::Destroying
                | InstanceStatus::DeployRollingBack
                | InstanceStatus::DestroyRollingBack
        )
    }

    /// Dependents of `resource_name` that are still present in the current
    /// state (used by the Removal Planner, spec.md §4.2 step 2).
    pub fn dependents_of(&self, resource_name: &str) -> Vec<String> {
        self.resources
            .get(resource_name)
            .map(|r| r.depended_on_by.clone())
            .unwrap_or_default()
            .into_iter()
            .filter(|d| self.resources.contains_key(d))
            .collect()
    }
}
