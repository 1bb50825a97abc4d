//! Persistent state store interface (spec.md §6) — external collaborator.
//!
//! One trait per collection. Concrete implementations (Postgres-backed,
//! etc.) are out of this core's scope; only in-memory test doubles ship
//! here, under `deploy_engine::testing`.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::id::ResourceId;
use crate::instance::{InstanceState, LinkState, ResourceState};
use crate::status::InstanceStatus;

#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn get(&self, id: ResourceId) -> Result<InstanceState>;
    async fn save(&self, state: InstanceState) -> Result<()>;
    async fn update_status(&self, id: ResourceId, status: InstanceStatus) -> Result<()>;
    async fn is_instance_not_found(&self, err: &crate::error::Error) -> bool {
        matches!(err, crate::error::Error::NotFound(_))
    }
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, instance_id: ResourceId, name: &str) -> Result<ResourceState>;
    async fn save(&self, instance_id: ResourceId, state: ResourceState) -> Result<()>;
    async fn remove(&self, instance_id: ResourceId, name: &str) -> Result<()>;
    async fn save_dependencies(
        &self,
        instance_id: ResourceId,
        resource_name: &str,
        depends_on: Vec<String>,
    ) -> Result<()>;
}

#[async_trait]
pub trait LinkStore: Send + Sync {
    async fn get_by_name(
        &self,
        instance_id: ResourceId,
        resource_a: &str,
        resource_b: &str,
    ) -> Result<LinkState>;
    async fn save(&self, instance_id: ResourceId, state: LinkState) -> Result<()>;
    async fn remove(&self, instance_id: ResourceId, resource_a: &str, resource_b: &str)
    -> Result<()>;
    async fn is_link_not_found(&self, err: &crate::error::Error) -> bool {
        matches!(err, crate::error::Error::NotFound(_))
    }
}

#[async_trait]
pub trait ChildStore: Send + Sync {
    async fn get(&self, parent_id: ResourceId, name: &str) -> Result<InstanceState>;
    async fn attach(&self, parent_id: ResourceId, name: &str, child_id: ResourceId) -> Result<()>;
    async fn detach(&self, parent_id: ResourceId, name: &str) -> Result<()>;
}

/// The full persistent state store: one handle exposing all four
/// collections, matching how the orchestrator actually receives it (a
/// single object implementing every sub-trait).
pub trait StateStore: InstanceStore + ResourceStore + LinkStore + ChildStore {}

impl<T: InstanceStore + ResourceStore + LinkStore + ChildStore> StateStore for T {}

/// Opaque export/metadata bundle persisted alongside an instance.
#[derive(Debug, Clone, Default)]
pub struct ExportBundle {
    pub exports: Value,
}
