//! Status enums for instances, resources, and links.
//!
//! Each family enumerates forward states (`*ing` / `*ed` / `Failed`) and
//! their rollback twins. Values here are produced only by the status-algebra
//! functions in `deploy-engine::status_algebra` (spec.md §9: "forbid adding
//! ad-hoc helpers that bypass the table") — these enums themselves carry no
//! behaviour beyond `is_terminal`/`is_failure`.

use serde::{Deserialize, Serialize};

/// Coarse status of a blueprint instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InstanceStatus {
    Preparing,
    Deploying,
    Deployed,
    DeployFailed,
    Destroying,
    Destroyed,
    DestroyFailed,
    DeployRollingBack,
    DeployRollbackComplete,
    DeployRollbackFailed,
    DestroyRollingBack,
    DestroyRollbackComplete,
    DestroyRollbackFailed,
}

impl InstanceStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            InstanceStatus::Preparing
                | InstanceStatus::Deploying
                | InstanceStatus::Destroying
                | InstanceStatus::DeployRollingBack
                | InstanceStatus::DestroyRollingBack
        )
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            InstanceStatus::DeployFailed
                | InstanceStatus::DestroyFailed
                | InstanceStatus::DeployRollbackFailed
                | InstanceStatus::DestroyRollbackFailed
        )
    }

    pub fn is_rollback(self) -> bool {
        matches!(
            self,
            InstanceStatus::DeployRollingBack
                | InstanceStatus::DeployRollbackComplete
                | InstanceStatus::DeployRollbackFailed
                | InstanceStatus::DestroyRollingBack
                | InstanceStatus::DestroyRollbackComplete
                | InstanceStatus::DestroyRollbackFailed
        )
    }
}

/// What kind of change a resource element represents. `Destroy` is only
/// produced by the Removal Planner (C2); `Create`/`Update` by the
/// Deployment Planner (C3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Create,
    Update,
    Destroy,
}

/// Coarse status of a single resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceStatus {
    Creating,
    Updating,
    ConfigComplete,
    Created,
    Updated,
    DeployFailed,
    Destroying,
    Destroyed,
    DestroyFailed,
    CreateRollingBack,
    CreateRollbackComplete,
    CreateRollbackFailed,
    UpdateRollingBack,
    UpdateRollbackComplete,
    UpdateRollbackFailed,
    DestroyRollingBack,
    DestroyRollbackComplete,
    DestroyRollbackFailed,
}

/// Precise status of a single resource — refines the coarse status with
/// create/update distinction at every intermediate phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PreciseResourceStatus {
    Creating,
    CreateConfigComplete,
    Created,
    CreateFailed,
    Updating,
    UpdateConfigComplete,
    Updated,
    UpdateFailed,
    Destroying,
    Destroyed,
    DestroyFailed,
    CreateRollingBack,
    CreateRollbackComplete,
    CreateRollbackFailed,
    UpdateRollingBack,
    UpdateRollbackComplete,
    UpdateRollbackFailed,
    DestroyRollingBack,
    DestroyRollbackComplete,
    DestroyRollbackFailed,
}

impl ResourceStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            ResourceStatus::Creating
                | ResourceStatus::Updating
                | ResourceStatus::ConfigComplete
                | ResourceStatus::Destroying
                | ResourceStatus::CreateRollingBack
                | ResourceStatus::UpdateRollingBack
                | ResourceStatus::DestroyRollingBack
        )
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            ResourceStatus::DeployFailed
                | ResourceStatus::DestroyFailed
                | ResourceStatus::CreateRollbackFailed
                | ResourceStatus::UpdateRollbackFailed
                | ResourceStatus::DestroyRollbackFailed
        )
    }
}

/// The three independent stages of a link's deployment pipeline (spec.md
/// §4.5). Each stage has its own retry state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkStage {
    ResourceA,
    ResourceB,
    IntermediaryResources,
}

/// What kind of change a link element represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkUpdateKind {
    Create,
    Update,
    Destroy,
}

/// Coarse status of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkStatus {
    Creating,
    Updating,
    Destroying,
    CreateFailed,
    UpdateFailed,
    DestroyFailed,
    Created,
    Updated,
    Destroyed,
    CreateRollingBack,
    CreateRollbackComplete,
    CreateRollbackFailed,
    UpdateRollingBack,
    UpdateRollbackComplete,
    UpdateRollbackFailed,
    DestroyRollingBack,
    DestroyRollbackComplete,
    DestroyRollbackFailed,
}

impl LinkStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LinkStatus::CreateFailed
                | LinkStatus::UpdateFailed
                | LinkStatus::DestroyFailed
                | LinkStatus::Created
                | LinkStatus::Updated
                | LinkStatus::Destroyed
                | LinkStatus::CreateRollbackComplete
                | LinkStatus::CreateRollbackFailed
                | LinkStatus::UpdateRollbackComplete
                | LinkStatus::UpdateRollbackFailed
                | LinkStatus::DestroyRollbackComplete
                | LinkStatus::DestroyRollbackFailed
        )
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            LinkStatus::CreateFailed
                | LinkStatus::UpdateFailed
                | LinkStatus::DestroyFailed
                | LinkStatus::CreateRollbackFailed
                | LinkStatus::UpdateRollbackFailed
                | LinkStatus::DestroyRollbackFailed
        )
    }
}

/// Precise per-stage status of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PreciseLinkStatus {
    UpdatingResourceA,
    ResourceAUpdated,
    ResourceAUpdateFailed,
    UpdatingResourceB,
    ResourceBUpdated,
    ResourceBUpdateFailed,
    UpdatingIntermediaryResources,
    IntermediaryResourcesUpdated,
    IntermediaryResourceUpdateFailed,
    ResourceARollingBack,
    ResourceARollbackComplete,
    ResourceARollbackFailed,
    ResourceBRollingBack,
    ResourceBRollbackComplete,
    ResourceBRollbackFailed,
    IntermediaryResourcesRollingBack,
    IntermediaryResourcesRollbackComplete,
    IntermediaryResourcesRollbackFailed,
}

/// A child blueprint is itself an instance, so it reuses `InstanceStatus`.
pub type ChildStatus = InstanceStatus;
