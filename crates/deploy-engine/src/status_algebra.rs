//! The status algebra (C7): a family of total functions mapping orthogonal
//! flags to status enums, plus the classification helpers that invert them.
//!
//! Per spec.md §9 ("Status algebra as many small pure functions → a single
//! table... forbid adding ad-hoc helpers that bypass the table"), every
//! `determine_*` function here is an exhaustive match with no default arm —
//! adding a new phase/flag combination is a compile error until handled,
//! which is how spec.md §8's totality property is enforced mechanically.

use deploy_core::status::{
    ChangeKind, InstanceStatus, LinkStage, LinkStatus, LinkUpdateKind, PreciseLinkStatus,
    PreciseResourceStatus, ResourceStatus,
};

/// The phase of an element's (or instance's) lifecycle, independent of
/// whether it's a create/update/destroy and independent of rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    ConfigComplete,
    Completed,
    Failed,
}

/// Top-level deploy/destroy operation an instance run was invoked with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceOperation {
    Deploy,
    Destroy,
}

/// Flips an operation to the one actually executed when `rollback` is set,
/// per spec.md §4.7/§7: rolling back a create ≡ destroying; rolling back a
/// destroy ≡ creating; rolling back an update re-runs the same (deploy)
/// operation against the prior spec.
pub fn effective_operation(
    requested: InstanceOperation,
    rollback: bool,
    new_instance: bool,
) -> InstanceOperation {
    if !rollback {
        return requested;
    }
    match requested {
        InstanceOperation::Deploy if new_instance => InstanceOperation::Destroy,
        InstanceOperation::Deploy => InstanceOperation::Deploy,
        InstanceOperation::Destroy => InstanceOperation::Deploy,
    }
}

/// `determineInstanceStatus` — spec.md §4.7: `(rollback, newInstance)` →
/// `InstanceStatus`, for each phase of the requested operation.
pub fn determine_instance_status(
    requested: InstanceOperation,
    phase: Phase,
    rollback: bool,
    new_instance: bool,
) -> InstanceStatus {
    let effective = effective_operation(requested, rollback, new_instance);
    match (effective, phase, rollback) {
        (InstanceOperation::Deploy, Phase::Starting, false) => InstanceStatus::Deploying,
        (InstanceOperation::Deploy, Phase::ConfigComplete, false) => InstanceStatus::Deploying,
        (InstanceOperation::Deploy, Phase::Completed, false) => InstanceStatus::Deployed,
        (InstanceOperation::Deploy, Phase::Failed, false) => InstanceStatus::DeployFailed,
        (InstanceOperation::Destroy, Phase::Starting, false) => InstanceStatus::Destroying,
        (InstanceOperation::Destroy, Phase::ConfigComplete, false) => InstanceStatus::Destroying,
        (InstanceOperation::Destroy, Phase::Completed, false) => InstanceStatus::Destroyed,
        (InstanceOperation::Destroy, Phase::Failed, false) => InstanceStatus::DestroyFailed,

        (InstanceOperation::Deploy, Phase::Starting, true) => InstanceStatus::DeployRollingBack,
        (InstanceOperation::Deploy, Phase::ConfigComplete, true) => {
            InstanceStatus::DeployRollingBack
        }
        (InstanceOperation::Deploy, Phase::Completed, true) => {
            InstanceStatus::DeployRollbackComplete
        }
        (InstanceOperation::Deploy, Phase::Failed, true) => InstanceStatus::DeployRollbackFailed,
        (InstanceOperation::Destroy, Phase::Starting, true) => InstanceStatus::DestroyRollingBack,
        (InstanceOperation::Destroy, Phase::ConfigComplete, true) => {
            InstanceStatus::DestroyRollingBack
        }
        (InstanceOperation::Destroy, Phase::Completed, true) => {
            InstanceStatus::DestroyRollbackComplete
        }
        (InstanceOperation::Destroy, Phase::Failed, true) => {
            InstanceStatus::DestroyRollbackFailed
        }
    }
}

/// The "Preparing" instance status is outside the operation algebra — it
/// precedes any element event regardless of rollback/new flags (spec.md §5
/// ordering guarantee).
pub fn preparing_status() -> InstanceStatus {
    InstanceStatus::Preparing
}

/// `determineResourceStatus` — spec.md §4.7: `(rollback, newResource)` →
/// coarse `ResourceStatus`, for each phase. `kind` distinguishes
/// create/update/destroy the way `newResource` distinguishes them (a
/// resource either being newly created or already existing is exactly
/// `ChangeKind::Create` vs `ChangeKind::Update`; `ChangeKind::Destroy` is
/// the Removal Planner's element kind).
pub fn determine_resource_status(kind: ChangeKind, phase: Phase, rollback: bool) -> ResourceStatus {
    match (kind, phase, rollback) {
        (ChangeKind::Create, Phase::Starting, false) => ResourceStatus::Creating,
        (ChangeKind::Create, Phase::ConfigComplete, false) => ResourceStatus::ConfigComplete,
        (ChangeKind::Create, Phase::Completed, false) => ResourceStatus::Created,
        (ChangeKind::Create, Phase::Failed, false) => ResourceStatus::DeployFailed,

        (ChangeKind::Update, Phase::Starting, false) => ResourceStatus::Updating,
        (ChangeKind::Update, Phase::ConfigComplete, false) => ResourceStatus::ConfigComplete,
        (ChangeKind::Update, Phase::Completed, false) => ResourceStatus::Updated,
        (ChangeKind::Update, Phase::Failed, false) => ResourceStatus::DeployFailed,

        (ChangeKind::Destroy, Phase::Starting, false) => ResourceStatus::Destroying,
        (ChangeKind::Destroy, Phase::ConfigComplete, false) => ResourceStatus::Destroying,
        (ChangeKind::Destroy, Phase::Completed, false) => ResourceStatus::Destroyed,
        (ChangeKind::Destroy, Phase::Failed, false) => ResourceStatus::DestroyFailed,

        // Rolling back a create ≡ destroying, surfaced under the Create*
        // rollback label so the user can tell this destroy undoes a create.
        (ChangeKind::Create, Phase::Starting, true) => ResourceStatus::CreateRollingBack,
        (ChangeKind::Create, Phase::ConfigComplete, true) => ResourceStatus::CreateRollingBack,
        (ChangeKind::Create, Phase::Completed, true) => ResourceStatus::CreateRollbackComplete,
        (ChangeKind::Create, Phase::Failed, true) => ResourceStatus::CreateRollbackFailed,

        // Rolling back an update re-runs deploy against the prior spec.
        (ChangeKind::Update, Phase::Starting, true) => ResourceStatus::UpdateRollingBack,
        (ChangeKind::Update, Phase::ConfigComplete, true) => ResourceStatus::UpdateRollingBack,
        (ChangeKind::Update, Phase::Completed, true) => ResourceStatus::UpdateRollbackComplete,
        (ChangeKind::Update, Phase::Failed, true) => ResourceStatus::UpdateRollbackFailed,

        // Rolling back a destroy ≡ creating (recreate).
        (ChangeKind::Destroy, Phase::Starting, true) => ResourceStatus::DestroyRollingBack,
        (ChangeKind::Destroy, Phase::ConfigComplete, true) => ResourceStatus::DestroyRollingBack,
        (ChangeKind::Destroy, Phase::Completed, true) => ResourceStatus::DestroyRollbackComplete,
        (ChangeKind::Destroy, Phase::Failed, true) => ResourceStatus::DestroyRollbackFailed,
    }
}

/// `determinePreciseResourceStatus` — refines the coarse status above with
/// create/update distinction at every intermediate phase.
pub fn determine_precise_resource_status(
    kind: ChangeKind,
    phase: Phase,
    rollback: bool,
) -> PreciseResourceStatus {
    match (kind, phase, rollback) {
        (ChangeKind::Create, Phase::Starting, false) => PreciseResourceStatus::Creating,
        (ChangeKind::Create, Phase::ConfigComplete, false) => {
            PreciseResourceStatus::CreateConfigComplete
        }
        (ChangeKind::Create, Phase::Completed, false) => PreciseResourceStatus::Created,
        (ChangeKind::Create, Phase::Failed, false) => PreciseResourceStatus::CreateFailed,

        (ChangeKind::Update, Phase::Starting, false) => PreciseResourceStatus::Updating,
        (ChangeKind::Update, Phase::ConfigComplete, false) => {
            PreciseResourceStatus::UpdateConfigComplete
        }
        (ChangeKind::Update, Phase::Completed, false) => PreciseResourceStatus::Updated,
        (ChangeKind::Update, Phase::Failed, false) => PreciseResourceStatus::UpdateFailed,

        (ChangeKind::Destroy, Phase::Starting, false) => PreciseResourceStatus::Destroying,
        (ChangeKind::Destroy, Phase::ConfigComplete, false) => PreciseResourceStatus::Destroying,
        (ChangeKind::Destroy, Phase::Completed, false) => PreciseResourceStatus::Destroyed,
        (ChangeKind::Destroy, Phase::Failed, false) => PreciseResourceStatus::DestroyFailed,

        (ChangeKind::Create, Phase::Starting, true) => PreciseResourceStatus::CreateRollingBack,
        (ChangeKind::Create, Phase::ConfigComplete, true) => {
            PreciseResourceStatus::CreateRollingBack
        }
        (ChangeKind::Create, Phase::Completed, true) => {
            PreciseResourceStatus::CreateRollbackComplete
        }
        (ChangeKind::Create, Phase::Failed, true) => PreciseResourceStatus::CreateRollbackFailed,

        (ChangeKind::Update, Phase::Starting, true) => PreciseResourceStatus::UpdateRollingBack,
        (ChangeKind::Update, Phase::ConfigComplete, true) => {
            PreciseResourceStatus::UpdateRollingBack
        }
        (ChangeKind::Update, Phase::Completed, true) => {
            PreciseResourceStatus::UpdateRollbackComplete
        }
        (ChangeKind::Update, Phase::Failed, true) => PreciseResourceStatus::UpdateRollbackFailed,

        (ChangeKind::Destroy, Phase::Starting, true) => PreciseResourceStatus::DestroyRollingBack,
        (ChangeKind::Destroy, Phase::ConfigComplete, true) => {
            PreciseResourceStatus::DestroyRollingBack
        }
        (ChangeKind::Destroy, Phase::Completed, true) => {
            PreciseResourceStatus::DestroyRollbackComplete
        }
        (ChangeKind::Destroy, Phase::Failed, true) => {
            PreciseResourceStatus::DestroyRollbackFailed
        }
    }
}

/// `determineLinkStatus` — spec.md §4.7: `(rollback, linkUpdateKind)` →
/// coarse `LinkStatus`.
pub fn determine_link_status(kind: LinkUpdateKind, phase: Phase, rollback: bool) -> LinkStatus {
    match (kind, phase, rollback) {
        (LinkUpdateKind::Create, Phase::Starting, false) => LinkStatus::Creating,
        (LinkUpdateKind::Create, Phase::ConfigComplete, false) => LinkStatus::Creating,
        (LinkUpdateKind::Create, Phase::Completed, false) => LinkStatus::Created,
        (LinkUpdateKind::Create, Phase::Failed, false) => LinkStatus::CreateFailed,

        (LinkUpdateKind::Update, Phase::Starting, false) => LinkStatus::Updating,
        (LinkUpdateKind::Update, Phase::ConfigComplete, false) => LinkStatus::Updating,
        (LinkUpdateKind::Update, Phase::Completed, false) => LinkStatus::Updated,
        (LinkUpdateKind::Update, Phase::Failed, false) => LinkStatus::UpdateFailed,

        (LinkUpdateKind::Destroy, Phase::Starting, false) => LinkStatus::Destroying,
        (LinkUpdateKind::Destroy, Phase::ConfigComplete, false) => LinkStatus::Destroying,
        (LinkUpdateKind::Destroy, Phase::Completed, false) => LinkStatus::Destroyed,
        (LinkUpdateKind::Destroy, Phase::Failed, false) => LinkStatus::DestroyFailed,

        (LinkUpdateKind::Create, Phase::Starting, true) => LinkStatus::CreateRollingBack,
        (LinkUpdateKind::Create, Phase::ConfigComplete, true) => LinkStatus::CreateRollingBack,
        (LinkUpdateKind::Create, Phase::Completed, true) => LinkStatus::CreateRollbackComplete,
        (LinkUpdateKind::Create, Phase::Failed, true) => LinkStatus::CreateRollbackFailed,

        (LinkUpdateKind::Update, Phase::Starting, true) => LinkStatus::UpdateRollingBack,
        (LinkUpdateKind::Update, Phase::ConfigComplete, true) => LinkStatus::UpdateRollingBack,
        (LinkUpdateKind::Update, Phase::Completed, true) => LinkStatus::UpdateRollbackComplete,
        (LinkUpdateKind::Update, Phase::Failed, true) => LinkStatus::UpdateRollbackFailed,

        (LinkUpdateKind::Destroy, Phase::Starting, true) => LinkStatus::DestroyRollingBack,
        (LinkUpdateKind::Destroy, Phase::ConfigComplete, true) => LinkStatus::DestroyRollingBack,
        (LinkUpdateKind::Destroy, Phase::Completed, true) => LinkStatus::DestroyRollbackComplete,
        (LinkUpdateKind::Destroy, Phase::Failed, true) => LinkStatus::DestroyRollbackFailed,
    }
}

/// Per-stage phase for a link pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePhase {
    Starting,
    Completed,
    Failed,
}

/// `determinePreciseLinkStatus` — spec.md §4.5: per-stage precise status.
pub fn determine_precise_link_status(
    stage: LinkStage,
    phase: StagePhase,
    rollback: bool,
) -> PreciseLinkStatus {
    match (stage, phase, rollback) {
        (LinkStage::ResourceA, StagePhase::Starting, false) => {
            PreciseLinkStatus::UpdatingResourceA
        }
        (LinkStage::ResourceA, StagePhase::Completed, false) => {
            PreciseLinkStatus::ResourceAUpdated
        }
        (LinkStage::ResourceA, StagePhase::Failed, false) => {
            PreciseLinkStatus::ResourceAUpdateFailed
        }
        (LinkStage::ResourceB, StagePhase::Starting, false) => {
            PreciseLinkStatus::UpdatingResourceB
        }
        (LinkStage::ResourceB, StagePhase::Completed, false) => {
            PreciseLinkStatus::ResourceBUpdated
        }
        (LinkStage::ResourceB, StagePhase::Failed, false) => {
            PreciseLinkStatus::ResourceBUpdateFailed
        }
        (LinkStage::IntermediaryResources, StagePhase::Starting, false) => {
            PreciseLinkStatus::UpdatingIntermediaryResources
        }
        (LinkStage::IntermediaryResources, StagePhase::Completed, false) => {
            PreciseLinkStatus::IntermediaryResourcesUpdated
        }
        (LinkStage::IntermediaryResources, StagePhase::Failed, false) => {
            PreciseLinkStatus::IntermediaryResourceUpdateFailed
        }

        (LinkStage::ResourceA, StagePhase::Starting, true) => {
            PreciseLinkStatus::ResourceARollingBack
        }
        (LinkStage::ResourceA, StagePhase::Completed, true) => {
            PreciseLinkStatus::ResourceARollbackComplete
        }
        (LinkStage::ResourceA, StagePhase::Failed, true) => {
            PreciseLinkStatus::ResourceARollbackFailed
        }
        (LinkStage::ResourceB, StagePhase::Starting, true) => {
            PreciseLinkStatus::ResourceBRollingBack
        }
        (LinkStage::ResourceB, StagePhase::Completed, true) => {
            PreciseLinkStatus::ResourceBRollbackComplete
        }
        (LinkStage::ResourceB, StagePhase::Failed, true) => {
            PreciseLinkStatus::ResourceBRollbackFailed
        }
        (LinkStage::IntermediaryResources, StagePhase::Starting, true) => {
            PreciseLinkStatus::IntermediaryResourcesRollingBack
        }
        (LinkStage::IntermediaryResources, StagePhase::Completed, true) => {
            PreciseLinkStatus::IntermediaryResourcesRollbackComplete
        }
        (LinkStage::IntermediaryResources, StagePhase::Failed, true) => {
            PreciseLinkStatus::IntermediaryResourcesRollbackFailed
        }
    }
}

// --- Classification helpers, inverting the algebra to route incoming
// messages (spec.md §4.7). ---

pub fn is_resource_destroy_event(status: ResourceStatus) -> bool {
    matches!(
        status,
        ResourceStatus::Destroying
            | ResourceStatus::Destroyed
            | ResourceStatus::DestroyFailed
            | ResourceStatus::CreateRollingBack
            | ResourceStatus::CreateRollbackComplete
            | ResourceStatus::CreateRollbackFailed
    )
}

pub fn is_link_update_event(status: LinkStatus) -> bool {
    matches!(
        status,
        LinkStatus::Creating
            | LinkStatus::Updating
            | LinkStatus::CreateFailed
            | LinkStatus::UpdateFailed
            | LinkStatus::Created
            | LinkStatus::Updated
    )
}

pub fn finished_creating_resource(status: ResourceStatus) -> bool {
    matches!(status, ResourceStatus::Created)
}

pub fn was_resource_destroyed_successfully(status: ResourceStatus) -> bool {
    matches!(
        status,
        ResourceStatus::Destroyed | ResourceStatus::CreateRollbackComplete
    )
}

pub fn resource_reached_created_or_updated(status: ResourceStatus) -> bool {
    matches!(
        status,
        ResourceStatus::Created
            | ResourceStatus::Updated
            | ResourceStatus::UpdateRollbackComplete
            | ResourceStatus::DestroyRollbackComplete
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHASES: [Phase; 4] = [Phase::Starting, Phase::ConfigComplete, Phase::Completed, Phase::Failed];
    const KINDS: [ChangeKind; 3] = [ChangeKind::Create, ChangeKind::Update, ChangeKind::Destroy];

    #[test]
    fn resource_status_is_total_and_has_rollback_twin() {
        for &kind in &KINDS {
            for &phase in &PHASES {
                let forward = determine_resource_status(kind, phase, false);
                let rolled_back = determine_resource_status(kind, phase, true);
                assert_ne!(forward, rolled_back);
            }
        }
    }

    #[test]
    fn precise_resource_status_is_total() {
        for &kind in &KINDS {
            for &phase in &PHASES {
                let _ = determine_precise_resource_status(kind, phase, false);
                let _ = determine_precise_resource_status(kind, phase, true);
            }
        }
    }

    #[test]
    fn instance_status_rollback_of_fresh_deploy_is_destroy_rollback() {
        let status = determine_instance_status(
            InstanceOperation::Deploy,
            Phase::Completed,
            true,
            true,
        );
        assert_eq!(status, InstanceStatus::DestroyRollbackComplete);
    }

    #[test]
    fn instance_status_rollback_of_update_stays_deploy() {
        let status = determine_instance_status(
            InstanceOperation::Deploy,
            Phase::Completed,
            true,
            false,
        );
        assert_eq!(status, InstanceStatus::DeployRollbackComplete);
    }

    #[test]
    fn link_status_is_total() {
        let kinds = [
            LinkUpdateKind::Create,
            LinkUpdateKind::Update,
            LinkUpdateKind::Destroy,
        ];
        for &kind in &kinds {
            for &phase in &PHASES {
                let _ = determine_link_status(kind, phase, false);
                let _ = determine_link_status(kind, phase, true);
            }
        }
    }
}
