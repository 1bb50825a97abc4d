//! Link Executor (C5): a three-stage retryable pipeline (spec.md §4.5).
//!
//! One function per unit of work, success/failure folded into an event,
//! with a retry loop and per-stage `RetryContext` since link providers can
//! fail retryably.

use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{info, instrument, warn};

use deploy_core::provider::{IntermediaryResourceState, LinkProvider, LinkStageInput, ProviderError};
use deploy_core::retry::{retry_wait_duration, RetryContext};
use deploy_core::status::{LinkStage, LinkUpdateKind};
use deploy_core::ResourceId;

use crate::bus::EventSenders;
use crate::events::{LinkEventDurations, LinkUpdateMessage};
use crate::state::DeploymentState;
use crate::status_algebra::{determine_link_status, determine_precise_link_status, Phase, StagePhase};

/// Merged result of a fully completed link pipeline, stashed in deployment
/// state and consulted by the Removal Planner / Child Executor.
#[derive(Debug, Clone, Default)]
pub struct LinkDeployResult {
    pub link_data: Value,
    pub intermediary_resource_states: Vec<IntermediaryResourceState>,
}

/// Outcome of running the full pipeline once.
pub enum LinkOutcome {
    Completed(LinkDeployResult),
    Failed,
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

fn merge_value(base: &mut Value, addition: Value) {
    match (base, addition) {
        (Value::Object(base_map), Value::Object(addition_map)) => {
            for (k, v) in addition_map {
                base_map.insert(k, v);
            }
        }
        (base_slot, addition) if !addition.is_null() => *base_slot = addition,
        _ => {}
    }
}

/// Run one stage's retry loop, emitting `LinkUpdateMessage`s along the way.
/// Returns `Some(output)` on success, `None` on terminal/exhausted failure.
#[allow(clippy::too_many_arguments)]
async fn run_stage<F, Fut, Out>(
    instance_id: ResourceId,
    resource_a: &str,
    resource_b: &str,
    kind: LinkUpdateKind,
    stage: LinkStage,
    rollback: bool,
    provider: &dyn LinkProvider,
    call: F,
    senders: &EventSenders,
) -> Option<(Out, Duration)>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<Out, ProviderError>>,
{
    let policy = provider.retry_policy().await;
    let mut retry_ctx = RetryContext::default();

    let starting_status = determine_link_status(kind, Phase::Starting, rollback);
    let starting_precise = determine_precise_link_status(stage, StagePhase::Starting, rollback);
    emit_link_event(
        senders,
        instance_id,
        resource_a,
        resource_b,
        starting_status,
        starting_precise,
        retry_ctx.attempt,
        true,
        None,
        LinkEventDurations::default(),
    )
    .await;

    loop {
        let attempt_start = Instant::now();
        let result = call().await;
        let attempt_duration = attempt_start.elapsed();
        retry_ctx = retry_ctx.with_next_attempt(attempt_duration);

        match result {
            Ok(output) => {
                let completed_status = determine_link_status(kind, Phase::Completed, rollback);
                let completed_precise =
                    determine_precise_link_status(stage, StagePhase::Completed, rollback);
                let total: Duration = retry_ctx.attempt_durations.iter().sum();
                emit_link_event(
                    senders,
                    instance_id,
                    resource_a,
                    resource_b,
                    completed_status,
                    completed_precise,
                    retry_ctx.attempt,
                    false,
                    None,
                    stage_duration(stage, total),
                )
                .await;
                return Some((output, total));
            }
            Err(err) if err.is_retryable() && retry_ctx.can_retry(&policy) => {
                warn!(
                    stage = ?stage, resource_a, resource_b, attempt = retry_ctx.attempt,
                    reason = %err.message(), "link stage failed retryably"
                );
                let failed_status = determine_link_status(kind, Phase::Failed, rollback);
                let failed_precise =
                    determine_precise_link_status(stage, StagePhase::Failed, rollback);
                emit_link_event(
                    senders,
                    instance_id,
                    resource_a,
                    resource_b,
                    failed_status,
                    failed_precise,
                    retry_ctx.attempt,
                    true,
                    Some(err.message().to_string()),
                    LinkEventDurations::default(),
                )
                .await;
                tokio::time::sleep(retry_wait_duration(&policy, retry_ctx.attempt)).await;
            }
            Err(err) => {
                warn!(
                    stage = ?stage, resource_a, resource_b,
                    reason = %err.message(), "link stage failed terminally"
                );
                let failed_status = determine_link_status(kind, Phase::Failed, rollback);
                let failed_precise =
                    determine_precise_link_status(stage, StagePhase::Failed, rollback);
                emit_link_event(
                    senders,
                    instance_id,
                    resource_a,
                    resource_b,
                    failed_status,
                    failed_precise,
                    retry_ctx.attempt,
                    false,
                    Some(err.message().to_string()),
                    LinkEventDurations::default(),
                )
                .await;
                return None;
            }
        }
    }
}

fn stage_duration(stage: LinkStage, duration: Duration) -> LinkEventDurations {
    match stage {
        LinkStage::ResourceA => LinkEventDurations::new(Some(duration), None, None),
        LinkStage::ResourceB => LinkEventDurations::new(None, Some(duration), None),
        LinkStage::IntermediaryResources => LinkEventDurations::new(None, None, Some(duration)),
    }
}

#[allow(clippy::too_many_arguments)]
async fn emit_link_event(
    senders: &EventSenders,
    instance_id: ResourceId,
    resource_a: &str,
    resource_b: &str,
    status: deploy_core::status::LinkStatus,
    precise_status: deploy_core::status::PreciseLinkStatus,
    attempt: u32,
    can_retry_current_stage: bool,
    reason: Option<String>,
    durations: LinkEventDurations,
) {
    let message = LinkUpdateMessage {
        instance_id,
        resource_a: resource_a.to_string(),
        resource_b: resource_b.to_string(),
        status,
        precise_status,
        can_retry_current_stage,
        reason,
        durations,
        timestamp: now_unix(),
    };
    let _ = senders.link_update.send(message).await;
}

/// Run the full three-stage pipeline for one link (spec.md §4.5). `kind`
/// drives which coarse `LinkStatus` family is emitted at each stage
/// boundary; stages themselves always run resource-A, resource-B, then
/// intermediaries in order regardless of kind — a destroy is simply an
/// `Update*` call with `LinkStageInput::kind == Destroy`, per spec.md §6's
/// provider surface (there is no separate provider-level destroy RPC).
#[instrument(skip(provider, state, senders, resource_a_spec, resource_b_spec))]
#[allow(clippy::too_many_arguments)]
pub async fn deploy_link(
    instance_id: ResourceId,
    resource_a: &str,
    resource_b: &str,
    kind: LinkUpdateKind,
    rollback: bool,
    resource_a_spec: Value,
    resource_b_spec: Value,
    provider: &dyn LinkProvider,
    state: &DeploymentState,
    senders: &EventSenders,
) -> LinkOutcome {
    let input = LinkStageInput {
        kind,
        resource_a_spec,
        resource_b_spec,
    };

    let stage_a = run_stage(
        instance_id,
        resource_a,
        resource_b,
        kind,
        LinkStage::ResourceA,
        rollback,
        provider,
        || async { provider.update_resource_a(&input).await },
        senders,
    )
    .await;
    let Some((output_a, duration_a)) = stage_a else {
        return LinkOutcome::Failed;
    };
    state.set_link_stage_duration(resource_a, resource_b, LinkStage::ResourceA, duration_a);

    let stage_b = run_stage(
        instance_id,
        resource_a,
        resource_b,
        kind,
        LinkStage::ResourceB,
        rollback,
        provider,
        || async { provider.update_resource_b(&input).await },
        senders,
    )
    .await;
    let Some((output_b, duration_b)) = stage_b else {
        return LinkOutcome::Failed;
    };
    state.set_link_stage_duration(resource_a, resource_b, LinkStage::ResourceB, duration_b);

    let stage_c = run_stage(
        instance_id,
        resource_a,
        resource_b,
        kind,
        LinkStage::IntermediaryResources,
        rollback,
        provider,
        || async { provider.update_intermediary_resources(&input).await },
        senders,
    )
    .await;
    let Some((output_c, duration_c)) = stage_c else {
        return LinkOutcome::Failed;
    };
    state.set_link_stage_duration(
        resource_a,
        resource_b,
        LinkStage::IntermediaryResources,
        duration_c,
    );

    let mut link_data = Value::Null;
    merge_value(&mut link_data, output_a.link_data);
    merge_value(&mut link_data, output_b.link_data);
    merge_value(&mut link_data, output_c.link_data);

    let result = LinkDeployResult {
        link_data,
        intermediary_resource_states: output_c.intermediary_resource_states,
    };
    state.set_link_result(resource_a, resource_b, result.clone());

    let final_status = determine_link_status(kind, Phase::Completed, rollback);
    let final_precise =
        determine_precise_link_status(LinkStage::IntermediaryResources, StagePhase::Completed, rollback);
    let total_durations = LinkEventDurations::new(Some(duration_a), Some(duration_b), Some(duration_c));
    emit_link_event(
        senders,
        instance_id,
        resource_a,
        resource_b,
        final_status,
        final_precise,
        0,
        false,
        None,
        total_durations,
    )
    .await;

    info!(resource_a, resource_b, ?final_status, "link pipeline completed");
    LinkOutcome::Completed(result)
}
