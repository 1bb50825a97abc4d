//! Resource Executor (C4): the single-resource state machine (spec.md §4.4).
//!
//! `Pending → Deploying → ConfigComplete → Stabilising → Deployed|Failed`.
//! One dispatch function per unit of work, with a retry loop and a
//! stability poller layered on top.

use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{info, instrument, warn};

use deploy_core::provider::{ResourceProvider, ResourceProviderInput};
use deploy_core::retry::{retry_wait_duration, RetryContext};
use deploy_core::status::{ChangeKind, PreciseResourceStatus, ResourceStatus};
use deploy_core::ResourceId;

use crate::bus::EventSenders;
use crate::events::{ResourceEventDurations, ResourceUpdateMessage};
use crate::state::{DeploymentState, ResolvedResourceData};
use crate::status_algebra::{determine_precise_resource_status, determine_resource_status, Phase};

/// Outcome of a full resource deploy attempt.
pub enum ResourceOutcome {
    Deployed { metadata: Value },
    Failed,
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

#[allow(clippy::too_many_arguments)]
async fn emit_resource_event(
    senders: &EventSenders,
    instance_id: ResourceId,
    resource_name: &str,
    status: ResourceStatus,
    precise_status: PreciseResourceStatus,
    attempt: u32,
    can_retry: bool,
    reason: Option<String>,
    durations: ResourceEventDurations,
) {
    let message = ResourceUpdateMessage {
        instance_id,
        resource_name: resource_name.to_string(),
        status,
        precise_status,
        attempt,
        can_retry,
        reason,
        durations,
        timestamp: now_unix(),
    };
    let _ = senders.resource_update.send(message).await;
}

/// Deploy a single resource end to end: retry loop, then stability polling
/// (spec.md §4.4). `kind` distinguishes create vs. update for status
/// purposes; it is never `Destroy` here (destruction is `destroy_resource`).
#[instrument(skip(provider, state, senders, spec, prior_metadata, stability))]
#[allow(clippy::too_many_arguments)]
pub async fn deploy_resource(
    instance_id: ResourceId,
    resource_name: &str,
    kind: ChangeKind,
    rollback: bool,
    spec: Value,
    prior_metadata: Option<Value>,
    provider: &dyn ResourceProvider,
    stability: ResourceStabilityPollingConfig,
    state: &DeploymentState,
    senders: &EventSenders,
) -> ResourceOutcome {
    debug_assert!(kind != ChangeKind::Destroy, "destroy goes through destroy_resource");

    let policy = provider.retry_policy().await;
    let mut retry_ctx = RetryContext::default();
    let input = ResourceProviderInput { spec, prior_metadata };

    loop {
        let starting_status = determine_resource_status(kind, Phase::Starting, rollback);
        let starting_precise = determine_precise_resource_status(kind, Phase::Starting, rollback);
        emit_resource_event(
            senders,
            instance_id,
            resource_name,
            starting_status,
            starting_precise,
            retry_ctx.attempt,
            true,
            None,
            ResourceEventDurations::default(),
        )
        .await;

        let attempt_start = Instant::now();
        let result = provider.deploy(input.clone()).await;
        let attempt_duration = attempt_start.elapsed();
        retry_ctx = retry_ctx.with_next_attempt(attempt_duration);
        state.push_resource_attempt_duration(resource_name, attempt_duration);

        match result {
            Ok(output) => {
                let mut merged_spec = input.spec.clone();
                merge_value(&mut merged_spec, output.computed_fields);
                state.set_resource_data(
                    resource_name,
                    ResolvedResourceData {
                        spec: merged_spec,
                        metadata: output.metadata.clone(),
                    },
                );

                let config_complete_status =
                    determine_resource_status(kind, Phase::ConfigComplete, rollback);
                let config_complete_precise =
                    determine_precise_resource_status(kind, Phase::ConfigComplete, rollback);
                state.set_resource_config_complete_duration(resource_name, attempt_duration);
                emit_resource_event(
                    senders,
                    instance_id,
                    resource_name,
                    config_complete_status,
                    config_complete_precise,
                    retry_ctx.attempt,
                    false,
                    None,
                    ResourceEventDurations::new(Some(attempt_duration), None),
                )
                .await;

                return poll_stability(
                    instance_id,
                    resource_name,
                    kind,
                    rollback,
                    &merged_spec,
                    &output.metadata,
                    provider,
                    stability,
                    state,
                    senders,
                    attempt_duration,
                )
                .await;
            }
            Err(err) if err.is_retryable() && retry_ctx.can_retry(&policy) => {
                warn!(resource_name, attempt = retry_ctx.attempt, reason = %err.message(), "resource deploy failed retryably");
                let failed_status = determine_resource_status(kind, Phase::Failed, rollback);
                let failed_precise = determine_precise_resource_status(kind, Phase::Failed, rollback);
                emit_resource_event(
                    senders,
                    instance_id,
                    resource_name,
                    failed_status,
                    failed_precise,
                    retry_ctx.attempt,
                    true,
                    Some(err.message().to_string()),
                    ResourceEventDurations::default(),
                )
                .await;
                tokio::time::sleep(retry_wait_duration(&policy, retry_ctx.attempt)).await;
            }
            Err(err) => {
                warn!(resource_name, reason = %err.message(), "resource deploy failed terminally");
                let failed_status = determine_resource_status(kind, Phase::Failed, rollback);
                let failed_precise = determine_precise_resource_status(kind, Phase::Failed, rollback);
                emit_resource_event(
                    senders,
                    instance_id,
                    resource_name,
                    failed_status,
                    failed_precise,
                    retry_ctx.attempt,
                    false,
                    Some(err.message().to_string()),
                    ResourceEventDurations::default(),
                )
                .await;
                return ResourceOutcome::Failed;
            }
        }
    }
}

/// Poll `HasStabilised` until it reports true or `PollingTimeout` elapses
/// (spec.md §4.4 "Stability poller").
#[allow(clippy::too_many_arguments)]
async fn poll_stability(
    instance_id: ResourceId,
    resource_name: &str,
    kind: ChangeKind,
    rollback: bool,
    spec: &Value,
    metadata: &Value,
    provider: &dyn ResourceProvider,
    stability: ResourceStabilityPollingConfig,
    state: &DeploymentState,
    senders: &EventSenders,
    config_complete_duration: Duration,
) -> ResourceOutcome {
    let poll_start = Instant::now();

    loop {
        if poll_start.elapsed() >= stability.polling_timeout {
            warn!(resource_name, "resource failed to stabilise within the configured timeout");
            let failed_status = determine_resource_status(kind, Phase::Failed, rollback);
            let failed_precise = determine_precise_resource_status(kind, Phase::Failed, rollback);
            emit_resource_event(
                senders,
                instance_id,
                resource_name,
                failed_status,
                failed_precise,
                0,
                false,
                Some("Resource failed to stabilise within the configured timeout".to_string()),
                ResourceEventDurations::new(Some(config_complete_duration), Some(poll_start.elapsed())),
            )
            .await;
            return ResourceOutcome::Failed;
        }

        match provider.has_stabilised(spec, metadata).await {
            Ok(status) if status.stabilised => {
                let stabilising_duration = poll_start.elapsed();
                state.set_resource_stabilising_duration(resource_name, stabilising_duration);
                let done_status = determine_resource_status(kind, Phase::Completed, rollback);
                let done_precise = determine_precise_resource_status(kind, Phase::Completed, rollback);
                emit_resource_event(
                    senders,
                    instance_id,
                    resource_name,
                    done_status,
                    done_precise,
                    0,
                    false,
                    None,
                    ResourceEventDurations::new(Some(config_complete_duration), Some(stabilising_duration)),
                )
                .await;
                info!(resource_name, ?done_status, "resource reached terminal success");
                return ResourceOutcome::Deployed {
                    metadata: metadata.clone(),
                };
            }
            Ok(_) => {
                tokio::time::sleep(stability.polling_interval).await;
            }
            Err(err) => {
                warn!(resource_name, reason = %err.message(), "stability check failed, retrying on next tick");
                tokio::time::sleep(stability.polling_interval).await;
            }
        }
    }
}

/// Destroy a single resource (spec.md §4.4 edge: destroy has no
/// config-complete/stabilise phases, only `Destroying → Destroyed|Failed`).
#[instrument(skip(provider, senders, spec))]
pub async fn destroy_resource(
    instance_id: ResourceId,
    resource_name: &str,
    rollback: bool,
    spec: &Value,
    provider: &dyn ResourceProvider,
    senders: &EventSenders,
) -> ResourceOutcome {
    let policy = provider.retry_policy().await;
    let mut retry_ctx = RetryContext::default();

    loop {
        let starting_status = determine_resource_status(ChangeKind::Destroy, Phase::Starting, rollback);
        let starting_precise =
            determine_precise_resource_status(ChangeKind::Destroy, Phase::Starting, rollback);
        emit_resource_event(
            senders,
            instance_id,
            resource_name,
            starting_status,
            starting_precise,
            retry_ctx.attempt,
            true,
            None,
            ResourceEventDurations::default(),
        )
        .await;

        let attempt_start = Instant::now();
        let result = provider.destroy(spec).await;
        let attempt_duration = attempt_start.elapsed();
        retry_ctx = retry_ctx.with_next_attempt(attempt_duration);

        match result {
            Ok(()) => {
                let done_status = determine_resource_status(ChangeKind::Destroy, Phase::Completed, rollback);
                let done_precise =
                    determine_precise_resource_status(ChangeKind::Destroy, Phase::Completed, rollback);
                emit_resource_event(
                    senders,
                    instance_id,
                    resource_name,
                    done_status,
                    done_precise,
                    retry_ctx.attempt,
                    false,
                    None,
                    ResourceEventDurations::new(Some(attempt_duration), None),
                )
                .await;
                return ResourceOutcome::Deployed {
                    metadata: Value::Null,
                };
            }
            Err(err) if err.is_retryable() && retry_ctx.can_retry(&policy) => {
                let failed_status = determine_resource_status(ChangeKind::Destroy, Phase::Failed, rollback);
                let failed_precise =
                    determine_precise_resource_status(ChangeKind::Destroy, Phase::Failed, rollback);
                emit_resource_event(
                    senders,
                    instance_id,
                    resource_name,
                    failed_status,
                    failed_precise,
                    retry_ctx.attempt,
                    true,
                    Some(err.message().to_string()),
                    ResourceEventDurations::default(),
                )
                .await;
                tokio::time::sleep(retry_wait_duration(&policy, retry_ctx.attempt)).await;
            }
            Err(err) => {
                let failed_status = determine_resource_status(ChangeKind::Destroy, Phase::Failed, rollback);
                let failed_precise =
                    determine_precise_resource_status(ChangeKind::Destroy, Phase::Failed, rollback);
                emit_resource_event(
                    senders,
                    instance_id,
                    resource_name,
                    failed_status,
                    failed_precise,
                    retry_ctx.attempt,
                    false,
                    Some(err.message().to_string()),
                    ResourceEventDurations::default(),
                )
                .await;
                return ResourceOutcome::Failed;
            }
        }
    }
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

pub use deploy_core::config::ResourceStabilityPollingConfig;
