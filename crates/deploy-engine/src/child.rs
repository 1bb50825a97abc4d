//! Child Executor (C6): recursively invokes the Orchestrator on a nested
//! blueprint, forwarding inner events upward (spec.md §4.6).
//!
//! Lives alongside the Orchestrator rather than in its own crate because the
//! recursive call would otherwise create a crate cycle (SPEC_FULL.md §2).

use std::sync::Arc;

use serde_json::Value;
use tracing::instrument;

use deploy_core::changeset::ChangeSet;
use deploy_core::status::ChildStatus;
use deploy_core::ResourceId;

use crate::bus::{channel, EventSenders};
use crate::events::{ChildUpdateMessage, Event};
use crate::orchestrator::{self, DeployInput, OrchestratorContext};

/// Parent-to-child context carried across the recursive call (spec.md §4.6):
/// parent instance id, ancestor tree path (cycle detection), include tree
/// path (sibling-include uniqueness), and inherited parameters layered under
/// child-specific overrides.
#[derive(Debug, Clone, Default)]
pub struct ChildContext {
    pub tree_path: Vec<ResourceId>,
    pub include_path: Vec<String>,
    pub inherited_params: Value,
    pub overrides: Value,
}

impl ChildContext {
    /// Inherited parameters with child-specific overrides layered on top
    /// (spec.md §4.6). Shallow-merges object fields; a non-object override
    /// replaces the inherited value outright.
    pub fn resolved_params(&self) -> Value {
        let mut merged = self.inherited_params.clone();
        match (&mut merged, &self.overrides) {
            (Value::Object(base), Value::Object(over)) => {
                for (k, v) in over {
                    base.insert(k.clone(), v.clone());
                }
            }
            (_, over) if !over.is_null() => merged = over.clone(),
            _ => {}
        }
        merged
    }
}

/// Whether the nested run should deploy or destroy the child blueprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildMode {
    Deploy,
    Destroy,
}

pub enum ChildOutcome {
    /// The nested run reached a terminal status; carries the child's own
    /// instance id so the caller can attach it (spec.md §4.6, §7).
    Completed(ChildStatus, ResourceId),
    Fatal,
}

/// Run a nested blueprint instance to completion, forwarding every inner
/// event upward as a `ChildUpdateMessage`: inner `DeploymentUpdate` and
/// `Finish` become outer `ChildUpdate`s, inner resource/link/child updates
/// pass through unchanged (spec.md §4.6). Spawns a fresh channel set
/// (intermediary channels) for the nested run and drains it itself so the
/// caller only ever observes the wrapped events.
#[instrument(skip(orchestrator_ctx, changes, external, parent))]
#[allow(clippy::too_many_arguments)]
pub async fn run_child(
    orchestrator_ctx: Arc<OrchestratorContext>,
    outer_instance_id: ResourceId,
    child_instance_id: Option<ResourceId>,
    child_name: &str,
    changes: ChangeSet,
    rollback: bool,
    mode: ChildMode,
    parent: &ChildContext,
    external: &EventSenders,
) -> ChildOutcome {
    let (inner_tx, mut inner_rx) = channel();

    let mut tree_path = parent.tree_path.clone();
    tree_path.push(child_instance_id.unwrap_or_else(ResourceId::new));
    let mut include_path = parent.include_path.clone();
    include_path.push(child_name.to_string());

    let groups = changes.groups.clone();
    let partially_resolved_resources = changes.partially_resolved_resources.clone();

    let input = DeployInput {
        instance_id: child_instance_id,
        changes,
        rollback,
        groups,
        tree_path,
        include_path,
        partially_resolved_resources,
    };

    let handle = match mode {
        ChildMode::Deploy => orchestrator::deploy(orchestrator_ctx, input, inner_tx),
        ChildMode::Destroy => orchestrator::destroy(orchestrator_ctx, input, inner_tx),
    };

    let mut final_status = None;

    loop {
        tokio::select! {
            Some(msg) = inner_rx.resource_update.recv() => {
                forward(external, outer_instance_id, child_name, Event::ResourceUpdate(msg)).await;
            }
            Some(msg) = inner_rx.link_update.recv() => {
                forward(external, outer_instance_id, child_name, Event::LinkUpdate(msg)).await;
            }
            Some(msg) = inner_rx.child_update.recv() => {
                forward(external, outer_instance_id, child_name, Event::ChildUpdate(msg)).await;
            }
            Some(msg) = inner_rx.deployment_update.recv() => {
                forward(external, outer_instance_id, child_name, Event::DeploymentUpdate(msg)).await;
            }
            Some(msg) = inner_rx.finish.recv() => {
                final_status = Some((msg.status, msg.instance_id));
                forward(external, outer_instance_id, child_name, Event::Finish(msg)).await;
            }
            Some(err) = inner_rx.err.recv() => {
                let _ = external.err.send(err).await;
                return ChildOutcome::Fatal;
            }
            else => break,
        }

        if final_status.is_some() {
            break;
        }
    }

    let _ = handle.await;

    match final_status {
        Some((status, id)) => ChildOutcome::Completed(status, id),
        None => ChildOutcome::Fatal,
    }
}

async fn forward(external: &EventSenders, instance_id: ResourceId, child_name: &str, event: Event) {
    let message = ChildUpdateMessage {
        instance_id,
        child_name: child_name.to_string(),
        event: Box::new(event),
    };
    let _ = external.child_update.send(message).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolved_params_layers_overrides_over_inherited() {
        let ctx = ChildContext {
            inherited_params: json!({"region": "us-east-1", "size": "small"}),
            overrides: json!({"size": "large"}),
            ..Default::default()
        };
        assert_eq!(
            ctx.resolved_params(),
            json!({"region": "us-east-1", "size": "large"})
        );
    }

    #[test]
    fn resolved_params_with_no_overrides_is_just_inherited() {
        let ctx = ChildContext {
            inherited_params: json!({"region": "us-east-1"}),
            ..Default::default()
        };
        assert_eq!(ctx.resolved_params(), json!({"region": "us-east-1"}));
    }
}
