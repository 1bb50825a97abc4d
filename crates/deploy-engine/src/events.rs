//! The five event message shapes and their shared JSON envelope (spec.md §6).
//!
//! Timestamps are unix seconds; durations are fractional milliseconds, both
//! per spec.md's "Event stream (produced)" section.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use deploy_core::status::{
    InstanceStatus, LinkStatus, PreciseLinkStatus, PreciseResourceStatus, ResourceStatus,
};
use deploy_core::ResourceId;

fn duration_to_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn opt_duration_to_ms(d: Option<Duration>) -> Option<f64> {
    d.map(duration_to_ms)
}

/// Per-resource duration breakdown carried on a resource update event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEventDurations {
    pub config_complete_ms: Option<f64>,
    pub stabilising_ms: Option<f64>,
    pub total_ms: f64,
}

impl ResourceEventDurations {
    pub fn new(config_complete: Option<Duration>, stabilising: Option<Duration>) -> Self {
        let total = config_complete.unwrap_or_default() + stabilising.unwrap_or_default();
        Self {
            config_complete_ms: opt_duration_to_ms(config_complete),
            stabilising_ms: opt_duration_to_ms(stabilising),
            total_ms: duration_to_ms(total),
        }
    }
}

/// Per-link duration breakdown, summing only the stages that actually ran
/// (DESIGN.md Open Question #2 — never assume all three stages ran).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkEventDurations {
    pub resource_a_update_ms: Option<f64>,
    pub resource_b_update_ms: Option<f64>,
    pub intermediary_resources_ms: Option<f64>,
    pub total_ms: f64,
}

impl LinkEventDurations {
    pub fn new(
        resource_a_update: Option<Duration>,
        resource_b_update: Option<Duration>,
        intermediary_resources: Option<Duration>,
    ) -> Self {
        let total = resource_a_update.unwrap_or_default()
            + resource_b_update.unwrap_or_default()
            + intermediary_resources.unwrap_or_default();
        Self {
            resource_a_update_ms: opt_duration_to_ms(resource_a_update),
            resource_b_update_ms: opt_duration_to_ms(resource_b_update),
            intermediary_resources_ms: opt_duration_to_ms(intermediary_resources),
            total_ms: duration_to_ms(total),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUpdateMessage {
    pub instance_id: ResourceId,
    pub resource_name: String,
    pub status: ResourceStatus,
    pub precise_status: PreciseResourceStatus,
    pub attempt: u32,
    pub can_retry: bool,
    pub reason: Option<String>,
    pub durations: ResourceEventDurations,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkUpdateMessage {
    pub instance_id: ResourceId,
    pub resource_a: String,
    pub resource_b: String,
    pub status: LinkStatus,
    pub precise_status: PreciseLinkStatus,
    pub can_retry_current_stage: bool,
    pub reason: Option<String>,
    pub durations: LinkEventDurations,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildUpdateMessage {
    pub instance_id: ResourceId,
    pub child_name: String,
    /// The forwarded inner event, unmodified except for this wrapping
    /// (spec.md §4.6: "inner resource/link/child updates pass through
    /// unchanged").
    pub event: Box<Event>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentUpdateMessage {
    pub instance_id: ResourceId,
    pub status: InstanceStatus,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishMessage {
    pub instance_id: ResourceId,
    pub status: InstanceStatus,
    pub failure_reasons: Vec<String>,
    pub timestamp: i64,
}

/// The shared envelope over all five event shapes: `{type, message}` with
/// `type` one of the five camelCase tags (spec.md §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "camelCase")]
pub enum Event {
    ResourceUpdate(ResourceUpdateMessage),
    LinkUpdate(LinkUpdateMessage),
    ChildUpdate(ChildUpdateMessage),
    DeploymentUpdate(DeploymentUpdateMessage),
    Finish(FinishMessage),
}

impl Event {
    pub fn instance_id(&self) -> ResourceId {
        match self {
            Event::ResourceUpdate(m) => m.instance_id,
            Event::LinkUpdate(m) => m.instance_id,
            Event::ChildUpdate(m) => m.instance_id,
            Event::DeploymentUpdate(m) => m.instance_id,
            Event::Finish(m) => m.instance_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_resource_update() -> ResourceUpdateMessage {
        ResourceUpdateMessage {
            instance_id: ResourceId::new(),
            resource_name: "save_order_function".to_string(),
            status: ResourceStatus::Created,
            precise_status: PreciseResourceStatus::Created,
            attempt: 0,
            can_retry: false,
            reason: None,
            durations: ResourceEventDurations::new(
                Some(Duration::from_millis(200)),
                Some(Duration::from_millis(10_000)),
            ),
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn resource_update_round_trips_through_json() {
        let event = Event::ResourceUpdate(sample_resource_update());
        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn envelope_tags_resource_update_with_camel_case_type() {
        let event = Event::ResourceUpdate(sample_resource_update());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "resourceUpdate");
        assert!(json["message"].is_object());
    }

    #[test]
    fn link_update_round_trips_through_json() {
        let event = Event::LinkUpdate(LinkUpdateMessage {
            instance_id: ResourceId::new(),
            resource_a: "save_order_function".to_string(),
            resource_b: "orders_table".to_string(),
            status: LinkStatus::Destroyed,
            precise_status: PreciseLinkStatus::IntermediaryResourcesUpdated,
            can_retry_current_stage: false,
            reason: None,
            durations: LinkEventDurations::new(
                Some(Duration::from_millis(50)),
                Some(Duration::from_millis(50)),
                None,
            ),
            timestamp: 1_700_000_001,
        });
        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn child_update_round_trips_nested_event() {
        let inner = Event::ResourceUpdate(sample_resource_update());
        let event = Event::ChildUpdate(ChildUpdateMessage {
            instance_id: ResourceId::new(),
            child_name: "database".to_string(),
            event: Box::new(inner),
        });
        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn deployment_update_and_finish_round_trip() {
        let instance_id = ResourceId::new();
        let deployment_update = Event::DeploymentUpdate(DeploymentUpdateMessage {
            instance_id,
            status: InstanceStatus::Deploying,
            timestamp: 1_700_000_002,
        });
        let finish = Event::Finish(FinishMessage {
            instance_id,
            status: InstanceStatus::Deployed,
            failure_reasons: vec![],
            timestamp: 1_700_000_003,
        });
        for event in [deployment_update, finish] {
            let json = serde_json::to_string(&event).unwrap();
            let parsed: Event = serde_json::from_str(&json).unwrap();
            assert_eq!(event, parsed);
        }
    }

    #[test]
    fn link_durations_sum_zero_when_no_stage_ran() {
        let durations = LinkEventDurations::new(None, None, None);
        assert_eq!(durations.total_ms, 0.0);
    }
}
