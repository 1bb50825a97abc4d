//! The event bus: six topics, one channel each (spec.md §4.7).
//!
//! Six topics are multiplexed here, each given capacity 1. spec.md §9 calls
//! for unbuffered, rendezvous-style channels providing backpressure, which
//! `tokio::sync::mpsc` cannot express exactly since it has no true
//! zero-capacity variant; capacity 1 is the closest available
//! approximation.

use tokio::sync::mpsc;

use crate::error::Error;
use crate::events::{
    ChildUpdateMessage, DeploymentUpdateMessage, FinishMessage, LinkUpdateMessage,
    ResourceUpdateMessage,
};

const TOPIC_CAPACITY: usize = 1;

/// The sending half of all six topics. Cloned and handed to every executor
/// (and, for `ChildUpdateMessage`, forwarded from a nested orchestrator run)
/// so any number of concurrently running elements can emit events.
#[derive(Clone)]
pub struct EventSenders {
    pub resource_update: mpsc::Sender<ResourceUpdateMessage>,
    pub link_update: mpsc::Sender<LinkUpdateMessage>,
    pub child_update: mpsc::Sender<ChildUpdateMessage>,
    pub deployment_update: mpsc::Sender<DeploymentUpdateMessage>,
    pub finish: mpsc::Sender<FinishMessage>,
    pub err: mpsc::Sender<Error>,
}

/// The receiving half, owned exclusively by the listen-loop that reacts to
/// and forwards these events (spec.md §5: "a single listen-loop... is the
/// only reader of per-topic channels for the current instance").
pub struct EventReceivers {
    pub resource_update: mpsc::Receiver<ResourceUpdateMessage>,
    pub link_update: mpsc::Receiver<LinkUpdateMessage>,
    pub child_update: mpsc::Receiver<ChildUpdateMessage>,
    pub deployment_update: mpsc::Receiver<DeploymentUpdateMessage>,
    pub finish: mpsc::Receiver<FinishMessage>,
    pub err: mpsc::Receiver<Error>,
}

/// Create one fresh set of six topic channels for a single deployment run.
pub fn channel() -> (EventSenders, EventReceivers) {
    let (resource_update_tx, resource_update_rx) = mpsc::channel(TOPIC_CAPACITY);
    let (link_update_tx, link_update_rx) = mpsc::channel(TOPIC_CAPACITY);
    let (child_update_tx, child_update_rx) = mpsc::channel(TOPIC_CAPACITY);
    let (deployment_update_tx, deployment_update_rx) = mpsc::channel(TOPIC_CAPACITY);
    let (finish_tx, finish_rx) = mpsc::channel(TOPIC_CAPACITY);
    let (err_tx, err_rx) = mpsc::channel(TOPIC_CAPACITY);

    (
        EventSenders {
            resource_update: resource_update_tx,
            link_update: link_update_tx,
            child_update: child_update_tx,
            deployment_update: deployment_update_tx,
            finish: finish_tx,
            err: err_tx,
        },
        EventReceivers {
            resource_update: resource_update_rx,
            link_update: link_update_rx,
            child_update: child_update_rx,
            deployment_update: deployment_update_rx,
            finish: finish_rx,
            err: err_rx,
        },
    )
}
