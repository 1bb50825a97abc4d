//! Ephemeral, process-local deployment state (spec.md §3, §5).
//!
//! The only in-process shared resource besides the event bus. All mutation
//! goes through this type's narrow setter API under a single mutex whose
//! critical sections are O(1); every read returns an owned clone so callers
//! can never alias into the shared structure, covering the full set of
//! tracking maps spec.md §3 describes.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use deploy_core::node::ElementKey;
use deploy_core::status::LinkStage;

use crate::link::LinkDeployResult;

/// Which of the five mutually exclusive tracking sets an element currently
/// occupies. `None` means the element hasn't started yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementStage {
    InProgress,
    ConfigComplete,
    Created,
    Updated,
    Destroyed,
}

/// Resolved resource data cached after late resolution / after a successful
/// deploy call, keyed by logical resource name. Written at most once per
/// attempt (spec.md §9: "cache... each entry is written at most once per
/// run during late resolution").
#[derive(Debug, Clone, Default)]
pub struct ResolvedResourceData {
    pub spec: Value,
    pub metadata: Value,
}

/// Per-resource accumulated duration breakdown.
#[derive(Debug, Clone, Default)]
pub struct ResourceDurations {
    pub config_complete: Option<Duration>,
    pub stabilising: Option<Duration>,
    pub attempt_durations: Vec<Duration>,
}

impl ResourceDurations {
    pub fn total(&self) -> Duration {
        self.config_complete.unwrap_or_default() + self.stabilising.unwrap_or_default()
    }
}

/// Per-link accumulated duration breakdown (spec.md §4.5, §9 Open Question
/// #2: sums only the stages that actually ran, never dereferencing an
/// absent total).
#[derive(Debug, Clone, Default)]
pub struct LinkCompletionDurations {
    pub resource_a_update: Option<Duration>,
    pub resource_b_update: Option<Duration>,
    pub intermediary_resources: Option<Duration>,
}

impl LinkCompletionDurations {
    pub fn total(&self) -> Duration {
        self.resource_a_update.unwrap_or_default()
            + self.resource_b_update.unwrap_or_default()
            + self.intermediary_resources.unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct Inner {
    in_progress: HashSet<ElementKey>,
    config_complete: HashSet<ElementKey>,
    created: HashSet<ElementKey>,
    updated: HashSet<ElementKey>,
    destroyed: HashSet<ElementKey>,
    deployment_started: HashSet<ElementKey>,

    resource_data: HashMap<String, ResolvedResourceData>,
    link_deployment_results: HashMap<(String, String), LinkDeployResult>,
    resource_durations: HashMap<String, ResourceDurations>,
    link_durations: HashMap<(String, String), LinkCompletionDurations>,

    /// Pending links keyed by the resource name they're waiting on.
    pending_links_by_resource: HashMap<String, Vec<(String, String)>>,

    prepare_duration: Option<Duration>,
}

/// The ephemeral, mutex-guarded state for a single deployment run.
pub struct DeploymentState {
    inner: Mutex<Inner>,
}

impl Default for DeploymentState {
    fn default() -> Self {
        Self::new()
    }
}

impl DeploymentState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Atomically move `key` into `stage`, removing it from whichever of
    /// the mutually exclusive sets it previously occupied. This is the only
    /// way an element's tracking-set membership changes, which is what
    /// keeps the "at most one of {inProgress, configComplete, created,
    /// updated, destroyed}" invariant true by construction.
    pub fn transition(&self, key: ElementKey, stage: ElementStage) {
        let mut inner = self.inner.lock().expect("deployment state mutex poisoned");
        inner.in_progress.remove(&key);
        inner.config_complete.remove(&key);
        inner.created.remove(&key);
        inner.updated.remove(&key);
        inner.destroyed.remove(&key);
        match stage {
            ElementStage::InProgress => {
                inner.in_progress.insert(key.clone());
            }
            ElementStage::ConfigComplete => {
                // ConfigComplete is an overlay on top of in-progress, not a
                // replacement for it — a resource is still "in progress"
                // while its dependency stabilises.
                inner.in_progress.insert(key.clone());
                inner.config_complete.insert(key.clone());
            }
            ElementStage::Created => {
                inner.created.insert(key.clone());
            }
            ElementStage::Updated => {
                inner.updated.insert(key.clone());
            }
            ElementStage::Destroyed => {
                inner.destroyed.insert(key.clone());
            }
        }
    }

    /// Remove `key` from every tracking set (used for terminal failure,
    /// where the element is no longer "in progress" but also didn't reach
    /// any success set).
    pub fn clear(&self, key: &ElementKey) {
        let mut inner = self.inner.lock().expect("deployment state mutex poisoned");
        inner.in_progress.remove(key);
        inner.config_complete.remove(key);
        inner.created.remove(key);
        inner.updated.remove(key);
        inner.destroyed.remove(key);
    }

    /// Set-once guard: returns `true` the first time it's called for `key`
    /// for the lifetime of this run, `false` on every subsequent call. This
    /// is `CheckUpdateElementDeploymentStarted` from spec.md §4.4 — the
    /// atomic guard that ensures an element is spawned at most once even
    /// when multiple dependencies converge concurrently.
    pub fn check_and_set_deployment_started(&self, key: &ElementKey) -> bool {
        let mut inner = self.inner.lock().expect("deployment state mutex poisoned");
        if inner.deployment_started.contains(key) {
            false
        } else {
            inner.deployment_started.insert(key.clone());
            true
        }
    }

    pub fn is_in_progress(&self, key: &ElementKey) -> bool {
        let inner = self.inner.lock().expect("deployment state mutex poisoned");
        inner.in_progress.contains(key)
    }

    pub fn is_config_complete(&self, key: &ElementKey) -> bool {
        let inner = self.inner.lock().expect("deployment state mutex poisoned");
        inner.config_complete.contains(key)
    }

    pub fn is_stable(&self, key: &ElementKey) -> bool {
        let inner = self.inner.lock().expect("deployment state mutex poisoned");
        (inner.created.contains(key) || inner.updated.contains(key))
            && !inner.in_progress.contains(key)
    }

    pub fn is_created_or_updated(&self, key: &ElementKey) -> bool {
        let inner = self.inner.lock().expect("deployment state mutex poisoned");
        inner.created.contains(key) || inner.updated.contains(key)
    }

    pub fn set_resource_data(&self, resource_name: &str, data: ResolvedResourceData) {
        let mut inner = self.inner.lock().expect("deployment state mutex poisoned");
        inner.resource_data.insert(resource_name.to_string(), data);
    }

    pub fn resource_data(&self, resource_name: &str) -> Option<ResolvedResourceData> {
        let inner = self.inner.lock().expect("deployment state mutex poisoned");
        inner.resource_data.get(resource_name).cloned()
    }

    pub fn set_link_result(&self, a: &str, b: &str, result: LinkDeployResult) {
        let mut inner = self.inner.lock().expect("deployment state mutex poisoned");
        inner
            .link_deployment_results
            .insert((a.to_string(), b.to_string()), result);
    }

    pub fn link_result(&self, a: &str, b: &str) -> Option<LinkDeployResult> {
        let inner = self.inner.lock().expect("deployment state mutex poisoned");
        inner
            .link_deployment_results
            .get(&(a.to_string(), b.to_string()))
            .cloned()
    }

    pub fn push_resource_attempt_duration(&self, resource_name: &str, duration: Duration) {
        let mut inner = self.inner.lock().expect("deployment state mutex poisoned");
        inner
            .resource_durations
            .entry(resource_name.to_string())
            .or_default()
            .attempt_durations
            .push(duration);
    }

    pub fn set_resource_config_complete_duration(&self, resource_name: &str, duration: Duration) {
        let mut inner = self.inner.lock().expect("deployment state mutex poisoned");
        inner
            .resource_durations
            .entry(resource_name.to_string())
            .or_default()
            .config_complete = Some(duration);
    }

    pub fn set_resource_stabilising_duration(&self, resource_name: &str, duration: Duration) {
        let mut inner = self.inner.lock().expect("deployment state mutex poisoned");
        inner
            .resource_durations
            .entry(resource_name.to_string())
            .or_default()
            .stabilising = Some(duration);
    }

    pub fn resource_durations(&self, resource_name: &str) -> ResourceDurations {
        let inner = self.inner.lock().expect("deployment state mutex poisoned");
        inner
            .resource_durations
            .get(resource_name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_link_stage_duration(&self, a: &str, b: &str, stage: LinkStage, duration: Duration) {
        let mut inner = self.inner.lock().expect("deployment state mutex poisoned");
        let entry = inner
            .link_durations
            .entry((a.to_string(), b.to_string()))
            .or_default();
        match stage {
            LinkStage::ResourceA => entry.resource_a_update = Some(duration),
            LinkStage::ResourceB => entry.resource_b_update = Some(duration),
            LinkStage::IntermediaryResources => entry.intermediary_resources = Some(duration),
        }
    }

    pub fn link_durations(&self, a: &str, b: &str) -> LinkCompletionDurations {
        let inner = self.inner.lock().expect("deployment state mutex poisoned");
        inner
            .link_durations
            .get(&(a.to_string(), b.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Write the prepare-phase duration. Invariant: written at most once,
    /// before any element enters `inProgress` (spec.md §3). Returns `false`
    /// (no-op) if already set.
    pub fn set_prepare_duration(&self, duration: Duration) -> bool {
        let mut inner = self.inner.lock().expect("deployment state mutex poisoned");
        if inner.prepare_duration.is_some() {
            return false;
        }
        inner.prepare_duration = Some(duration);
        true
    }

    pub fn prepare_duration(&self) -> Option<Duration> {
        let inner = self.inner.lock().expect("deployment state mutex poisoned");
        inner.prepare_duration
    }

    /// Register a pending link, waiting on both `resource_a` and
    /// `resource_b` to reach created/updated (spec.md §4.5 "pending-link
    /// gate").
    pub fn register_pending_link(&self, resource_a: &str, resource_b: &str) {
        let mut inner = self.inner.lock().expect("deployment state mutex poisoned");
        for resource in [resource_a, resource_b] {
            inner
                .pending_links_by_resource
                .entry(resource.to_string())
                .or_default()
                .push((resource_a.to_string(), resource_b.to_string()));
        }
    }

    /// Called when `resource_name` finishes (reaches created/updated).
    /// Returns the subset of pending links now unblocked (both endpoints
    /// stable) — `UpdateLinkDeploymentState` from spec.md §4.5.
    pub fn update_link_deployment_state(&self, resource_name: &str) -> Vec<(String, String)> {
        let inner = self.inner.lock().expect("deployment state mutex poisoned");
        let Some(candidates) = inner.pending_links_by_resource.get(resource_name) else {
            return Vec::new();
        };
        candidates
            .iter()
            .filter(|(a, b)| {
                let a_key = ElementKey::Resource(a.clone());
                let b_key = ElementKey::Resource(b.clone());
                (inner.created.contains(&a_key) || inner.updated.contains(&a_key))
                    && (inner.created.contains(&b_key) || inner.updated.contains(&b_key))
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_keeps_sets_mutually_exclusive() {
        let state = DeploymentState::new();
        let key = ElementKey::Resource("orders_table".to_string());

        state.transition(key.clone(), ElementStage::InProgress);
        assert!(state.is_in_progress(&key));

        state.transition(key.clone(), ElementStage::Created);
        assert!(!state.is_in_progress(&key));
        assert!(state.is_created_or_updated(&key));
    }

    #[test]
    fn deployment_started_guard_is_set_once() {
        let state = DeploymentState::new();
        let key = ElementKey::Resource("save_order_function".to_string());
        assert!(state.check_and_set_deployment_started(&key));
        assert!(!state.check_and_set_deployment_started(&key));
    }

    #[test]
    fn prepare_duration_is_written_once() {
        let state = DeploymentState::new();
        assert!(state.set_prepare_duration(Duration::from_millis(10)));
        assert!(!state.set_prepare_duration(Duration::from_millis(20)));
        assert_eq!(state.prepare_duration(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn link_completion_durations_zero_for_missing_stages() {
        let durations = LinkCompletionDurations::default();
        assert_eq!(durations.total(), Duration::ZERO);
    }

    #[test]
    fn pending_link_unblocks_only_when_both_endpoints_stable() {
        let state = DeploymentState::new();
        state.register_pending_link("save_order_function", "orders_table");

        let unblocked = state.update_link_deployment_state("save_order_function");
        assert!(unblocked.is_empty());

        state.transition(
            ElementKey::Resource("save_order_function".to_string()),
            ElementStage::Created,
        );
        let unblocked = state.update_link_deployment_state("save_order_function");
        assert!(unblocked.is_empty());

        state.transition(
            ElementKey::Resource("orders_table".to_string()),
            ElementStage::Created,
        );
        let unblocked = state.update_link_deployment_state("orders_table");
        assert_eq!(
            unblocked,
            vec![("save_order_function".to_string(), "orders_table".to_string())]
        );
    }
}
