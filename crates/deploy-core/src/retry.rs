//! Retry policy and backoff calculation (spec.md §6, §9).

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A provider's retry policy, as returned by `Provider::retry_policy`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub factor: f64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // Spec.md leaves the concrete default unspecified; see
        // DESIGN.md "Open Question resolutions" #4 for the rationale.
        Self {
            max_retries: 3,
            base_backoff_ms: 500,
            factor: 2.0,
            jitter: 0.2,
        }
    }
}

/// Canonical exponential-with-jitter wait time calculation. `attempt` is
/// 1-based (the wait before the Nth retry).
pub fn calculate_retry_wait_time_ms(policy: &RetryPolicy, attempt: u32) -> u64 {
    let exp = policy.base_backoff_ms as f64 * policy.factor.powi(attempt.saturating_sub(1) as i32);
    let jitter_span = exp * policy.jitter;
    let jittered = exp + rand::thread_rng().gen_range(-jitter_span..=jitter_span);
    jittered.max(0.0).round() as u64
}

pub fn retry_wait_duration(policy: &RetryPolicy, attempt: u32) -> Duration {
    Duration::from_millis(calculate_retry_wait_time_ms(policy, attempt))
}

/// Per-attempt retry bookkeeping for one executor stage (spec.md §9:
/// "a plain record `RetryContext`... `WithNextAttempt` returns an updated
/// record; immutability simplifies reasoning").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryContext {
    pub attempt: u32,
    pub attempt_durations: Vec<Duration>,
    pub exceeded_max_retries: bool,
}

impl RetryContext {
    pub fn with_next_attempt(&self, duration: Duration) -> Self {
        let mut durations = self.attempt_durations.clone();
        durations.push(duration);
        Self {
            attempt: self.attempt + 1,
            attempt_durations: durations,
            exceeded_max_retries: self.exceeded_max_retries,
        }
    }

    pub fn can_retry(&self, policy: &RetryPolicy) -> bool {
        self.attempt < policy.max_retries
    }
}
