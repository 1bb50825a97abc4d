//! Orchestrator tuning configuration (spec.md §6).
//!
//! Loaded as plain `std::env::var` reads with fallback defaults — there is
//! no dedicated settings crate for numeric tuning knobs like these.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Bounds and defaults the orchestrator consults throughout a run.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Maximum depth of the child-blueprint ancestor tree path before a
    /// deploy/destroy call is rejected fast (spec.md §4.1 precondition).
    pub max_blueprint_depth: usize,
    pub stability_polling: ResourceStabilityPollingConfig,
    pub default_retry_policy: RetryPolicy,
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceStabilityPollingConfig {
    pub polling_interval: Duration,
    pub polling_timeout: Duration,
}

impl Default for ResourceStabilityPollingConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(5),
            polling_timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_blueprint_depth: 50,
            stability_polling: ResourceStabilityPollingConfig::default(),
            default_retry_policy: RetryPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from the environment, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_blueprint_depth = std::env::var("ORCHESTRATOR_MAX_BLUEPRINT_DEPTH")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_blueprint_depth);
        let polling_interval_secs = std::env::var("ORCHESTRATOR_STABILITY_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.stability_polling.polling_interval.as_secs());
        let polling_timeout_secs = std::env::var("ORCHESTRATOR_STABILITY_POLL_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.stability_polling.polling_timeout.as_secs());

        Self {
            max_blueprint_depth,
            stability_polling: ResourceStabilityPollingConfig {
                polling_interval: Duration::from_secs(polling_interval_secs),
                polling_timeout: Duration::from_secs(polling_timeout_secs),
            },
            default_retry_policy: defaults.default_retry_policy,
        }
    }
}
