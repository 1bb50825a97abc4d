//! Error types for the deployment core.

use thiserror::Error;

/// Errors that can cross the core/external-collaborator boundary: state
/// store I/O, and the planning failures listed in spec.md §7 (category 3).
/// Provider-level retryable/terminal failures never appear here — those are
/// folded into element status events, never propagated as `Error`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("resource to be removed has dependents: {resource} (depended on by {dependents:?})")]
    ResourceToBeRemovedHasDependents {
        resource: String,
        dependents: Vec<String>,
    },

    #[error("child blueprint to be removed has dependents: {child} (depended on by {dependents:?})")]
    ChildToBeRemovedHasDependents {
        child: String,
        dependents: Vec<String>,
    },

    #[error("missing resource changes for {0}")]
    MissingResourceChanges(String),

    #[error("missing partially resolved resource for {0}")]
    MissingPartiallyResolvedResource(String),

    #[error("missing provider for resource type {0}")]
    MissingProvider(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
