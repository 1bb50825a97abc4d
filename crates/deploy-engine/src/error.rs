//! Fatal errors surfaced on `ErrChan` (spec.md §7, category 4 and 5).
//!
//! Retryable/terminal provider failures and planning failures never become
//! one of these — they are folded into element or finish events instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("blueprint instance tree depth exceeded maximum of {max}")]
    DepthExceeded { max: usize },

    #[error("deployment cancelled")]
    Cancelled,

    #[error("state store error: {0}")]
    StateStore(#[from] deploy_core::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
