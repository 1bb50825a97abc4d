//! The blueprint deployment engine: orchestrator, planners, executors, event
//! bus, ephemeral state, and the status algebra (spec.md §2 workspace layout).
//!
//! Lives in one crate rather than split along component boundaries because
//! the Child Executor (C6) recursively calls back into the Orchestrator (C1)
//! — splitting them would create a crate dependency cycle.

pub mod bus;
pub mod child;
pub mod error;
pub mod events;
pub mod link;
pub mod orchestrator;
pub mod planner;
pub mod removal;
pub mod resource;
pub mod state;
pub mod status_algebra;
pub mod telemetry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Error, Result};
pub use orchestrator::{deploy, destroy, DeployInput, OrchestratorContext};
