//! Clock and id-generator utilities.
//!
//! Both are external collaborators per spec.md §1: the core only depends on
//! the trait, never a concrete wall-clock source, so executors stay
//! deterministic and testable.

use chrono::{DateTime, Utc};

use crate::id::ResourceId;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Generator of new resource identifiers.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> ResourceId;
}

/// Default `Clock` backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Default `IdGenerator` backed by UUIDv7.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidV7Generator;

impl IdGenerator for UuidV7Generator {
    fn generate(&self) -> ResourceId {
        ResourceId::new()
    }
}
