//! The two top-level pipelines: harvest and health check.
//!
//! Both are idempotent at the run level: re-invoking either only adds,
//! updates or removes inventory entries and appends a new run record.

pub mod harvest;
pub mod health;
pub mod inventory;

pub use harvest::run_harvest;
pub use health::run_health_check;
pub use inventory::{select_random_working, RetirementPolicy};

/// Result of triggering a pipeline. Status is pollable via the run record.
#[derive(Debug, Clone, Copy)]
pub struct RunOutcome {
    pub run_id: i64,
    /// Proxies discovered (harvest) or checked (health check)
    pub processed: i64,
}
