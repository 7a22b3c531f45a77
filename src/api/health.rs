//! Shared health state for the /health endpoint.
//! Updated by DbWriter and DeadlineSweeper.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared health metrics. Updated by tracker components, read by API.
#[derive(Default)]
pub struct HealthState {
    /// Count of tracker events persisted by the DB writer.
    pub events_written: AtomicU64,
    /// Count of failed DB writes.
    pub db_errors: AtomicU64,
    /// Nanosecond timestamp of the last sweeper pass (0 = none yet).
    pub last_sweep_at_ns: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_events_written(&self) {
        self.events_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_db_errors(&self) {
        self.db_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_last_sweep_at_ns(&self, ns: u64) {
        self.last_sweep_at_ns.store(ns, Ordering::Relaxed);
    }

    pub fn events_written(&self) -> u64 {
        self.events_written.load(Ordering::Relaxed)
    }

    pub fn db_errors(&self) -> u64 {
        self.db_errors.load(Ordering::Relaxed)
    }

    pub fn last_sweep_at_ns(&self) -> u64 {
        self.last_sweep_at_ns.load(Ordering::Relaxed)
    }
}
