use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of [`ThunkStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ThunkStatsSnapshot {
    pub calls_dispatched: u64,
    pub coverage_defects: u64,
    pub mirrors_bound: u64,
    pub teardowns: u64,
    pub legacy_capability_failures: u64,
}

/// Host-side counters, updated from whichever thread is making the call.
#[derive(Debug, Default)]
pub struct ThunkStats {
    calls_dispatched: AtomicU64,
    coverage_defects: AtomicU64,
    mirrors_bound: AtomicU64,
    teardowns: AtomicU64,
    legacy_capability_failures: AtomicU64,
}

impl ThunkStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_calls_dispatched(&self) {
        self.calls_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_coverage_defects(&self) {
        self.coverage_defects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_mirrors_bound(&self) {
        self.mirrors_bound.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_teardowns(&self) {
        self.teardowns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_legacy_capability_failures(&self) {
        self.legacy_capability_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ThunkStatsSnapshot {
        ThunkStatsSnapshot {
            calls_dispatched: self.calls_dispatched.load(Ordering::Relaxed),
            coverage_defects: self.coverage_defects.load(Ordering::Relaxed),
            mirrors_bound: self.mirrors_bound.load(Ordering::Relaxed),
            teardowns: self.teardowns.load(Ordering::Relaxed),
            legacy_capability_failures: self.legacy_capability_failures.load(Ordering::Relaxed),
        }
    }
}
