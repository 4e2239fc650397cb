use std::sync::atomic::{AtomicU64, Ordering};

use crate::task::TaskResult;

/// Point-in-time counters for a coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub submitted: u64,
    /// Tasks the dispatcher ran through the instance state machine.
    pub executed: u64,
    pub failed: u64,
    /// Tasks rejected because no session was open (or the engine was suspended).
    pub discarded: u64,
    pub timeouts: u64,
    pub queue_len: usize,
    /// Work-memory regions held by open instances.
    pub regions_in_use: usize,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    submitted: AtomicU64,
    executed: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn executed(&self, result: &TaskResult) {
        self.executed.fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(
        &self,
        timeouts: u64,
        queue_len: usize,
        regions_in_use: usize,
    ) -> CoordinatorStats {
        CoordinatorStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            timeouts,
            queue_len,
            regions_in_use,
        }
    }
}
