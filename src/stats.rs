//! Ledger statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-ledger counters
#[allow(missing_docs)]
pub struct LedgerStats {
    pub records_added: AtomicU64,
    pub append_conflicts: AtomicU64,
    pub runs_started: AtomicU64,
    pub runs_completed: AtomicU64,
    pub runs_failed: AtomicU64,
    pub actions_invoked: AtomicU64,
    pub actions_failed: AtomicU64,
    pub entries_removed: AtomicU64,
    pub containers_compacted: AtomicU64,
}

impl LedgerStats {
    /// All counters at zero
    pub fn new() -> Self {
        Self {
            records_added: AtomicU64::new(0),
            append_conflicts: AtomicU64::new(0),
            runs_started: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            actions_invoked: AtomicU64::new(0),
            actions_failed: AtomicU64::new(0),
            entries_removed: AtomicU64::new(0),
            containers_compacted: AtomicU64::new(0),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read every counter
    pub fn snapshot(&self) -> LedgerStatsSnapshot {
        LedgerStatsSnapshot {
            records_added: self.records_added.load(Ordering::Relaxed),
            append_conflicts: self.append_conflicts.load(Ordering::Relaxed),
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            actions_invoked: self.actions_invoked.load(Ordering::Relaxed),
            actions_failed: self.actions_failed.load(Ordering::Relaxed),
            entries_removed: self.entries_removed.load(Ordering::Relaxed),
            containers_compacted: self.containers_compacted.load(Ordering::Relaxed),
        }
    }
}

impl Default for LedgerStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`LedgerStats`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct LedgerStatsSnapshot {
    pub records_added: u64,
    pub append_conflicts: u64,
    pub runs_started: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub actions_invoked: u64,
    pub actions_failed: u64,
    pub entries_removed: u64,
    pub containers_compacted: u64,
}
