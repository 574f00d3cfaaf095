//! Ledger observer trait

use crate::{Address, ActionError};

/// Observer trait for external observability
pub trait LedgerObserver: Send + Sync + 'static {
    /// A record was stored
    fn on_record_added(&self, address: &Address, action: &str);
    /// An optimistic write lost to a concurrent writer
    fn on_append_conflict(&self, address: &Address, attempt: u32);
    /// Actions are about to be invoked
    fn on_run_started(&self, address: &Address, records: usize);
    /// Every action succeeded and the entry was deleted
    fn on_run_completed(&self, address: &Address, records: usize, duration_millis: u64);
    /// An action failed
    fn on_run_failed(&self, address: &Address, action: &str, error: &ActionError);
    /// `remove` finished
    fn on_entry_removed(&self, address: &Address, removed: u64);
    /// An empty container key was deleted
    fn on_container_compacted(&self, address: &Address);
}

/// No-op observer
pub struct NoOpObserver;

impl LedgerObserver for NoOpObserver {
    fn on_record_added(&self, _address: &Address, _action: &str) {}
    fn on_append_conflict(&self, _address: &Address, _attempt: u32) {}
    fn on_run_started(&self, _address: &Address, _records: usize) {}
    fn on_run_completed(&self, _address: &Address, _records: usize, _duration_millis: u64) {}
    fn on_run_failed(&self, _address: &Address, _action: &str, _error: &ActionError) {}
    fn on_entry_removed(&self, _address: &Address, _removed: u64) {}
    fn on_container_compacted(&self, _address: &Address) {}
}

/// Tracing-based observer
pub struct TracingObserver;

fn service(address: &Address) -> &str {
    address.service_key().map(|s| s.as_str()).unwrap_or("-")
}

impl LedgerObserver for TracingObserver {
    fn on_record_added(&self, address: &Address, action: &str) {
        tracing::debug!(key = %address.key(), service_key = %service(address), action = %action, "Compensation recorded");
    }

    fn on_append_conflict(&self, address: &Address, attempt: u32) {
        tracing::warn!(key = %address.key(), service_key = %service(address), attempt, "Append aborted by concurrent write");
    }

    fn on_run_started(&self, address: &Address, records: usize) {
        tracing::info!(key = %address.key(), service_key = %service(address), records, "Compensation started");
    }

    fn on_run_completed(&self, address: &Address, records: usize, duration_millis: u64) {
        tracing::info!(key = %address.key(), service_key = %service(address), records, duration_ms = duration_millis, "Compensation completed");
    }

    fn on_run_failed(&self, address: &Address, action: &str, error: &ActionError) {
        tracing::warn!(key = %address.key(), service_key = %service(address), action = %action, error = %error, "Compensation failed, entry retained");
    }

    fn on_entry_removed(&self, address: &Address, removed: u64) {
        tracing::debug!(key = %address.key(), service_key = %service(address), removed, "Compensation removed");
    }

    fn on_container_compacted(&self, address: &Address) {
        tracing::debug!(key = %address.key(), "Empty container deleted");
    }
}
