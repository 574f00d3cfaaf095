//! Compensation Ledger for SAGA Workflows
//!
//! A durable store of pending rollback actions keyed by a workflow id. A step
//! that performs a side effect records how to undo it; if a later step fails
//! the caller runs the recorded compensation, which is deleted once it
//! succeeds and kept for a retry if it fails.
//!
//! Persistence is delegated to a [`KeyValueStore`]. Compensating functions
//! are registered by name in an [`ActionRegistry`].
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let actions = ActionRegistry::new().with_fn("cancel_order", |params| async move {
//!     orders.cancel(&params[0]).await.map_err(|e| ActionError::retry(e.to_string()))
//! });
//!
//! // One participant among several sharing a workflow id
//! let ledger = CompensationLedger::new(
//!     LedgerConfig::new().with_inject_id(true),
//!     store,
//!     actions,
//! );
//!
//! ledger.add("wf-42", Some("orders"), "cancel_order", vec![json!(order_id)]).await?;
//! // ... a later step fails
//! ledger.run("wf-42", Some("orders")).await?;
//! ```

#![warn(missing_docs)]

// === Core Types ===
mod config;
mod errors;
mod keys;
mod record;

// === Addressing & Actions ===
mod addressing;
mod registry;

// === Storage ===
mod ledger;
mod store;

// === Observability ===
mod observer;
mod stats;

// === Re-exports ===

// Types
pub use keys::{LedgerKey, ServiceKey};
pub use record::{append_encoded, decode_list, encode_list, CompensationRecord};

// Configuration
pub use addressing::{Address, AddressingMode, ServiceKeySource};
pub use config::{LedgerConfig, RetainPolicy, RetryPolicy};

// Errors
pub use errors::{ActionError, LedgerError, RecordFailure};

// Actions
pub use registry::{ActionRegistry, CompensatingAction, FnAction};

// Storage
pub use ledger::{CompensationLedger, RunOutput};
pub use store::{InMemoryStore, KeyValueStore, StoreError, StoreReply, TxOp, Watch};

// Observability
pub use observer::{LedgerObserver, NoOpObserver, TracingObserver};
pub use stats::{LedgerStats, LedgerStatsSnapshot};
