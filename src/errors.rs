//! Error types for ledger operations and compensating actions

use crate::store::StoreError;
use crate::{LedgerKey, ServiceKey};
use serde::{Deserialize, Serialize};

/// Error returned by a compensating action
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ActionError {
    /// Safe to retry - no side effects were applied
    #[error("compensation failed, safe to retry: {reason}")]
    SafeToRetry {
        /// Error description
        reason: Box<str>,
    },
    /// Ambiguous state - compensation may or may not have applied
    #[error("compensation outcome ambiguous: {reason}")]
    Ambiguous {
        /// Error description
        reason: Box<str>,
    },
    /// Terminal failure - cannot compensate
    #[error("compensation failed permanently: {reason}")]
    Terminal {
        /// Error description
        reason: Box<str>,
    },
}

impl ActionError {
    /// Shorthand for [`ActionError::SafeToRetry`]
    pub fn retry(reason: impl Into<Box<str>>) -> Self {
        Self::SafeToRetry {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`ActionError::Terminal`]
    pub fn terminal(reason: impl Into<Box<str>>) -> Self {
        Self::Terminal {
            reason: reason.into(),
        }
    }

    /// Check if safe to retry
    pub fn is_safe_to_retry(&self) -> bool {
        matches!(self, Self::SafeToRetry { .. })
    }

    /// Check if state is ambiguous
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Ambiguous { .. })
    }

    /// The failure description
    pub fn reason(&self) -> &str {
        match self {
            Self::SafeToRetry { reason } | Self::Ambiguous { reason } | Self::Terminal { reason } => {
                reason
            }
        }
    }
}

/// One failed record of a multiple-mode run
#[derive(Clone, Debug)]
pub struct RecordFailure {
    /// Position of the record in the stored list
    pub index: usize,
    /// Action name of the record
    pub action: Box<str>,
    /// Error returned by the action
    pub error: ActionError,
}

/// Error from a ledger operation
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// The key-value store failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stored payload could not be parsed
    #[error("malformed compensation payload at '{key}'")]
    Decode {
        /// Key holding the payload
        key: LedgerKey,
        /// Parse error
        #[source]
        source: serde_json::Error,
    },

    /// A record could not be serialized
    #[error("failed to encode compensation record")]
    Encode(#[source] serde_json::Error),

    /// Nothing is stored at the addressed entry
    #[error("no compensation stored at '{key}{}'", fmt_service(.service_key))]
    NotFound {
        /// Ledger key
        key: LedgerKey,
        /// Service key, when addressed
        service_key: Option<ServiceKey>,
    },

    /// A record names an action with no registered handler
    #[error("unknown compensating action '{action}'")]
    UnknownAction {
        /// Unregistered action name
        action: Box<str>,
    },

    /// The compensating action failed; the entry is retained
    #[error("compensating action '{action}' failed")]
    Action {
        /// Action name
        action: Box<str>,
        /// Error returned by the action
        #[source]
        source: ActionError,
    },

    /// Some records of a multiple-mode entry failed
    #[error("{} compensation(s) failed at '{key}/{service_key}', {succeeded} succeeded", .failures.len())]
    Batch {
        /// Ledger key
        key: LedgerKey,
        /// Service key
        service_key: ServiceKey,
        /// Failed records, in list order
        failures: Vec<RecordFailure>,
        /// Number of records whose action succeeded
        succeeded: usize,
    },

    /// The optimistic append kept losing to concurrent writers
    #[error("append to '{key}/{service_key}' aborted by concurrent writes after {attempts} attempt(s)")]
    AppendConflict {
        /// Ledger key
        key: LedgerKey,
        /// Service key
        service_key: ServiceKey,
        /// Attempts made
        attempts: u32,
    },

    /// The call does not match the instance's addressing mode
    #[error("invalid call for {mode} addressing: {reason}")]
    CallShape {
        /// Active mode name
        mode: &'static str,
        /// What was wrong with the call
        reason: &'static str,
    },
}

fn fmt_service(service_key: &Option<ServiceKey>) -> String {
    match service_key {
        Some(service_key) => format!("/{service_key}"),
        None => String::new(),
    }
}

impl LedgerError {
    /// Check if the addressed entry was absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if the stored entry was kept for a later retry
    pub fn entry_retained(&self) -> bool {
        matches!(self, Self::Action { .. } | Self::Batch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_error_predicates() {
        assert!(ActionError::retry("busy").is_safe_to_retry());
        assert!(!ActionError::terminal("gone").is_safe_to_retry());
        assert!(ActionError::Ambiguous { reason: "timeout".into() }.is_ambiguous());
        assert_eq!(ActionError::terminal("gone").reason(), "gone");
    }

    #[test]
    fn test_not_found_display() {
        let err = LedgerError::NotFound {
            key: "wf1".into(),
            service_key: Some("svcA".into()),
        };
        assert_eq!(err.to_string(), "no compensation stored at 'wf1/svcA'");
        assert!(err.is_not_found());

        let err = LedgerError::NotFound {
            key: "wf1".into(),
            service_key: None,
        };
        assert_eq!(err.to_string(), "no compensation stored at 'wf1'");
    }

    #[test]
    fn test_store_error_is_transparent() {
        let err = LedgerError::from(StoreError::Connection("refused".into()));
        assert_eq!(err.to_string(), StoreError::Connection("refused".into()).to_string());
    }
}
