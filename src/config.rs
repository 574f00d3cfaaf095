//! Ledger configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Construction-time configuration.
///
/// Store connection settings are not part of this; the ledger is handed an
/// already-connected [`KeyValueStore`](crate::KeyValueStore).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Static service key used for every call
    pub id: Option<Box<str>>,
    /// Keep an ordered list of records per service key
    pub multiple: bool,
    /// Service key is supplied with each call
    pub inject_id: bool,
    /// Retry policy for conflicting multiple-mode appends
    pub append_retry: RetryPolicy,
    /// Delete the container key when `remove` empties it
    pub compact_on_remove: bool,
    /// What a failed multiple-mode run leaves behind
    pub retain_on_failure: RetainPolicy,
}

impl LedgerConfig {
    /// Plain addressing with default policies
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the static service key
    pub fn with_id(mut self, id: impl Into<Box<str>>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Enable list-per-field storage
    pub fn with_multiple(mut self, multiple: bool) -> Self {
        self.multiple = multiple;
        self
    }

    /// Take the service key from each call
    pub fn with_inject_id(mut self, inject_id: bool) -> Self {
        self.inject_id = inject_id;
        self
    }

    /// Set the append retry policy
    pub fn with_append_retry(mut self, policy: RetryPolicy) -> Self {
        self.append_retry = policy;
        self
    }

    /// Compact the container after `remove`
    pub fn with_compact_on_remove(mut self, compact: bool) -> Self {
        self.compact_on_remove = compact;
        self
    }

    /// Set what a failed multiple-mode run keeps
    pub fn with_retain_on_failure(mut self, policy: RetainPolicy) -> Self {
        self.retain_on_failure = policy;
        self
    }
}

/// Records kept after a multiple-mode run in which some actions failed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetainPolicy {
    /// Keep the whole list; succeeded records run again on retry
    #[default]
    All,
    /// Keep only the records whose action failed
    FailedOnly,
}

/// Retry policy for optimistic appends
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Initial delay before first retry (milliseconds)
    pub initial_delay_millis: u64,
    /// Maximum delay cap (milliseconds)
    pub max_delay_millis: u64,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
    /// Randomize the upper half of each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_millis: 10,
            max_delay_millis: 500,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that gives up after the first conflict
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Calculate delay before retry `attempt` (1-indexed), without jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        let delay = self.initial_delay_millis as f64
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = delay.min(self.max_delay_millis as f64);
        Duration::from_millis(capped as u64)
    }

    /// Delay before retry `attempt`, with equal jitter applied when enabled
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        use rand::Rng;
        let millis = base.as_millis() as u64;
        let half = millis / 2;
        Duration::from_millis(rand::rng().random_range(half..=millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(0));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(40));
        // capped
        assert_eq!(policy.delay_for_attempt(20), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 1..8 {
            let base = policy.delay_for_attempt(attempt);
            let delay = policy.backoff(attempt);
            assert!(delay <= base);
            assert!(delay >= base / 2);
        }

        let fixed = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(fixed.backoff(2), Duration::from_millis(20));
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: LedgerConfig = serde_json::from_str(r#"{"id": "svcA", "multiple": true}"#).unwrap();
        assert_eq!(config.id.as_deref(), Some("svcA"));
        assert!(config.multiple);
        assert!(!config.inject_id);
        assert!(!config.compact_on_remove);
        assert_eq!(config.retain_on_failure, RetainPolicy::All);
        assert_eq!(config.append_retry.max_attempts, 5);

        let config: LedgerConfig =
            serde_json::from_str(r#"{"retain_on_failure": "failed_only", "append_retry": {"max_attempts": 2}}"#)
                .unwrap();
        assert_eq!(config.retain_on_failure, RetainPolicy::FailedOnly);
        assert_eq!(config.append_retry.max_attempts, 2);
        assert_eq!(config.append_retry.initial_delay_millis, 10);
    }
}
