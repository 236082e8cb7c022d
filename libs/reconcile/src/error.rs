//! Error taxonomy for reconciliation passes.

use std::time::Duration;

use thiserror::Error;

/// Configuration errors. Not retryable until the rule set changes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The polling interval could not be parsed.
    #[error("invalid polling interval {value:?}: {reason}")]
    InvalidInterval { value: String, reason: String },

    /// Two rules in one rule set scale the same target for the same event type.
    #[error("duplicate rule for event type '{event_type}' targeting '{target}'")]
    DuplicateRule { event_type: String, target: String },
}

/// An event from the event source could not be interpreted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventParseError {
    /// A timestamp was not valid RFC 3339.
    #[error("invalid {field} {value:?}: {reason}")]
    InvalidTimestamp {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// The event ends before it starts.
    #[error("event ends ({end}) before it starts ({start})")]
    EndsBeforeStart { start: String, end: String },
}

/// Reconciliation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// Rule set configuration is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Network failure, non-success status or malformed payload.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// Resource not found.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Conflict detected (concurrent modification).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A bounded external call did not finish in time.
    #[error("timeout after {elapsed:?} waiting for {resource}")]
    Timeout {
        resource: String,
        elapsed: Duration,
    },

    /// Persisting status failed.
    #[error("status store error: {0}")]
    Store(String),

    /// Some rules in the pass could not be applied.
    #[error("{failed} of {total} rules failed")]
    RuleFailures { failed: usize, total: usize },
}

impl ReconcileError {
    /// Returns true if retrying on a later pass may succeed without a
    /// configuration change.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }

    /// Returns true if the error means a resource is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
