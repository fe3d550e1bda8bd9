//! Error types for the reconciler crate.
//!
//! Two families live here. [`Error`] is what a reconcile call hands back to
//! the dispatch layer: store faults, write conflicts, exhausted operation
//! budgets. [`OperationError`] is what a resource manager reports from one of
//! its four operations; it never leaves `reconcile` and is folded into a
//! `Failed` status instead.

use thiserror::Error;

use crate::types::InstanceKey;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// The instance record does not exist in the store.
    #[error("instance '{key}' not found")]
    NotFound { key: InstanceKey },

    /// The instance record already exists in the store.
    #[error("instance '{key}' already exists")]
    AlreadyExists { key: InstanceKey },

    /// A write was based on a stale resource version.
    #[error("conflict writing instance '{key}': expected version {expected}, found {actual}")]
    Conflict {
        key: InstanceKey,
        expected: u64,
        actual: u64,
    },

    /// The store could not serve a read or write.
    #[error("store operation '{operation}' failed: {reason}")]
    Store { operation: String, reason: String },

    /// A resource manager call exceeded the operation budget.
    #[error("operation '{operation}' on '{id}' timed out after {timeout_ms}ms")]
    Timeout {
        operation: String,
        id: String,
        timeout_ms: u64,
    },

    /// The instance cannot be reconciled as written.
    #[error("invalid instance '{key}': {reason}")]
    InvalidInstance { key: InstanceKey, reason: String },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The reconciliation loop was stopped.
    #[error("reconciliation loop stopped")]
    LoopStopped,
}

impl Error {
    /// Create a not found error.
    pub fn not_found(key: InstanceKey) -> Self {
        Self::NotFound { key }
    }

    /// Create an already exists error.
    pub fn already_exists(key: InstanceKey) -> Self {
        Self::AlreadyExists { key }
    }

    /// Create a write conflict error.
    pub fn conflict(key: InstanceKey, expected: u64, actual: u64) -> Self {
        Self::Conflict {
            key,
            expected,
            actual,
        }
    }

    /// Create a store failure error.
    pub fn store_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an operation timeout error.
    pub fn timeout(operation: impl Into<String>, id: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            id: id.into(),
            timeout_ms,
        }
    }

    /// Create an invalid instance error.
    pub fn invalid_instance(key: InstanceKey, reason: impl Into<String>) -> Self {
        Self::InvalidInstance {
            key,
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether this error is a stale-write conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether redoing the whole reconcile later can succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::Store { .. } | Self::Timeout { .. }
        )
    }
}

/// Failure reported by a resource manager operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct OperationError {
    message: String,
}

impl OperationError {
    /// Create an operation error with a human-readable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The message to surface in the instance status.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for OperationError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for OperationError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::store_failed("get", "connection reset");
        assert!(err.to_string().contains("get"));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_conflict_classification() {
        let err = Error::conflict(InstanceKey::new("default", "a-1"), 3, 4);
        assert!(err.is_conflict());
        assert!(err.is_retryable());
        assert!(err.to_string().contains("default/a-1"));
    }

    #[test]
    fn test_invalid_config_is_not_retryable() {
        let err = Error::invalid_config("requeue_after must be positive");
        assert!(!err.is_retryable());
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_operation_error_message() {
        let err = OperationError::from("error creating resource");
        assert_eq!(err.message(), "error creating resource");
        assert_eq!(err.to_string(), "error creating resource");
    }
}
