//! Engine configuration.
//!
//! Intervals are written as integer milliseconds in configuration files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Requeue intervals and the operation budget of one engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileParameters {
    /// Poll interval while pending or in progress.
    #[serde(with = "duration_ms")]
    pub requeue_after: Duration,
    /// Resync interval once succeeded.
    #[serde(with = "duration_ms")]
    pub requeue_after_success: Duration,
    /// Backoff interval after a failure.
    #[serde(with = "duration_ms")]
    pub requeue_after_failure: Duration,
    /// Budget for a single resource manager call.
    #[serde(with = "duration_ms")]
    pub operation_timeout: Duration,
}

impl Default for ReconcileParameters {
    fn default() -> Self {
        Self {
            requeue_after: Duration::from_millis(5_000),
            requeue_after_success: Duration::from_millis(15_000),
            requeue_after_failure: Duration::from_millis(30_000),
            operation_timeout: Duration::from_millis(30_000),
        }
    }
}

impl ReconcileParameters {
    /// Parameters with the three requeue intervals set.
    #[must_use]
    pub fn new(
        requeue_after: Duration,
        requeue_after_success: Duration,
        requeue_after_failure: Duration,
    ) -> Self {
        Self {
            requeue_after,
            requeue_after_success,
            requeue_after_failure,
            ..Self::default()
        }
    }

    /// Set the operation budget.
    #[must_use]
    pub const fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Parse parameters from TOML and validate them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] on malformed TOML or zero intervals.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let params: Self =
            toml::from_str(input).map_err(|e| Error::invalid_config(e.to_string()))?;
        params.validate()
    }

    /// Reject zero intervals.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first zero interval.
    pub fn validate(self) -> Result<Self> {
        [
            ("requeue_after", self.requeue_after),
            ("requeue_after_success", self.requeue_after_success),
            ("requeue_after_failure", self.requeue_after_failure),
            ("operation_timeout", self.operation_timeout),
        ]
        .into_iter()
        .find(|(_, value)| value.is_zero())
        .map_or(Ok(self), |(name, _)| {
            Err(Error::invalid_config(format!("{name} must be positive")))
        })
    }
}

/// Serde adapter for durations stored as integer milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize a duration as milliseconds.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    /// Deserialize milliseconds into a duration.
    ///
    /// # Errors
    ///
    /// Propagates deserializer errors.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
