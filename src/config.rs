//! Operator configuration file.
//!
//! ```toml
//! annotation_base = "operatify.io"
//!
//! [reconcile]
//! requeue_after = 5000
//! requeue_after_success = 15000
//! requeue_after_failure = 30000
//! operation_timeout = 30000
//!
//! [loop]
//! workers = 2
//!
//! [backend]
//! completion_delay = 450
//! ```
//!
//! Every section is optional; intervals are milliseconds.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use operatify_reconciler::config::duration_ms;
use operatify_reconciler::{DEFAULT_ANNOTATION_BASE, LoopConfig, ReconcileParameters};
use serde::{Deserialize, Serialize};

/// Settings for the simulated backend the operator drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Time asynchronous operations take to finish.
    #[serde(with = "duration_ms")]
    pub completion_delay: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            completion_delay: Duration::from_millis(450),
        }
    }
}

/// Full operator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// Base name of the permission annotation.
    pub annotation_base: String,
    pub reconcile: ReconcileParameters,
    #[serde(rename = "loop")]
    pub loop_config: LoopConfig,
    pub backend: BackendConfig,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            annotation_base: DEFAULT_ANNOTATION_BASE.to_string(),
            reconcile: ReconcileParameters::default(),
            loop_config: LoopConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl OperatorConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed TOML or invalid values.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).context("Failed to parse operator config")?;
        config.validate()
    }

    /// Load the configuration at `path`, or defaults when no path is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let input = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&input).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render operator config")
    }

    fn validate(self) -> Result<Self> {
        self.reconcile.validate()?;
        anyhow::ensure!(
            !self.annotation_base.is_empty(),
            "annotation_base must not be empty"
        );
        anyhow::ensure!(self.loop_config.workers > 0, "loop.workers must be positive");
        Ok(self)
    }
}
