#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # Operatify
//!
//! Operator built on the generic reconciliation engine, driving the sample
//! kinds `A` and `B` against a simulated backend.
//!
//! This library re-exports the workspace crates for convenience.

pub use operatify_reconciler;
pub use operatify_sim;

pub mod config;
pub mod manifest;
pub mod operator;

pub use config::{BackendConfig, OperatorConfig};
pub use manifest::{Manifest, ManifestEntry};
pub use operator::{InstanceSummary, Operator};
