//! Generic reconciliation engine for declaratively managed external resources.
//!
//! A resource type plugs into the engine by supplying four operations
//! (`create`, `update`, `verify`, `delete`) through [`ResourceManager`] and a
//! [`ResourceDefinition`] naming its finalizer and dependencies. The engine
//! drives every instance through a persisted state machine:
//!
//! - **Pending**: an owner or dependency is not ready yet
//! - **InProgress**: an apply or delete is awaiting verification
//! - **Succeeded**: the external resource matches the declared state
//! - **Failed**: the most recent cycle failed; the message says why
//!
//! Each reconcile issues at most one mutating call and returns when to look
//! again. Deletion is guarded by a finalizer that is only released once the
//! external resource is confirmed gone, or when delete permission is absent.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use operatify_reconciler::{
//!     GenericController, InMemoryInstanceStore, LoopConfig, ReconciliationLoop, spawn_watch,
//! };
//!
//! let store = Arc::new(InMemoryInstanceStore::new());
//! let controller = GenericController::builder()
//!     .with_store(store.clone())
//!     .with_manager(manager)
//!     .with_definition(definition)
//!     .build()?;
//!
//! let reconciliation = ReconciliationLoop::new(Arc::new(controller), LoopConfig::default());
//! spawn_watch(reconciliation.queue(), store.watch());
//! reconciliation.run().await?;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod contract;
pub mod dependencies;
pub mod error;
pub mod finalizer;
pub mod r#loop;
pub mod permissions;
pub mod queue;
pub mod reconciler;
pub mod recorder;
pub mod store;
pub mod types;

// Re-export main types
pub use config::ReconcileParameters;
pub use contract::{OperationResult, ResourceManager};
pub use dependencies::{
    Dependency, DependencyDefinitions, DependencyRole, Readiness, ReadinessAccessor,
    ResourceDefinition, check_readiness, is_succeeded,
};
pub use error::{Error, OperationError, Result};
pub use permissions::{DEFAULT_ANNOTATION_BASE, Permissions, permission_annotation_key};
pub use queue::WorkQueue;
pub use r#loop::{LoopConfig, LoopStopper, ReconciliationLoop, spawn_watch};
pub use reconciler::{GenericController, GenericControllerBuilder, Reconcile, ReconcileOutcome};
pub use recorder::{BroadcastRecorder, EventRecorder, EventType, ReconcileEvent, TracingRecorder};
pub use store::{InMemoryInstanceStore, InstanceStore, StatusReader, WatchEvent, WatchEventKind};
pub use types::{
    ApplyResponse, ApplyResult, DeleteResult, InstanceKey, ManagedInstance, ObjectMeta,
    OperationKind, ReconcileState, ResourceSpec, Status, StatusPayload, VerifyResponse,
    VerifyResult,
};
