//! The operation contract every resource type implements.

use async_trait::async_trait;

use crate::error::OperationError;
use crate::types::{ApplyResponse, DeleteResult, ResourceSpec, VerifyResponse};

/// Result of a single resource manager call.
pub type OperationResult<T> = std::result::Result<T, OperationError>;

/// Create, update, verify and delete an external resource.
///
/// Implementations talk to the real external system and must be idempotent:
/// the engine delivers every call at least once. A call may return
/// `AwaitingVerification` and finish out of band; the engine then observes
/// completion only through later `verify` calls.
///
/// Calls are cancelled by dropping the future when the engine's operation
/// budget runs out, so implementations must not rely on running to
/// completion.
#[async_trait]
pub trait ResourceManager<S: ResourceSpec>: Send + Sync {
    /// Create the external resource.
    async fn create(&self, id: &str, spec: &S) -> OperationResult<ApplyResponse>;

    /// Bring an existing external resource in line with `spec`.
    async fn update(&self, id: &str, spec: &S) -> OperationResult<ApplyResponse>;

    /// Probe the current condition of the external resource.
    async fn verify(&self, id: &str, spec: &S) -> OperationResult<VerifyResponse>;

    /// Delete the external resource.
    async fn delete(&self, id: &str) -> OperationResult<DeleteResult>;
}
