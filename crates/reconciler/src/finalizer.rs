//! Finalizer bookkeeping and the deletion protocol.
//!
//! The finalizer marker keeps a record in the store until the external
//! resource has had its chance to be deleted. It is added before any create
//! or update work and removed only once `verify` reports the resource
//! `Missing`, `delete` reports synchronous success, or delete permission is
//! absent. Adding a marker that is present, or removing one that is absent,
//! changes nothing.

use crate::permissions::Permissions;
use crate::types::{DeleteResult, ObjectMeta, OperationKind, Status, VerifyResult};

/// Whether `meta` carries the finalizer `name`.
#[must_use]
pub fn has_finalizer(meta: &ObjectMeta, name: &str) -> bool {
    meta.finalizers.iter().any(|f| f == name)
}

/// Add the finalizer `name`. Returns whether the metadata changed.
pub fn add_finalizer(meta: &mut ObjectMeta, name: &str) -> bool {
    if has_finalizer(meta, name) {
        return false;
    }
    meta.finalizers.push(name.to_string());
    true
}

/// Remove the finalizer `name`. Returns whether the metadata changed.
pub fn remove_finalizer(meta: &mut ObjectMeta, name: &str) -> bool {
    let before = meta.finalizers.len();
    meta.finalizers.retain(|f| f != name);
    meta.finalizers.len() != before
}

/// What the deletion branch does on this reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionPlan {
    /// The finalizer is already gone; the store reclaims the record.
    Nothing,
    /// Delete is not permitted: drop the finalizer, leave the resource.
    ReleaseWithoutDelete,
    /// Issue `delete`.
    Delete,
    /// A delete is in flight: `verify` it.
    VerifyDelete,
}

/// Choose the deletion step for a record whose deletion was requested.
#[must_use]
pub fn plan_deletion(
    meta: &ObjectMeta,
    status: &Status,
    permissions: Permissions,
    finalizer: &str,
) -> DeletionPlan {
    if !has_finalizer(meta, finalizer) {
        DeletionPlan::Nothing
    } else if !permissions.allows(OperationKind::Delete) {
        DeletionPlan::ReleaseWithoutDelete
    } else if status.operation == Some(OperationKind::Delete) {
        DeletionPlan::VerifyDelete
    } else {
        DeletionPlan::Delete
    }
}

/// Where a deletion stands after one contract call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionProgress {
    /// Deletion confirmed; remove the finalizer.
    Confirmed,
    /// Still deleting; poll again soon.
    InProgress,
    /// The resource is still there; issue `delete` again.
    Reissue,
    /// Deletion failed; keep the finalizer and retry after backoff.
    Failed(String),
}

/// Interpret the outcome of `delete`.
#[must_use]
pub fn after_delete(result: DeleteResult) -> DeletionProgress {
    match result {
        DeleteResult::Succeeded => DeletionProgress::Confirmed,
        DeleteResult::AwaitingVerification => DeletionProgress::InProgress,
        DeleteResult::Error => DeletionProgress::Failed("error deleting resource".to_string()),
    }
}

/// Interpret `verify` while a delete is in flight.
///
/// A resource that still looks present is deleted again only when the last
/// `delete` failed; otherwise the accepted delete is polled.
#[must_use]
pub fn after_delete_verify(result: VerifyResult, delete_failed: bool) -> DeletionProgress {
    match result {
        VerifyResult::Missing => DeletionProgress::Confirmed,
        VerifyResult::Ready | VerifyResult::UpdateRequired if delete_failed => {
            DeletionProgress::Reissue
        }
        VerifyResult::Deleting
        | VerifyResult::InProgress
        | VerifyResult::Ready
        | VerifyResult::UpdateRequired => DeletionProgress::InProgress,
        VerifyResult::Error => {
            DeletionProgress::Failed("failed to verify resource deletion".to_string())
        }
    }
}
