//! End-to-end reconcile scenarios against the simulated backend.
//!
//! Each test drives reconciles by hand and completes asynchronous backend
//! work explicitly, so the recorded sub-state sequences are exact.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

mod common;

use std::time::Duration;

use common::Harness;
use operatify::operatify_reconciler::{
    Error, InstanceKey, OperationKind, ReconcileParameters, ReconcileState, Status, VerifyResult,
};
use operatify::operatify_sim::{
    A_FINALIZER, B_FINALIZER, BSpec, BackendEvent, Behaviour, Operation, SimulatedBackend,
};

/// Asynchronous create followed by asynchronous delete.
///
/// # GIVEN
/// An `A` instance and a backend with default behaviour
///
/// # WHEN
/// It is reconciled through creation, then deleted
///
/// # THEN
/// Sub-states are `[InProgress, Ready, Deleting, Missing]` and the record is gone
#[tokio::test]
async fn test_async_create_and_delete() {
    let h = Harness::new();
    let key = h.create_a("a-1", None).await;

    let first = h.reconcile_a(&key).await;
    assert_eq!(first.state(), Some(ReconcileState::InProgress));
    assert_eq!(h.a_record(&key).await.metadata.finalizers, vec![A_FINALIZER]);

    let polling = h.reconcile_a(&key).await;
    assert_eq!(polling.state(), Some(ReconcileState::InProgress));

    assert!(h.backend.complete("a-1").await);
    let ready = h.reconcile_a(&key).await;
    assert_eq!(ready.state(), Some(ReconcileState::Succeeded));
    assert_eq!(ready.requeue_after, Some(Duration::from_millis(20)));
    assert_eq!(
        h.backend.states("a-1").await,
        vec![VerifyResult::InProgress, VerifyResult::Ready]
    );

    h.a_store.request_deletion(&key).await.unwrap();
    let deleting = h.reconcile_a(&key).await;
    assert_eq!(deleting.state(), Some(ReconcileState::InProgress));
    assert_eq!(
        h.a_record(&key).await.status.operation,
        Some(OperationKind::Delete)
    );

    assert!(h.backend.complete("a-1").await);
    let gone = h.reconcile_a(&key).await;
    assert_eq!(gone.status, None);
    assert!(!h.a_store.contains(&key).await);
    assert_eq!(
        h.backend.states("a-1").await,
        vec![
            VerifyResult::InProgress,
            VerifyResult::Ready,
            VerifyResult::Deleting,
            VerifyResult::Missing,
        ]
    );
}

/// Synchronous create.
///
/// # GIVEN
/// A backend told to create `a-1` synchronously
///
/// # WHEN
/// The instance is reconciled once
///
/// # THEN
/// It is `Succeeded` straight away with sub-states `[Ready]`
#[tokio::test]
async fn test_sync_create() {
    let h = Harness::new();
    h.backend
        .add_behaviour("a-1", Behaviour::new(Operation::CreateSync))
        .await;
    let key = h.create_a("a-1", None).await;

    let outcome = h.reconcile_a(&key).await;

    assert_eq!(outcome.state(), Some(ReconcileState::Succeeded));
    let status = h.a_record(&key).await.status;
    assert_eq!(status.message, "successfully created resource");
    assert_eq!(
        status.payload.get("externalId"),
        Some(&serde_json::json!("a-1"))
    );
    assert_eq!(h.backend.states("a-1").await, vec![VerifyResult::Ready]);
}

/// Create failure, then deletion.
///
/// # GIVEN
/// A backend whose create of `a-1` fails
///
/// # WHEN
/// The instance is reconciled, then deleted
///
/// # THEN
/// It is `Failed` with sub-states `[Error]`, and deletion still reaches `Missing`
#[tokio::test]
async fn test_create_failure_then_delete() {
    let h = Harness::new();
    h.backend
        .add_behaviour("a-1", Behaviour::new(Operation::CreateFail))
        .await;
    let key = h.create_a("a-1", None).await;

    let failed = h.reconcile_a(&key).await;
    assert_eq!(failed.state(), Some(ReconcileState::Failed));
    assert_eq!(failed.requeue_after, Some(Duration::from_millis(30)));
    assert_eq!(h.a_record(&key).await.status.message, "error creating resource");
    assert_eq!(h.backend.states("a-1").await, vec![VerifyResult::Error]);

    // Retrying does not silently recover.
    let retried = h.reconcile_a(&key).await;
    assert_eq!(retried.state(), Some(ReconcileState::Failed));
    assert_eq!(h.backend.count_events("a-1", BackendEvent::Create).await, 1);

    h.a_store.request_deletion(&key).await.unwrap();
    h.reconcile_a(&key).await;
    h.backend.complete("a-1").await;
    h.reconcile_a(&key).await;

    assert!(!h.a_store.contains(&key).await);
    assert_eq!(
        h.backend.states("a-1").await.last(),
        Some(&VerifyResult::Missing)
    );
}

/// Asynchronous create that completes in error.
#[tokio::test]
async fn test_async_create_completing_in_error() {
    let h = Harness::new();
    h.backend
        .add_behaviour("a-1", Behaviour::new(Operation::CreateCompleteFail))
        .await;
    let key = h.create_a("a-1", None).await;

    h.reconcile_a(&key).await;
    h.backend.complete("a-1").await;
    let outcome = h.reconcile_a(&key).await;

    assert_eq!(outcome.state(), Some(ReconcileState::Failed));
    assert_eq!(
        h.backend.states("a-1").await,
        vec![VerifyResult::InProgress, VerifyResult::Error]
    );
}

/// Verification failing after a completed create.
#[tokio::test]
async fn test_verify_failure_after_create() {
    let h = Harness::new();
    h.backend
        .add_behaviour("a-1", Behaviour::new(Operation::VerifyFail).starting_at(1))
        .await;
    let key = h.create_a("a-1", None).await;

    h.reconcile_a(&key).await;
    h.backend.complete("a-1").await;
    let ready = h.reconcile_a(&key).await;
    assert_eq!(ready.state(), Some(ReconcileState::Succeeded));

    let failed = h.reconcile_a(&key).await;
    assert_eq!(failed.state(), Some(ReconcileState::Failed));
    assert_eq!(
        h.a_record(&key).await.status.message,
        "failed to verify resource"
    );
}

/// Update permission absent.
///
/// # GIVEN
/// An instance annotated `C` whose resource later reports drift
///
/// # WHEN
/// The drift is observed
///
/// # THEN
/// It is `Failed` with an update-permission message and no update is issued
#[tokio::test]
async fn test_update_denied() {
    let h = Harness::new();
    h.backend
        .add_behaviour("a-1", Behaviour::new(Operation::CreateSync))
        .await;
    h.backend
        .add_behaviour("a-1", Behaviour::new(Operation::VerifyNeedsUpdate))
        .await;
    let key = h.create_a("a-1", Some("C")).await;

    assert_eq!(
        h.reconcile_a(&key).await.state(),
        Some(ReconcileState::Succeeded)
    );
    let outcome = h.reconcile_a(&key).await;

    assert_eq!(outcome.state(), Some(ReconcileState::Failed));
    assert!(
        h.a_record(&key)
            .await
            .status
            .message
            .starts_with("permission to update external resource is not set")
    );
    assert_eq!(h.backend.count_events("a-1", BackendEvent::Update).await, 0);
}

/// Drift is repaired with an update when permitted.
#[tokio::test]
async fn test_drift_triggers_update() {
    let h = Harness::new();
    h.backend
        .add_behaviour("a-1", Behaviour::new(Operation::CreateSync))
        .await;
    h.backend
        .add_behaviour("a-1", Behaviour::new(Operation::VerifyNeedsUpdate).times(1))
        .await;
    let key = h.create_a("a-1", None).await;

    h.reconcile_a(&key).await;
    let updated = h.reconcile_a(&key).await;

    assert_eq!(updated.state(), Some(ReconcileState::Succeeded));
    assert_eq!(
        h.a_record(&key).await.status.operation,
        Some(OperationKind::Update)
    );
    assert_eq!(
        h.backend.states("a-1").await,
        vec![
            VerifyResult::Ready,
            VerifyResult::UpdateRequired,
            VerifyResult::Ready,
        ]
    );
}

/// Create permission absent.
#[tokio::test]
async fn test_create_denied() {
    let h = Harness::new();
    let key = h.create_a("a-1", Some("UD")).await;

    let outcome = h.reconcile_a(&key).await;

    assert_eq!(outcome.state(), Some(ReconcileState::Failed));
    assert_eq!(
        h.a_record(&key).await.status.message,
        "permission to create external resource is not set"
    );
    assert!(h.backend.events("a-1").await.is_empty());
}

/// Delete permission absent.
///
/// # GIVEN
/// A created instance annotated `C`
///
/// # WHEN
/// Its deletion is requested
///
/// # THEN
/// The record goes away while the resource stays `Ready`
#[tokio::test]
async fn test_delete_denied_leaves_resource() {
    let h = Harness::new();
    h.backend
        .add_behaviour("a-1", Behaviour::new(Operation::CreateSync))
        .await;
    let key = h.create_a("a-1", Some("C")).await;
    h.reconcile_a(&key).await;

    h.a_store.request_deletion(&key).await.unwrap();
    let outcome = h.reconcile_a(&key).await;

    assert_eq!(outcome.status, None);
    assert!(!h.a_store.contains(&key).await);
    assert_eq!(h.backend.states("a-1").await, vec![VerifyResult::Ready]);
    assert_eq!(h.backend.count_events("a-1", BackendEvent::Delete).await, 0);
}

/// A failed delete keeps the finalizer and is retried.
#[tokio::test]
async fn test_delete_failure_retried() {
    let h = Harness::new();
    h.backend
        .add_behaviour("a-1", Behaviour::new(Operation::CreateSync))
        .await;
    h.backend
        .add_behaviour("a-1", Behaviour::new(Operation::DeleteFail).times(1))
        .await;
    let key = h.create_a("a-1", None).await;
    h.reconcile_a(&key).await;
    h.a_store.request_deletion(&key).await.unwrap();

    let failed = h.reconcile_a(&key).await;
    assert_eq!(failed.state(), Some(ReconcileState::Failed));
    assert_eq!(h.a_record(&key).await.metadata.finalizers, vec![A_FINALIZER]);

    // The resource is still Ready, so the next cycle deletes again.
    let deleting = h.reconcile_a(&key).await;
    assert_eq!(deleting.state(), Some(ReconcileState::InProgress));
    h.backend.complete("a-1").await;
    h.reconcile_a(&key).await;

    assert!(!h.a_store.contains(&key).await);
    assert_eq!(h.backend.count_events("a-1", BackendEvent::Delete).await, 2);
}

/// Owner failure propagates to the dependent.
///
/// # GIVEN
/// A `B` that succeeded behind its owner `a-1`
///
/// # WHEN
/// The owner's update fails
///
/// # THEN
/// The `B` falls back to `Pending`
#[tokio::test]
async fn test_owner_failure_reverts_dependent_to_pending() {
    let h = Harness::new();
    for id in ["a-1", "b-1"] {
        h.backend
            .add_behaviour(id, Behaviour::new(Operation::CreateSync))
            .await;
    }
    let a = h.create_a("a-1", None).await;
    let b = h.create_b(BSpec::new("b-1").with_owner("a-1")).await;

    h.reconcile_a(&a).await;
    assert_eq!(
        h.reconcile_b(&b).await.state(),
        Some(ReconcileState::Succeeded)
    );

    h.backend
        .add_behaviour("a-1", Behaviour::new(Operation::VerifyNeedsUpdate))
        .await;
    h.backend
        .add_behaviour("a-1", Behaviour::new(Operation::UpdateFail))
        .await;
    let owner = h.reconcile_a(&a).await;
    assert_eq!(owner.state(), Some(ReconcileState::Failed));
    assert_eq!(h.a_record(&a).await.status.message, "error updating resource");

    let dependent = h.reconcile_b(&b).await;
    assert_eq!(dependent.state(), Some(ReconcileState::Pending));
    assert_eq!(dependent.requeue_after, Some(Duration::from_millis(10)));
    assert_eq!(
        h.b_record(&b).await.status.message,
        "waiting for owner 'default/a-1' to be ready"
    );
}

/// Nothing is called for a `B` whose references are not ready.
#[tokio::test]
async fn test_dependencies_gate_all_calls() {
    let h = Harness::new();
    let b = h
        .create_b(BSpec::new("b-1").with_owner("a-1").with_dependency("a-2"))
        .await;

    let waiting = h.reconcile_b(&b).await;
    assert_eq!(waiting.state(), Some(ReconcileState::Pending));
    assert_eq!(
        h.b_record(&b).await.status.message,
        "waiting for owner 'default/a-1' to be created"
    );

    h.backend
        .add_behaviour("a-1", Behaviour::new(Operation::CreateSync))
        .await;
    let a1 = h.create_a("a-1", None).await;
    h.reconcile_a(&a1).await;
    let a2 = h.create_a("a-2", None).await;
    h.reconcile_a(&a2).await;

    h.reconcile_b(&b).await;
    assert_eq!(
        h.b_record(&b).await.status.message,
        "waiting for dependency 'default/a-2' to be ready"
    );
    assert!(h.backend.events("b-1").await.is_empty());
    assert_eq!(h.b_record(&b).await.metadata.finalizers, vec![B_FINALIZER]);

    h.backend.complete("a-2").await;
    h.reconcile_a(&a2).await;
    let creating = h.reconcile_b(&b).await;
    assert_eq!(creating.state(), Some(ReconcileState::InProgress));
    assert_eq!(
        h.backend.events("b-1").await,
        vec![BackendEvent::Create]
    );
}

/// Steady state is idempotent.
///
/// # GIVEN
/// An instance that is `Succeeded` with a `Ready` resource
///
/// # WHEN
/// It is reconciled twice more
///
/// # THEN
/// The record is unchanged and each reconcile adds exactly one verify
#[tokio::test]
async fn test_steady_state_idempotent() {
    let h = Harness::new();
    h.backend
        .add_behaviour("a-1", Behaviour::new(Operation::CreateSync))
        .await;
    let key = h.create_a("a-1", None).await;
    h.reconcile_a(&key).await;
    h.reconcile_a(&key).await;

    let before = h.a_record(&key).await;
    let verifies = h.backend.count_events("a-1", BackendEvent::Verify).await;

    for round in 1..=2 {
        let outcome = h.reconcile_a(&key).await;
        assert_eq!(outcome.state(), Some(ReconcileState::Succeeded));
        assert_eq!(
            h.backend.count_events("a-1", BackendEvent::Verify).await,
            verifies + round
        );
    }

    assert_eq!(h.a_record(&key).await, before);
    assert_eq!(h.backend.count_events("a-1", BackendEvent::Create).await, 1);
    assert_eq!(h.backend.count_events("a-1", BackendEvent::Update).await, 0);
}

/// The finalizer stays until deletion is confirmed.
#[tokio::test]
async fn test_finalizer_held_until_missing() {
    let h = Harness::new();
    let key = h.create_a("a-1", None).await;

    h.reconcile_a(&key).await;
    h.backend.complete("a-1").await;
    h.reconcile_a(&key).await;
    h.a_store.request_deletion(&key).await.unwrap();

    for _ in 0..3 {
        h.reconcile_a(&key).await;
        let record = h.a_record(&key).await;
        assert_eq!(record.metadata.finalizers, vec![A_FINALIZER]);
        assert_eq!(record.status.state, Some(ReconcileState::InProgress));
    }

    h.backend.complete("a-1").await;
    h.reconcile_a(&key).await;
    assert!(!h.a_store.contains(&key).await);
}

/// An overrunning operation changes nothing.
#[tokio::test]
async fn test_operation_timeout_leaves_status() {
    let params = ReconcileParameters::new(
        Duration::from_millis(10),
        Duration::from_millis(20),
        Duration::from_millis(30),
    )
    .with_operation_timeout(Duration::from_millis(20));
    let h = Harness::with(
        SimulatedBackend::with_latency(Duration::from_millis(500)),
        params,
    );
    let key = h.create_a("a-1", None).await;

    let err = h.try_reconcile_a(&key).await.unwrap_err();

    assert!(matches!(err, Error::Timeout { .. }));
    assert!(err.is_retryable());
    assert_eq!(h.a_record(&key).await.status, Status::default());
}

/// Store faults surface as reconcile errors.
#[tokio::test]
async fn test_store_faults_propagate() {
    let h = Harness::new();
    let a = h.create_a("a-1", None).await;
    let b = h.create_b(BSpec::new("b-1").with_owner("a-1")).await;

    h.a_store.fail_next(1);
    let own = h.try_reconcile_a(&a).await.unwrap_err();
    assert!(matches!(own, Error::Store { .. }));

    h.a_store.fail_next(1);
    let dependency = h.b.reconcile_instance(&b).await.unwrap_err();
    assert!(matches!(dependency, Error::Store { .. }));
    assert_eq!(h.b_record(&b).await.status, Status::default());
}

/// A record that no longer exists needs nothing.
#[tokio::test]
async fn test_unknown_key_is_noop() {
    let h = Harness::new();
    let outcome = h
        .reconcile_a(&InstanceKey::new(common::NAMESPACE, "nope"))
        .await;
    assert_eq!(outcome.status, None);
    assert_eq!(outcome.requeue_after, None);
}

/// A spec that cannot be resolved is reported on the record.
///
/// # GIVEN
/// A `B` listing an empty dependency name
///
/// # WHEN
/// It is reconciled
///
/// # THEN
/// It is `Failed` with the reason and nothing reaches the backend
#[tokio::test]
async fn test_invalid_dependencies_reported_as_failed() {
    let h = Harness::new();
    let b = h.create_b(BSpec::new("b-1").with_dependency("")).await;

    let outcome = h.reconcile_b(&b).await;

    assert_eq!(outcome.state(), Some(ReconcileState::Failed));
    assert_eq!(outcome.requeue_after, Some(Duration::from_millis(30)));
    assert_eq!(
        h.b_record(&b).await.status.message,
        "dependency names must not be empty"
    );
    assert!(h.backend.events("b-1").await.is_empty());
}

/// A create that failed before anything existed is attempted again.
#[tokio::test]
async fn test_create_failure_without_resource_retried() {
    let h = Harness::new();
    h.backend
        .add_behaviour("a-1", Behaviour::new(Operation::CreateFail).times(1))
        .await;
    let key = h.create_a("a-1", None).await;
    h.reconcile_a(&key).await;
    h.backend.clear().await;

    let retried = h.reconcile_a(&key).await;

    assert_eq!(retried.state(), Some(ReconcileState::InProgress));
    assert_eq!(
        h.backend.events("a-1").await,
        vec![BackendEvent::Verify, BackendEvent::Create]
    );
}
