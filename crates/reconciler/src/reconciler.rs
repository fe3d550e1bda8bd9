//! Generic reconciler: the per-instance state machine.
//!
//! One call to [`GenericController::reconcile_instance`] reads the latest
//! record, decides which single contract operation (if any) to invoke, writes
//! the resulting status and returns when to look again. It never waits for
//! asynchronous backends to finish; completion is observed through `verify`
//! on a later call.
//!
//! Callers must not reconcile the same key from two tasks at once. The work
//! queue in [`crate::queue`] guarantees that for the bundled loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::ReconcileParameters;
use crate::contract::{OperationResult, ResourceManager};
use crate::dependencies::{ResourceDefinition, check_readiness};
use crate::error::{Error, Result};
use crate::finalizer::{
    DeletionPlan, DeletionProgress, add_finalizer, after_delete, after_delete_verify,
    plan_deletion, remove_finalizer,
};
use crate::permissions::{DEFAULT_ANNOTATION_BASE, Permissions, permission_annotation_key};
use crate::recorder::{EventRecorder, EventType, ReconcileEvent, TracingRecorder};
use crate::store::InstanceStore;
use crate::types::{
    ApplyResponse, ApplyResult, InstanceKey, ManagedInstance, OperationKind, ReconcileState,
    ResourceSpec, Status, StatusPayload, VerifyResponse, VerifyResult, bounded_message,
};

/// Dispatch surface invoked by watch events and scheduled requeues.
#[async_trait]
pub trait Reconcile: Send + Sync {
    /// Resource kind handled by this reconciler.
    fn kind(&self) -> &str;

    /// Reconcile one instance. Returns when to reconcile it again.
    async fn reconcile(&self, key: &InstanceKey) -> Result<Option<Duration>>;
}

/// Result of one reconcile call.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    /// Status as persisted; `None` once the record is gone.
    pub status: Option<Status>,
    /// When to reconcile again; `None` means only on the next watch event.
    pub requeue_after: Option<Duration>,
}

impl ReconcileOutcome {
    /// The record is gone or needs no further attention.
    #[must_use]
    pub const fn finished() -> Self {
        Self {
            status: None,
            requeue_after: None,
        }
    }

    /// Persisted reconcile state, if any.
    #[must_use]
    pub fn state(&self) -> Option<ReconcileState> {
        self.status.as_ref().and_then(|status| status.state)
    }
}

/// Status change decided by the state machine.
#[derive(Debug)]
struct Transition {
    state: ReconcileState,
    message: String,
    operation: Option<OperationKind>,
    payload: Option<StatusPayload>,
    requeue_after: Duration,
    event: Option<(EventType, &'static str)>,
}

impl Transition {
    fn new(state: ReconcileState, message: impl Into<String>, requeue_after: Duration) -> Self {
        Self {
            state,
            message: message.into(),
            operation: None,
            payload: None,
            requeue_after,
            event: None,
        }
    }

    fn pending(message: impl Into<String>, params: &ReconcileParameters) -> Self {
        Self::new(ReconcileState::Pending, message, params.requeue_after)
    }

    fn in_progress(message: impl Into<String>, params: &ReconcileParameters) -> Self {
        Self::new(ReconcileState::InProgress, message, params.requeue_after)
    }

    fn succeeded(message: impl Into<String>, params: &ReconcileParameters) -> Self {
        Self::new(ReconcileState::Succeeded, message, params.requeue_after_success)
    }

    fn failed(message: impl Into<String>, params: &ReconcileParameters) -> Self {
        Self::new(ReconcileState::Failed, message, params.requeue_after_failure)
    }

    const fn with_operation(mut self, operation: OperationKind) -> Self {
        self.operation = Some(operation);
        self
    }

    fn with_payload(mut self, payload: Option<StatusPayload>) -> Self {
        self.payload = payload;
        self
    }

    const fn with_event(mut self, event_type: EventType, reason: &'static str) -> Self {
        self.event = Some((event_type, reason));
        self
    }
}

/// Reconciler for one resource kind, built from the four pluggable
/// operations, a definition, and a store.
pub struct GenericController<S: ResourceSpec> {
    kind: String,
    store: Arc<dyn InstanceStore<S>>,
    manager: Arc<dyn ResourceManager<S>>,
    definition: Arc<dyn ResourceDefinition<S>>,
    params: ReconcileParameters,
    permission_key: String,
    recorder: Arc<dyn EventRecorder>,
}

impl<S: ResourceSpec> GenericController<S> {
    /// Start building a controller.
    #[must_use]
    pub fn builder() -> GenericControllerBuilder<S> {
        GenericControllerBuilder::new()
    }

    /// Get the configuration.
    #[must_use]
    pub const fn params(&self) -> &ReconcileParameters {
        &self.params
    }

    /// Annotation key holding access permissions.
    #[must_use]
    pub fn permission_key(&self) -> &str {
        &self.permission_key
    }

    /// Reconcile the instance stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns store errors (including write conflicts) and operation
    /// timeouts. In both cases the persisted status is left as it was and the
    /// whole reconcile should be redone. Failures reported by the resource
    /// manager are not errors: they become a `Failed` status.
    pub async fn reconcile_instance(&self, key: &InstanceKey) -> Result<ReconcileOutcome> {
        let Some(instance) = self.store.get(key).await? else {
            debug!(kind = %self.kind, key = %key, "Instance not found, nothing to do");
            return Ok(ReconcileOutcome::finished());
        };

        let permissions =
            Permissions::from_annotations(&instance.metadata.annotations, &self.permission_key);

        if instance.metadata.is_deletion_requested() {
            return self.reconcile_deletion(instance, permissions).await;
        }

        let instance = self.ensure_finalizer(instance).await?;
        let definitions = match self.definition.dependencies(&instance) {
            Ok(definitions) => definitions,
            Err(Error::InvalidInstance { reason, .. }) => {
                warn!(
                    kind = %self.kind,
                    key = %key,
                    reason = %reason,
                    "Instance cannot be reconciled"
                );
                let transition = Transition::failed(reason, &self.params)
                    .with_event(EventType::Warning, "InvalidInstance");
                return self.commit(instance, transition).await;
            }
            Err(e) => return Err(e),
        };
        let readiness = check_readiness(&definitions).await?;

        let transition = if readiness.is_ready() {
            self.drive(&instance, permissions).await?
        } else {
            Transition::pending(readiness.message(), &self.params)
        };

        self.commit(instance, transition).await
    }

    /// Pick and run the contract operation for an instance whose
    /// dependencies are ready.
    async fn drive(
        &self,
        instance: &ManagedInstance<S>,
        permissions: Permissions,
    ) -> Result<Transition> {
        if instance.status.operation.is_none() {
            return self.apply(OperationKind::Create, instance, permissions).await;
        }

        let id = instance.id();
        let response = self
            .call("verify", id, self.manager.verify(id, &instance.spec))
            .await?;

        let VerifyResponse { result, payload } = match response {
            Ok(response) => response,
            Err(e) => {
                warn!(kind = %self.kind, id, error = %e, "Verify failed");
                return Ok(Transition::failed(e.message(), &self.params)
                    .with_event(EventType::Warning, "VerifyFailed"));
            }
        };

        let awaiting = instance.status.state == Some(ReconcileState::InProgress);
        let failed = instance.status.state == Some(ReconcileState::Failed);
        debug!(kind = %self.kind, id, %result, awaiting, "Verified external resource");

        let transition = match result {
            VerifyResult::Ready => Transition::succeeded("resource is ready", &self.params),
            VerifyResult::UpdateRequired => {
                return self.apply(OperationKind::Update, instance, permissions).await;
            }
            VerifyResult::InProgress => {
                Transition::in_progress("waiting for resource to become ready", &self.params)
            }
            VerifyResult::Missing | VerifyResult::Deleting if awaiting => {
                Transition::in_progress("waiting for resource to become ready", &self.params)
            }
            VerifyResult::Missing if failed => {
                debug!(kind = %self.kind, id, "Resource absent after failure, creating again");
                return self.apply(OperationKind::Create, instance, permissions).await;
            }
            VerifyResult::Missing => {
                Transition::failed("external resource is missing", &self.params)
                    .with_event(EventType::Warning, "ResourceMissing")
            }
            VerifyResult::Deleting => {
                Transition::failed("external resource is being deleted", &self.params)
                    .with_event(EventType::Warning, "ResourceDeleting")
            }
            VerifyResult::Error => {
                Transition::failed("external resource reported an error", &self.params)
                    .with_event(EventType::Warning, "VerifyFailed")
            }
        };
        Ok(transition.with_payload(payload))
    }

    /// Create or update, after checking permission.
    async fn apply(
        &self,
        operation: OperationKind,
        instance: &ManagedInstance<S>,
        permissions: Permissions,
    ) -> Result<Transition> {
        if !permissions.allows(operation) {
            info!(kind = %self.kind, key = %instance.key(), %operation, "Operation not permitted");
            return Ok(
                Transition::failed(Permissions::denied_message(operation), &self.params)
                    .with_event(EventType::Warning, "PermissionDenied"),
            );
        }

        let id = instance.id();
        let spec = &instance.spec;
        let response = if operation == OperationKind::Update {
            self.call("update", id, self.manager.update(id, spec)).await?
        } else {
            self.call("create", id, self.manager.create(id, spec)).await?
        };

        Ok(self.after_apply(operation, id, response))
    }

    fn after_apply(
        &self,
        operation: OperationKind,
        id: &str,
        response: OperationResult<ApplyResponse>,
    ) -> Transition {
        let transition = match response {
            Ok(ApplyResponse { result, payload }) => match result {
                ApplyResult::Succeeded => Transition::succeeded(
                    format!("successfully {} resource", operation.past()),
                    &self.params,
                )
                .with_event(EventType::Normal, "Applied"),
                ApplyResult::AwaitingVerification => Transition::in_progress(
                    format!("waiting for {operation} to complete"),
                    &self.params,
                ),
                ApplyResult::Error => Transition::failed(
                    format!("error {} resource", operation.progressive()),
                    &self.params,
                )
                .with_event(EventType::Warning, "ApplyFailed"),
            }
            .with_payload(payload),
            Err(e) => {
                warn!(kind = %self.kind, id, %operation, error = %e, "Operation failed");
                Transition::failed(e.message(), &self.params)
                    .with_event(EventType::Warning, "ApplyFailed")
            }
        };
        transition.with_operation(operation)
    }

    async fn reconcile_deletion(
        &self,
        instance: ManagedInstance<S>,
        permissions: Permissions,
    ) -> Result<ReconcileOutcome> {
        let finalizer = self.definition.finalizer_name();
        match plan_deletion(&instance.metadata, &instance.status, permissions, finalizer) {
            DeletionPlan::Nothing => {
                debug!(kind = %self.kind, key = %instance.key(), "Deletion requested, finalizer already released");
                Ok(ReconcileOutcome::finished())
            }
            DeletionPlan::ReleaseWithoutDelete => {
                info!(
                    kind = %self.kind,
                    key = %instance.key(),
                    "Delete not permitted, leaving external resource in place"
                );
                self.record(
                    &instance.key(),
                    EventType::Normal,
                    "DeleteSkipped",
                    Permissions::denied_message(OperationKind::Delete),
                );
                self.release(instance).await
            }
            DeletionPlan::Delete => self.issue_delete(instance).await,
            DeletionPlan::VerifyDelete => {
                let id = instance.id().to_string();
                let response = self
                    .call("verify", &id, self.manager.verify(&id, &instance.spec))
                    .await?;
                let progress = match response {
                    Ok(response) => after_delete_verify(
                        response.result,
                        instance.status.state == Some(ReconcileState::Failed),
                    ),
                    Err(e) => DeletionProgress::Failed(e.message().to_string()),
                };
                if progress == DeletionProgress::Reissue {
                    debug!(kind = %self.kind, id, "Resource still present, reissuing delete");
                    self.issue_delete(instance).await
                } else {
                    self.advance_deletion(instance, progress).await
                }
            }
        }
    }

    async fn issue_delete(&self, instance: ManagedInstance<S>) -> Result<ReconcileOutcome> {
        let id = instance.id().to_string();
        let response = self.call("delete", &id, self.manager.delete(&id)).await?;
        let progress = match response {
            Ok(result) => after_delete(result),
            Err(e) => DeletionProgress::Failed(e.message().to_string()),
        };
        self.advance_deletion(instance, progress).await
    }

    async fn advance_deletion(
        &self,
        instance: ManagedInstance<S>,
        progress: DeletionProgress,
    ) -> Result<ReconcileOutcome> {
        let transition = match progress {
            DeletionProgress::Confirmed => return self.release(instance).await,
            DeletionProgress::InProgress | DeletionProgress::Reissue => {
                Transition::in_progress("deleting resource", &self.params)
            }
            DeletionProgress::Failed(message) => {
                warn!(kind = %self.kind, key = %instance.key(), error = %message, "Delete failed");
                Transition::failed(message, &self.params)
                    .with_event(EventType::Warning, "DeleteFailed")
            }
        };
        self.commit(instance, transition.with_operation(OperationKind::Delete))
            .await
    }

    /// Drop the finalizer so the store can reclaim the record.
    async fn release(&self, mut instance: ManagedInstance<S>) -> Result<ReconcileOutcome> {
        let key = instance.key();
        if remove_finalizer(&mut instance.metadata, self.definition.finalizer_name()) {
            self.store.update(&instance).await?;
            info!(kind = %self.kind, key = %key, "Finalizer removed");
            self.record(&key, EventType::Normal, "Deleted", "finalizer removed");
        }
        Ok(ReconcileOutcome::finished())
    }

    async fn ensure_finalizer(&self, mut instance: ManagedInstance<S>) -> Result<ManagedInstance<S>> {
        if !add_finalizer(&mut instance.metadata, self.definition.finalizer_name()) {
            return Ok(instance);
        }
        let updated = self.store.update(&instance).await?;
        info!(kind = %self.kind, key = %updated.key(), "Finalizer added");
        Ok(updated)
    }

    /// Persist the transition if it changes the status.
    async fn commit(
        &self,
        instance: ManagedInstance<S>,
        transition: Transition,
    ) -> Result<ReconcileOutcome> {
        let key = instance.key();
        let previous = instance.status.clone();

        let mut status = previous.clone();
        status.state = Some(transition.state);
        status.message = bounded_message(&transition.message);
        status.operation = transition.operation.or(previous.operation);
        if let Some(payload) = transition.payload {
            status.merge_payload(payload);
        }

        if status != previous {
            let mut updated = instance;
            updated.status = status.clone();
            self.store.update_status(&updated).await?;

            if previous.state == status.state {
                debug!(kind = %self.kind, key = %key, state = %transition.state, "Status updated");
            } else {
                info!(
                    kind = %self.kind,
                    key = %key,
                    from = ?previous.state,
                    to = %transition.state,
                    message = %status.message,
                    "State transition"
                );
            }
            if let Some((event_type, reason)) = transition.event {
                self.record(&key, event_type, reason, status.message.clone());
            }
        }

        Ok(ReconcileOutcome {
            status: Some(status),
            requeue_after: Some(transition.requeue_after),
        })
    }

    /// Run a contract call within the operation budget.
    async fn call<T, F>(&self, operation: &str, id: &str, future: F) -> Result<OperationResult<T>>
    where
        F: Future<Output = OperationResult<T>> + Send,
    {
        let budget = self.params.operation_timeout;
        tokio::time::timeout(budget, future).await.map_err(|_| {
            let timeout_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX);
            warn!(kind = %self.kind, id, operation, timeout_ms, "Operation timed out");
            Error::timeout(operation, id, timeout_ms)
        })
    }

    fn record(
        &self,
        key: &InstanceKey,
        event_type: EventType,
        reason: &str,
        message: impl Into<String>,
    ) {
        let event = match event_type {
            EventType::Normal => ReconcileEvent::normal(&self.kind, key.clone(), reason, message),
            EventType::Warning => ReconcileEvent::warning(&self.kind, key.clone(), reason, message),
        };
        self.recorder.record(event);
    }
}

#[async_trait]
impl<S: ResourceSpec> Reconcile for GenericController<S> {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn reconcile(&self, key: &InstanceKey) -> Result<Option<Duration>> {
        self.reconcile_instance(key)
            .await
            .map(|outcome| outcome.requeue_after)
    }
}

/// Builder for [`GenericController`].
pub struct GenericControllerBuilder<S: ResourceSpec> {
    store: Option<Arc<dyn InstanceStore<S>>>,
    manager: Option<Arc<dyn ResourceManager<S>>>,
    definition: Option<Arc<dyn ResourceDefinition<S>>>,
    params: ReconcileParameters,
    annotation_base: String,
    recorder: Arc<dyn EventRecorder>,
}

impl<S: ResourceSpec> GenericControllerBuilder<S> {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: None,
            manager: None,
            definition: None,
            params: ReconcileParameters::default(),
            annotation_base: DEFAULT_ANNOTATION_BASE.to_string(),
            recorder: Arc::new(TracingRecorder),
        }
    }

    /// Set the instance store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn InstanceStore<S>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the resource manager.
    #[must_use]
    pub fn with_manager(mut self, manager: Arc<dyn ResourceManager<S>>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Set the resource definition.
    #[must_use]
    pub fn with_definition(mut self, definition: Arc<dyn ResourceDefinition<S>>) -> Self {
        self.definition = Some(definition);
        self
    }

    /// Set the requeue intervals and operation budget.
    #[must_use]
    pub const fn with_params(mut self, params: ReconcileParameters) -> Self {
        self.params = params;
        self
    }

    /// Set the annotation base name the permission annotation lives under.
    #[must_use]
    pub fn with_annotation_base(mut self, base: impl Into<String>) -> Self {
        self.annotation_base = base.into();
        self
    }

    /// Set the event recorder.
    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Build the controller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a collaborator is missing or the
    /// parameters are invalid.
    pub fn build(self) -> Result<GenericController<S>> {
        let store = self
            .store
            .ok_or_else(|| Error::invalid_config("instance store is required"))?;
        let manager = self
            .manager
            .ok_or_else(|| Error::invalid_config("resource manager is required"))?;
        let definition = self
            .definition
            .ok_or_else(|| Error::invalid_config("resource definition is required"))?;
        let params = self.params.validate()?;

        if definition.finalizer_name().is_empty() {
            return Err(Error::invalid_config("finalizer name must not be empty"));
        }

        Ok(GenericController {
            kind: definition.kind().to_string(),
            store,
            manager,
            definition,
            params,
            permission_key: permission_annotation_key(&self.annotation_base),
            recorder: self.recorder,
        })
    }
}

impl<S: ResourceSpec> Default for GenericControllerBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}
