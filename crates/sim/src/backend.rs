//! Behaviour-injecting simulated backend.
//!
//! Every external resource is a per-id record of the sub-states it went
//! through and the calls it received. What a call does is decided by the
//! record's behaviour list: the last behaviour whose window covers the
//! number of earlier calls of the same kind wins, otherwise a default
//! operation runs.
//!
//! Asynchronous operations record an interim sub-state and park the final
//! one. It lands when [`SimulatedBackend::complete`] is called, or after the
//! configured completion delay.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use operatify_reconciler::{ApplyResult, DeleteResult, OperationError, VerifyResult};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

/// Kind of call received by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendEvent {
    Create,
    Verify,
    Update,
    Delete,
}

impl fmt::Display for BackendEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "Create"),
            Self::Verify => write!(f, "Verify"),
            Self::Update => write!(f, "Update"),
            Self::Delete => write!(f, "Delete"),
        }
    }
}

/// What the backend does when called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Record `InProgress`, park `Ready`.
    CreateAsync,
    /// Record `Ready`.
    CreateSync,
    /// Record `Error` and fail.
    CreateFail,
    /// Record `InProgress`, park `Error`.
    CreateCompleteFail,
    /// Record `Ready`.
    UpdateSync,
    /// Record `InProgress`, park `Ready`.
    UpdateAsync,
    /// Record `Error` and fail.
    UpdateFail,
    /// Record `Deleting`, park `Missing`.
    DeleteAsync,
    /// Record `Missing`.
    DeleteSync,
    /// Fail without touching the resource.
    DeleteFail,
    /// Report the latest sub-state, `Missing` if there is none.
    VerifyStandard,
    /// Record `Error` and fail.
    VerifyFail,
    /// Record `UpdateRequired`.
    VerifyNeedsUpdate,
}

impl Operation {
    /// The call this operation answers.
    #[must_use]
    pub const fn event(self) -> BackendEvent {
        match self {
            Self::CreateAsync | Self::CreateSync | Self::CreateFail | Self::CreateCompleteFail => {
                BackendEvent::Create
            }
            Self::UpdateSync | Self::UpdateAsync | Self::UpdateFail => BackendEvent::Update,
            Self::DeleteAsync | Self::DeleteSync | Self::DeleteFail => BackendEvent::Delete,
            Self::VerifyStandard | Self::VerifyFail | Self::VerifyNeedsUpdate => {
                BackendEvent::Verify
            }
        }
    }

    /// Operation used when no behaviour matches.
    #[must_use]
    pub const fn default_for(event: BackendEvent) -> Self {
        match event {
            BackendEvent::Create => Self::CreateAsync,
            BackendEvent::Update => Self::UpdateSync,
            BackendEvent::Verify => Self::VerifyStandard,
            BackendEvent::Delete => Self::DeleteAsync,
        }
    }
}

/// Override of the operation run for a window of calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Behaviour {
    pub operation: Operation,
    /// Number of earlier calls of the same kind before the window opens.
    #[serde(default)]
    pub from: usize,
    /// Width of the window; zero keeps it open.
    #[serde(default)]
    pub count: usize,
}

impl Behaviour {
    /// Apply `operation` to every matching call.
    #[must_use]
    pub const fn new(operation: Operation) -> Self {
        Self {
            operation,
            from: 0,
            count: 0,
        }
    }

    /// Open the window after `from` earlier calls.
    #[must_use]
    pub const fn starting_at(mut self, from: usize) -> Self {
        self.from = from;
        self
    }

    /// Close the window after `count` calls.
    #[must_use]
    pub const fn times(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    /// Whether the call following `prior` calls of the same kind falls in
    /// the window.
    #[must_use]
    pub fn covers(&self, prior: usize) -> bool {
        self.from <= prior && (self.count == 0 || self.from.saturating_add(self.count) > prior)
    }
}

#[derive(Debug, Default)]
struct Record {
    states: Vec<VerifyResult>,
    events: Vec<BackendEvent>,
    behaviours: Vec<Behaviour>,
    pending: Option<VerifyResult>,
}

impl Record {
    fn count(&self, event: BackendEvent) -> usize {
        self.events.iter().filter(|e| **e == event).count()
    }

    fn select(&self, event: BackendEvent) -> Operation {
        let prior = self.count(event);
        self.behaviours
            .iter()
            .rev()
            .find(|b| b.operation.event() == event && b.covers(prior))
            .map_or_else(|| Operation::default_for(event), |b| b.operation)
    }

    fn latest(&self) -> VerifyResult {
        self.states.last().copied().unwrap_or(VerifyResult::Missing)
    }

    fn settle(&mut self, interim: VerifyResult, eventual: VerifyResult) {
        self.states.push(interim);
        self.pending = Some(eventual);
    }

    fn finish(&mut self) -> bool {
        match self.pending.take() {
            Some(state) => {
                self.states.push(state);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    records: Mutex<HashMap<String, Record>>,
    completion_delay: Option<Duration>,
    latency: Option<Duration>,
}

/// What a call resolved to, before it is shaped into a contract result.
enum Resolution {
    Apply(ApplyResult),
    Delete(DeleteResult),
    Verify(VerifyResult),
}

/// In-process stand-in for an external system. Cloning shares the records.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBackend {
    inner: Arc<Inner>,
}

impl SimulatedBackend {
    /// Backend whose asynchronous operations wait for [`Self::complete`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose asynchronous operations finish on their own after
    /// `delay`.
    #[must_use]
    pub fn auto_completing(delay: Duration) -> Self {
        Self::with_options(Some(delay), None)
    }

    /// Backend that takes `latency` to answer every call.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self::with_options(None, Some(latency))
    }

    fn with_options(completion_delay: Option<Duration>, latency: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Inner {
                records: Mutex::new(HashMap::new()),
                completion_delay,
                latency,
            }),
        }
    }

    /// Append a behaviour to the record of `id`.
    pub async fn add_behaviour(&self, id: &str, behaviour: Behaviour) {
        self.inner
            .records
            .lock()
            .await
            .entry(id.to_string())
            .or_default()
            .behaviours
            .push(behaviour);
    }

    /// Drop every behaviour of `id`.
    pub async fn clear_behaviours(&self, id: &str) {
        if let Some(record) = self.inner.records.lock().await.get_mut(id) {
            record.behaviours.clear();
        }
    }

    /// Forget every record.
    pub async fn clear(&self) {
        self.inner.records.lock().await.clear();
    }

    /// Sub-states recorded for `id`, oldest first.
    pub async fn states(&self, id: &str) -> Vec<VerifyResult> {
        self.inner
            .records
            .lock()
            .await
            .get(id)
            .map(|record| record.states.clone())
            .unwrap_or_default()
    }

    /// Calls received for `id`, oldest first.
    pub async fn events(&self, id: &str) -> Vec<BackendEvent> {
        self.inner
            .records
            .lock()
            .await
            .get(id)
            .map(|record| record.events.clone())
            .unwrap_or_default()
    }

    /// Number of calls of kind `event` received for `id`.
    pub async fn count_events(&self, id: &str, event: BackendEvent) -> usize {
        self.inner
            .records
            .lock()
            .await
            .get(id)
            .map_or(0, |record| record.count(event))
    }

    /// Land the parked sub-state of `id`. Returns whether one was parked.
    pub async fn complete(&self, id: &str) -> bool {
        let finished = self
            .inner
            .records
            .lock()
            .await
            .get_mut(id)
            .is_some_and(Record::finish);
        if finished {
            debug!(id, "Completed pending operation");
        }
        finished
    }

    /// Land every parked sub-state. Returns how many landed.
    pub async fn complete_all(&self) -> usize {
        self.inner
            .records
            .lock()
            .await
            .values_mut()
            .map(Record::finish)
            .filter(|finished| *finished)
            .count()
    }

    /// Answer a create call.
    ///
    /// # Errors
    ///
    /// Fails when the selected operation is a failing one.
    pub async fn create(&self, id: &str) -> Result<ApplyResult, OperationError> {
        match self.call(id, BackendEvent::Create).await? {
            Resolution::Apply(result) => Ok(result),
            _ => Ok(ApplyResult::Error),
        }
    }

    /// Answer an update call.
    ///
    /// # Errors
    ///
    /// Fails when the selected operation is a failing one.
    pub async fn update(&self, id: &str) -> Result<ApplyResult, OperationError> {
        match self.call(id, BackendEvent::Update).await? {
            Resolution::Apply(result) => Ok(result),
            _ => Ok(ApplyResult::Error),
        }
    }

    /// Answer a verify call.
    ///
    /// # Errors
    ///
    /// Fails when the selected operation is a failing one.
    pub async fn verify(&self, id: &str) -> Result<VerifyResult, OperationError> {
        match self.call(id, BackendEvent::Verify).await? {
            Resolution::Verify(result) => Ok(result),
            _ => Ok(VerifyResult::Error),
        }
    }

    /// Answer a delete call.
    ///
    /// # Errors
    ///
    /// Fails when the selected operation is a failing one.
    pub async fn delete(&self, id: &str) -> Result<DeleteResult, OperationError> {
        match self.call(id, BackendEvent::Delete).await? {
            Resolution::Delete(result) => Ok(result),
            _ => Ok(DeleteResult::Error),
        }
    }

    async fn call(&self, id: &str, event: BackendEvent) -> Result<Resolution, OperationError> {
        if let Some(latency) = self.inner.latency {
            tokio::time::sleep(latency).await;
        }

        let (operation, resolution) = {
            let mut records = self.inner.records.lock().await;
            let record = records.entry(id.to_string()).or_default();
            let operation = record.select(event);
            record.events.push(event);
            (operation, Self::run(record, operation))
        };
        debug!(id, %event, ?operation, "Backend call");

        if matches!(
            operation,
            Operation::CreateAsync
                | Operation::CreateCompleteFail
                | Operation::UpdateAsync
                | Operation::DeleteAsync
        ) {
            self.schedule_completion(id);
        }
        resolution
    }

    fn run(record: &mut Record, operation: Operation) -> Result<Resolution, OperationError> {
        match operation {
            Operation::CreateAsync | Operation::UpdateAsync => {
                record.settle(VerifyResult::InProgress, VerifyResult::Ready);
                Ok(Resolution::Apply(ApplyResult::AwaitingVerification))
            }
            Operation::CreateCompleteFail => {
                record.settle(VerifyResult::InProgress, VerifyResult::Error);
                Ok(Resolution::Apply(ApplyResult::AwaitingVerification))
            }
            Operation::CreateSync | Operation::UpdateSync => {
                record.states.push(VerifyResult::Ready);
                Ok(Resolution::Apply(ApplyResult::Succeeded))
            }
            Operation::CreateFail => {
                record.states.push(VerifyResult::Error);
                Err(OperationError::new("error creating resource"))
            }
            Operation::UpdateFail => {
                record.states.push(VerifyResult::Error);
                Err(OperationError::new("error updating resource"))
            }
            Operation::DeleteAsync => {
                record.settle(VerifyResult::Deleting, VerifyResult::Missing);
                Ok(Resolution::Delete(DeleteResult::AwaitingVerification))
            }
            Operation::DeleteSync => {
                record.states.push(VerifyResult::Missing);
                Ok(Resolution::Delete(DeleteResult::Succeeded))
            }
            Operation::DeleteFail => Err(OperationError::new("error deleting resource")),
            Operation::VerifyStandard => Ok(Resolution::Verify(record.latest())),
            Operation::VerifyFail => {
                record.states.push(VerifyResult::Error);
                Err(OperationError::new("failed to verify resource"))
            }
            Operation::VerifyNeedsUpdate => {
                record.states.push(VerifyResult::UpdateRequired);
                Ok(Resolution::Verify(VerifyResult::UpdateRequired))
            }
        }
    }

    fn schedule_completion(&self, id: &str) {
        let Some(delay) = self.inner.completion_delay else {
            return;
        };
        let backend = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            backend.complete(&id).await;
        });
    }
}
