//! Operator runtime: stores, backend, controllers and loops for both
//! sample kinds.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use operatify_reconciler::{
    BroadcastRecorder, Error as ReconcileError, EventRecorder, GenericController, InMemoryInstanceStore,
    InstanceStore, LoopStopper, ManagedInstance, ReconcileEvent, ReconcileState, ReconciliationLoop,
    ResourceDefinition, ResourceManager, ResourceSpec, TracingRecorder, spawn_watch,
};
use operatify_sim::{
    A_KIND, ADefinition, ASpec, B_KIND, BDefinition, BSpec, SimulatedBackend,
    SimulatedResourceManager,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::OperatorConfig;
use crate::manifest::{Manifest, ManifestEntry};

/// Poll interval while waiting for instances to settle.
const WAIT_POLL: Duration = Duration::from_millis(50);

/// Records events to tracing and to subscribers.
struct FanOutRecorder {
    tracing: TracingRecorder,
    broadcast: BroadcastRecorder,
}

impl EventRecorder for FanOutRecorder {
    fn record(&self, event: ReconcileEvent) {
        self.tracing.record(event.clone());
        self.broadcast.record(event);
    }
}

/// One line of the operator summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceSummary {
    pub kind: String,
    pub key: String,
    pub state: Option<ReconcileState>,
    pub message: String,
}

impl InstanceSummary {
    fn of<S: ResourceSpec>(kind: &str, instance: &ManagedInstance<S>) -> Self {
        Self {
            kind: kind.to_string(),
            key: instance.key().to_string(),
            state: instance.status.state,
            message: instance.status.message.clone(),
        }
    }

    fn is_settled(&self) -> bool {
        self.state.is_some_and(ReconcileState::is_settled)
    }
}

/// A running operator.
pub struct Operator {
    a_store: Arc<InMemoryInstanceStore<ASpec>>,
    b_store: Arc<InMemoryInstanceStore<BSpec>>,
    backend: SimulatedBackend,
    events: BroadcastRecorder,
    stoppers: Vec<LoopStopper>,
    loops: Vec<JoinHandle<()>>,
    watches: Vec<JoinHandle<()>>,
}

impl Operator {
    /// Build both controllers and start their loops.
    ///
    /// # Errors
    ///
    /// Returns an error if a controller cannot be built from `config`.
    pub fn start(config: &OperatorConfig) -> Result<Self> {
        Self::start_with_backend(
            config,
            SimulatedBackend::auto_completing(config.backend.completion_delay),
        )
    }

    /// Like [`Operator::start`], against a caller-supplied backend.
    ///
    /// # Errors
    ///
    /// Returns an error if a controller cannot be built from `config`.
    pub fn start_with_backend(config: &OperatorConfig, backend: SimulatedBackend) -> Result<Self> {
        let a_store = Arc::new(InMemoryInstanceStore::<ASpec>::new());
        let b_store = Arc::new(InMemoryInstanceStore::<BSpec>::new());
        let events = BroadcastRecorder::default();
        let recorder: Arc<dyn EventRecorder> = Arc::new(FanOutRecorder {
            tracing: TracingRecorder,
            broadcast: events.clone(),
        });
        let manager = Arc::new(SimulatedResourceManager::new(backend.clone()));

        let mut operator = Self {
            a_store: Arc::clone(&a_store),
            b_store: Arc::clone(&b_store),
            backend,
            events,
            stoppers: Vec::new(),
            loops: Vec::new(),
            watches: Vec::new(),
        };

        operator.spawn_kind(
            config,
            &a_store,
            manager.clone(),
            Arc::new(ADefinition),
            Arc::clone(&recorder),
        )?;
        operator.spawn_kind(
            config,
            &b_store,
            manager,
            Arc::new(BDefinition::new(a_store)),
            recorder,
        )?;

        info!(workers = config.loop_config.workers, "Operator started");
        Ok(operator)
    }

    fn spawn_kind<S: ResourceSpec>(
        &mut self,
        config: &OperatorConfig,
        store: &Arc<InMemoryInstanceStore<S>>,
        manager: Arc<dyn ResourceManager<S>>,
        definition: Arc<dyn ResourceDefinition<S>>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Result<()> {
        let store_handle: Arc<dyn InstanceStore<S>> = store.clone();
        let controller = GenericController::builder()
            .with_store(store_handle)
            .with_manager(manager)
            .with_definition(definition)
            .with_params(config.reconcile)
            .with_annotation_base(config.annotation_base.clone())
            .with_recorder(recorder)
            .build()
            .context("Failed to build controller")?;

        let reconciliation = Arc::new(ReconciliationLoop::new(
            Arc::new(controller),
            config.loop_config,
        ));
        self.watches
            .push(spawn_watch(reconciliation.queue(), store.watch()));
        self.stoppers.push(reconciliation.stopper());
        self.loops.push(tokio::spawn(async move {
            if let Err(e) = reconciliation.run().await {
                error!(error = %e, "Reconciliation loop exited");
            }
        }));
        Ok(())
    }

    /// The backend the controllers talk to.
    #[must_use]
    pub const fn backend(&self) -> &SimulatedBackend {
        &self.backend
    }

    /// Store of `A` instances.
    #[must_use]
    pub fn a_store(&self) -> Arc<InMemoryInstanceStore<ASpec>> {
        Arc::clone(&self.a_store)
    }

    /// Store of `B` instances.
    #[must_use]
    pub fn b_store(&self) -> Arc<InMemoryInstanceStore<BSpec>> {
        Arc::clone(&self.b_store)
    }

    /// Subscribe to reconcile events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ReconcileEvent> {
        self.events.subscribe()
    }

    /// Create or update every instance in `manifest` and install its
    /// backend behaviours.
    ///
    /// # Errors
    ///
    /// Returns an error if a store write fails.
    pub async fn apply(&self, manifest: &Manifest) -> Result<()> {
        for (id, behaviours) in &manifest.behaviours {
            for behaviour in behaviours {
                self.backend.add_behaviour(id, *behaviour).await;
            }
        }
        for entry in &manifest.a {
            apply_entry(&self.a_store, entry).await?;
        }
        for entry in &manifest.b {
            apply_entry(&self.b_store, entry).await?;
        }
        info!(instances = manifest.len(), "Manifest applied");
        Ok(())
    }

    /// Request deletion of every instance, dependents first.
    ///
    /// # Errors
    ///
    /// Returns an error if a store write fails.
    pub async fn delete_all(&self) -> Result<()> {
        for instance in self.b_store.list().await {
            request_deletion(&self.b_store, &instance).await?;
        }
        for instance in self.a_store.list().await {
            request_deletion(&self.a_store, &instance).await?;
        }
        Ok(())
    }

    /// Current state of every instance.
    pub async fn summary(&self) -> Vec<InstanceSummary> {
        let a = self.a_store.list().await;
        let b = self.b_store.list().await;
        a.iter()
            .map(|instance| InstanceSummary::of(A_KIND, instance))
            .chain(b.iter().map(|instance| InstanceSummary::of(B_KIND, instance)))
            .collect()
    }

    /// Wait until every instance is `Succeeded` or `Failed`.
    ///
    /// # Errors
    ///
    /// Returns an error if `limit` elapses first.
    pub async fn wait_settled(&self, limit: Duration) -> Result<Vec<InstanceSummary>> {
        tokio::time::timeout(limit, async {
            loop {
                let summary = self.summary().await;
                if summary.iter().all(InstanceSummary::is_settled) {
                    return summary;
                }
                tokio::time::sleep(WAIT_POLL).await;
            }
        })
        .await
        .context("Timed out waiting for instances to settle")
    }

    /// Wait until both stores are empty.
    ///
    /// # Errors
    ///
    /// Returns an error if `limit` elapses first.
    pub async fn wait_removed(&self, limit: Duration) -> Result<()> {
        tokio::time::timeout(limit, async {
            while !(self.a_store.is_empty().await && self.b_store.is_empty().await) {
                tokio::time::sleep(WAIT_POLL).await;
            }
        })
        .await
        .context("Timed out waiting for instances to be removed")
    }

    /// Stop both loops and wait for their tasks.
    pub async fn shutdown(self) {
        self.stoppers.iter().for_each(LoopStopper::stop);
        // Watch tasks only end with their channel.
        self.watches.iter().for_each(JoinHandle::abort);
        for task in self.loops {
            if let Err(e) = task.await {
                warn!(error = %e, "Reconciliation loop task did not finish cleanly");
            }
        }
        info!("Operator stopped");
    }
}

async fn apply_entry<S: ResourceSpec>(
    store: &InMemoryInstanceStore<S>,
    entry: &ManifestEntry<S>,
) -> Result<()> {
    match store.create(entry.to_instance()).await {
        Ok(created) => {
            debug!(key = %created.key(), "Instance created");
            Ok(())
        }
        Err(ReconcileError::AlreadyExists { key }) => {
            store
                .apply_spec(&key, entry.spec.clone())
                .await
                .with_context(|| format!("Failed to update {key}"))?;
            debug!(key = %key, "Instance spec updated");
            Ok(())
        }
        Err(e) => Err(e).context("Failed to create instance"),
    }
}

async fn request_deletion<S: ResourceSpec>(
    store: &InMemoryInstanceStore<S>,
    instance: &ManagedInstance<S>,
) -> Result<()> {
    let key = instance.key();
    store
        .request_deletion(&key)
        .await
        .with_context(|| format!("Failed to delete {key}"))
}
