//! Reconciliation loop.
//!
//! Workers pull keys from a [`WorkQueue`] and hand them to a [`Reconcile`]
//! implementation. A returned interval schedules the next look; a write
//! conflict is retried at once; any other error backs off exponentially per
//! key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::duration_ms;
use crate::error::{Error, Result};
use crate::queue::WorkQueue;
use crate::reconciler::Reconcile;
use crate::store::{WatchEvent, WatchEventKind};
use crate::types::InstanceKey;

/// Configuration for the reconciliation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Number of concurrent workers.
    pub workers: usize,
    /// First retry delay after a reconcile error.
    #[serde(with = "duration_ms")]
    pub error_backoff_base: Duration,
    /// Cap on the retry delay.
    #[serde(with = "duration_ms")]
    pub error_backoff_max: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            error_backoff_base: Duration::from_millis(100),
            error_backoff_max: Duration::from_secs(60),
        }
    }
}

impl LoopConfig {
    /// Set the worker count.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Retry delay for the `attempt`-th consecutive error (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = u64::try_from(self.error_backoff_base.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.error_backoff_max.as_millis()).unwrap_or(u64::MAX);
        let delay = base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        Duration::from_millis(delay.min(max))
    }
}

/// Drives one [`Reconcile`] implementation from a work queue.
pub struct ReconciliationLoop {
    reconciler: Arc<dyn Reconcile>,
    queue: Arc<WorkQueue>,
    config: LoopConfig,
    failures: Mutex<HashMap<InstanceKey, u32>>,
}

impl ReconciliationLoop {
    /// Create a loop with its own queue.
    #[must_use]
    pub fn new(reconciler: Arc<dyn Reconcile>, config: LoopConfig) -> Self {
        Self {
            reconciler,
            queue: Arc::new(WorkQueue::new()),
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// The queue feeding the workers.
    #[must_use]
    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// Handle that stops the loop.
    #[must_use]
    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            queue: Arc::clone(&self.queue),
        }
    }

    /// Run the workers until the loop is stopped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if no workers are configured.
    pub async fn run(&self) -> Result<()> {
        if self.config.workers == 0 {
            return Err(Error::invalid_config("workers must be positive"));
        }

        info!(
            kind = self.reconciler.kind(),
            workers = self.config.workers,
            "Starting reconciliation loop"
        );
        join_all((0..self.config.workers).map(|worker| self.worker(worker))).await;
        info!(kind = self.reconciler.kind(), "Reconciliation loop stopped");
        Ok(())
    }

    async fn worker(&self, worker: usize) {
        while let Some(key) = self.queue.get().await {
            self.process(worker, &key).await;
            self.queue.done(&key).await;
        }
        debug!(worker, "Worker exiting");
    }

    async fn process(&self, worker: usize, key: &InstanceKey) {
        match self.reconciler.reconcile(key).await {
            Ok(requeue_after) => {
                self.failures.lock().await.remove(key);
                if let Some(delay) = requeue_after {
                    debug!(worker, key = %key, delay_ms = ?delay.as_millis(), "Requeue scheduled");
                    self.queue.add_after(key.clone(), delay).await;
                }
            }
            Err(e) if e.is_conflict() => {
                debug!(worker, key = %key, "Stale write, reconciling again");
                self.queue.add(key.clone()).await;
            }
            Err(e) => {
                let attempt = {
                    let mut failures = self.failures.lock().await;
                    let attempt = failures.entry(key.clone()).or_insert(0);
                    *attempt = attempt.saturating_add(1);
                    *attempt
                };
                let delay = self.config.backoff(attempt);
                warn!(
                    worker,
                    key = %key,
                    attempt,
                    delay_ms = ?delay.as_millis(),
                    error = %e,
                    "Reconcile failed, backing off"
                );
                self.queue.add_after(key.clone(), delay).await;
            }
        }
    }
}

/// Handle for stopping a running loop.
#[derive(Debug, Clone)]
pub struct LoopStopper {
    queue: Arc<WorkQueue>,
}

impl LoopStopper {
    /// Stop handing out work. Workers exit after their current key.
    pub fn stop(&self) {
        self.queue.shutdown();
    }

    /// Whether [`LoopStopper::stop`] was called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.queue.is_shutting_down()
    }
}

/// Feed added and modified keys from a store watch into `queue`.
///
/// The task ends when the watch channel closes or the queue shuts down.
pub fn spawn_watch(
    queue: Arc<WorkQueue>,
    mut events: broadcast::Receiver<WatchEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if event.kind == WatchEventKind::Deleted => {}
                Ok(event) => queue.add(event.key).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Watch lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
            if queue.is_shutting_down() {
                break;
            }
        }
    })
}
