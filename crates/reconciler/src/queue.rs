//! Deduplicating work queue of instance keys.
//!
//! A key is held at most once in the queue and is handed to at most one
//! worker at a time. Adding a key that is being processed marks it dirty; it
//! is queued again when the worker calls [`WorkQueue::done`]. Delayed adds
//! keep a single deadline per key, the earliest one requested.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

use crate::types::InstanceKey;

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<InstanceKey>,
    dirty: HashSet<InstanceKey>,
    processing: HashSet<InstanceKey>,
    scheduled: HashMap<InstanceKey, Instant>,
}

/// Work queue shared by the watch feed, the scheduler and the workers.
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    shutting_down: AtomicBool,
}

impl WorkQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `key` unless it is already waiting.
    pub async fn add(&self, key: InstanceKey) {
        if self.is_shutting_down() {
            return;
        }
        let mut state = self.state.lock().await;
        if !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            debug!(key = %key, "Key busy, marked dirty");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Queue `key` once `delay` has elapsed.
    ///
    /// If `key` already has a pending deadline that comes no later, this
    /// does nothing; an earlier deadline replaces the pending one.
    pub async fn add_after(self: &Arc<Self>, key: InstanceKey, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key).await;
            return;
        }

        let deadline = Instant::now() + delay;
        {
            let mut state = self.state.lock().await;
            if state
                .scheduled
                .get(&key)
                .is_some_and(|pending| *pending <= deadline)
            {
                return;
            }
            state.scheduled.insert(key.clone(), deadline);
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let due = {
                let mut state = queue.state.lock().await;
                let current = state.scheduled.get(&key) == Some(&deadline);
                if current {
                    state.scheduled.remove(&key);
                }
                current
            };
            if due {
                queue.add(key).await;
            }
        });
    }

    /// Number of keys with a pending delayed add.
    pub async fn scheduled_len(&self) -> usize {
        self.state.lock().await.scheduled.len()
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<InstanceKey> {
        loop {
            let notified = self.notify.notified();
            if self.is_shutting_down() {
                return None;
            }
            {
                let mut state = self.state.lock().await;
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Mark `key` as processed, queueing it again if it was added meanwhile.
    pub async fn done(&self, key: &InstanceKey) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Number of keys waiting to be handed out.
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Whether no key is waiting.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.queue.is_empty()
    }

    /// Stop handing out keys and wake every waiting worker.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether [`WorkQueue::shutdown`] was called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}
