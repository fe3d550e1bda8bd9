//! Instance store trait and implementations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use itertools::Itertools;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{InstanceKey, ManagedInstance, ResourceSpec, Status};

/// Capacity of the watch broadcast channel.
const WATCH_CAPACITY: usize = 1024;

/// Persistent store for instances of one resource type.
///
/// Writes are guarded by optimistic concurrency: the caller's
/// `resource_version` must match the stored one or the write fails with
/// [`Error::Conflict`]. A record whose deletion was requested disappears as
/// soon as a write leaves its finalizer list empty.
#[async_trait]
pub trait InstanceStore<S: ResourceSpec>: Send + Sync {
    /// Read the latest record, `None` if absent.
    async fn get(&self, key: &InstanceKey) -> Result<Option<ManagedInstance<S>>>;

    /// Write metadata and spec. The stored status is kept.
    async fn update(&self, instance: &ManagedInstance<S>) -> Result<ManagedInstance<S>>;

    /// Write the status. Metadata and spec are kept.
    async fn update_status(&self, instance: &ManagedInstance<S>) -> Result<ManagedInstance<S>>;
}

/// Read-only status lookup used for dependency readiness.
#[async_trait]
pub trait StatusReader: Send + Sync {
    /// Status of the referenced record, `None` if absent.
    async fn read_status(&self, key: &InstanceKey) -> Result<Option<Status>>;
}

/// Kind of change observed on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Added,
    Modified,
    Deleted,
}

/// Change notification published by a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub key: InstanceKey,
}

/// In-memory instance store.
pub struct InMemoryInstanceStore<S> {
    records: RwLock<HashMap<InstanceKey, ManagedInstance<S>>>,
    watch: broadcast::Sender<WatchEvent>,
    failures: AtomicU32,
}

impl<S: ResourceSpec> InMemoryInstanceStore<S> {
    /// Create an empty store.
    pub fn new() -> Self {
        let (watch, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            records: RwLock::new(HashMap::new()),
            watch,
            failures: AtomicU32::new(0),
        }
    }

    /// Subscribe to change notifications.
    pub fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.watch.subscribe()
    }

    /// Make the next `count` reads and writes fail with a store error.
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Insert a new record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if the key is taken.
    pub async fn create(&self, instance: ManagedInstance<S>) -> Result<ManagedInstance<S>> {
        self.check_fault("create")?;
        let key = instance.key();
        let mut records = self.records.write().await;
        if records.contains_key(&key) {
            return Err(Error::already_exists(key));
        }

        let mut stored = instance;
        stored.metadata.resource_version = 1;
        stored.metadata.generation = 1;
        stored.metadata.deletion_requested_at = None;
        records.insert(key.clone(), stored.clone());
        drop(records);

        self.publish(WatchEventKind::Added, key);
        Ok(stored)
    }

    /// Replace the spec of an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the record does not exist.
    pub async fn apply_spec(&self, key: &InstanceKey, spec: S) -> Result<ManagedInstance<S>> {
        self.check_fault("apply_spec")?;
        let mut records = self.records.write().await;
        let stored = records
            .get_mut(key)
            .ok_or_else(|| Error::not_found(key.clone()))?;

        stored.spec = spec;
        stored.metadata.generation = stored.metadata.generation.saturating_add(1);
        stored.metadata.resource_version = stored.metadata.resource_version.saturating_add(1);
        let updated = stored.clone();
        drop(records);

        self.publish(WatchEventKind::Modified, key.clone());
        Ok(updated)
    }

    /// Replace the annotations of an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the record does not exist.
    pub async fn set_annotation(
        &self,
        key: &InstanceKey,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<ManagedInstance<S>> {
        self.check_fault("set_annotation")?;
        let mut records = self.records.write().await;
        let stored = records
            .get_mut(key)
            .ok_or_else(|| Error::not_found(key.clone()))?;

        stored.metadata.annotations.insert(name.into(), value.into());
        stored.metadata.resource_version = stored.metadata.resource_version.saturating_add(1);
        let updated = stored.clone();
        drop(records);

        self.publish(WatchEventKind::Modified, key.clone());
        Ok(updated)
    }

    /// Ask for a record to be deleted.
    ///
    /// A record without finalizers is removed at once; otherwise it stays
    /// readable with its deletion flag set until the last finalizer goes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the record does not exist.
    pub async fn request_deletion(&self, key: &InstanceKey) -> Result<()> {
        self.check_fault("request_deletion")?;
        let mut records = self.records.write().await;
        let stored = records
            .get_mut(key)
            .ok_or_else(|| Error::not_found(key.clone()))?;

        if stored.metadata.finalizers.is_empty() {
            records.remove(key);
            drop(records);
            debug!(key = %key, "Removed record without finalizers");
            self.publish(WatchEventKind::Deleted, key.clone());
            return Ok(());
        }

        if stored.metadata.deletion_requested_at.is_none() {
            stored.metadata.deletion_requested_at = Some(Utc::now());
            stored.metadata.resource_version = stored.metadata.resource_version.saturating_add(1);
        }
        drop(records);

        self.publish(WatchEventKind::Modified, key.clone());
        Ok(())
    }

    /// Whether a record exists.
    pub async fn contains(&self, key: &InstanceKey) -> bool {
        self.records.read().await.contains_key(key)
    }

    /// Snapshot of every record, ordered by key.
    pub async fn list(&self) -> Vec<ManagedInstance<S>> {
        self.records
            .read()
            .await
            .values()
            .cloned()
            .sorted_by(|a, b| a.key().cmp(&b.key()))
            .collect_vec()
    }

    /// Number of records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn check_fault(&self, operation: &str) -> Result<()> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            Err(Error::store_failed(operation, "injected store fault"))
        } else {
            Ok(())
        }
    }

    fn publish(&self, kind: WatchEventKind, key: InstanceKey) {
        // No subscribers is fine.
        let _ = self.watch.send(WatchEvent { kind, key });
    }

    async fn write_with<F>(
        &self,
        operation: &str,
        instance: &ManagedInstance<S>,
        apply: F,
    ) -> Result<ManagedInstance<S>>
    where
        F: FnOnce(&mut ManagedInstance<S>, &ManagedInstance<S>) + Send,
    {
        self.check_fault(operation)?;
        let key = instance.key();
        let mut records = self.records.write().await;
        let stored = records
            .get_mut(&key)
            .ok_or_else(|| Error::not_found(key.clone()))?;

        let expected = instance.metadata.resource_version;
        let actual = stored.metadata.resource_version;
        if expected != actual {
            return Err(Error::conflict(key, expected, actual));
        }

        apply(stored, instance);
        stored.metadata.resource_version = actual.saturating_add(1);
        let updated = stored.clone();

        if updated.metadata.is_deletion_requested() && updated.metadata.finalizers.is_empty() {
            records.remove(&key);
            drop(records);
            debug!(key = %key, "Finalizers cleared, removed record");
            self.publish(WatchEventKind::Deleted, key);
        } else {
            drop(records);
            self.publish(WatchEventKind::Modified, key);
        }
        Ok(updated)
    }
}

impl<S: ResourceSpec> Default for InMemoryInstanceStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: ResourceSpec> InstanceStore<S> for InMemoryInstanceStore<S> {
    async fn get(&self, key: &InstanceKey) -> Result<Option<ManagedInstance<S>>> {
        self.check_fault("get")?;
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn update(&self, instance: &ManagedInstance<S>) -> Result<ManagedInstance<S>> {
        self.write_with("update", instance, |stored, incoming| {
            if stored.spec_differs(incoming) {
                stored.metadata.generation = stored.metadata.generation.saturating_add(1);
            }
            stored.spec = incoming.spec.clone();
            stored.metadata.annotations = incoming.metadata.annotations.clone();
            stored.metadata.finalizers = incoming.metadata.finalizers.clone();
        })
        .await
    }

    async fn update_status(&self, instance: &ManagedInstance<S>) -> Result<ManagedInstance<S>> {
        self.write_with("update_status", instance, |stored, incoming| {
            stored.status = incoming.status.clone();
        })
        .await
    }
}

#[async_trait]
impl<S: ResourceSpec> StatusReader for InMemoryInstanceStore<S> {
    async fn read_status(&self, key: &InstanceKey) -> Result<Option<Status>> {
        self.check_fault("read_status")?;
        Ok(self
            .records
            .read()
            .await
            .get(key)
            .map(|instance| instance.status.clone()))
    }
}

impl<S: ResourceSpec> ManagedInstance<S> {
    fn spec_differs(&self, other: &Self) -> bool {
        serde_json::to_value(&self.spec).ok() != serde_json::to_value(&other.spec).ok()
    }
}
