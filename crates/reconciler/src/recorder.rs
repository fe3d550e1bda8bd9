//! User-facing reconcile events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::types::InstanceKey;

/// Severity of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

/// Something an operator of the resource should be able to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileEvent {
    pub kind: String,
    pub key: InstanceKey,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ReconcileEvent {
    /// A normal event.
    pub fn normal(
        kind: impl Into<String>,
        key: InstanceKey,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(kind, key, EventType::Normal, reason, message)
    }

    /// A warning event.
    pub fn warning(
        kind: impl Into<String>,
        key: InstanceKey,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(kind, key, EventType::Warning, reason, message)
    }

    fn new(
        kind: impl Into<String>,
        key: InstanceKey,
        event_type: EventType,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            key,
            event_type,
            reason: reason.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Sink for reconcile events.
pub trait EventRecorder: Send + Sync {
    /// Record an event. Must not block.
    fn record(&self, event: ReconcileEvent);
}

/// Writes events to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, event: ReconcileEvent) {
        match event.event_type {
            EventType::Normal => info!(
                kind = %event.kind,
                key = %event.key,
                reason = %event.reason,
                "{}",
                event.message
            ),
            EventType::Warning => warn!(
                kind = %event.kind,
                key = %event.key,
                reason = %event.reason,
                "{}",
                event.message
            ),
        }
    }
}

/// Fans events out to subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastRecorder {
    tx: broadcast::Sender<ReconcileEvent>,
}

impl BroadcastRecorder {
    /// Create a recorder buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events recorded from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ReconcileEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastRecorder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventRecorder for BroadcastRecorder {
    fn record(&self, event: ReconcileEvent) {
        // Dropped when nobody listens.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn test_broadcast_recorder() {
        let recorder = BroadcastRecorder::default();
        let mut rx = recorder.subscribe();

        recorder.record(ReconcileEvent::warning(
            "A",
            InstanceKey::new("default", "a-1"),
            "CreateFailed",
            "error creating resource",
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::Warning);
        assert_eq!(event.reason, "CreateFailed");
    }

    #[test]
    fn test_record_without_subscribers() {
        let recorder = BroadcastRecorder::new(0);
        recorder.record(ReconcileEvent::normal(
            "A",
            InstanceKey::new("default", "a-1"),
            "Created",
            "created",
        ));
    }
}
