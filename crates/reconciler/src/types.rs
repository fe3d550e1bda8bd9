//! Core types for the reconciler.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Domain-specific status fields merged into a persisted status.
pub type StatusPayload = serde_json::Map<String, serde_json::Value>;

/// Status keys owned by the engine; payloads may not overwrite them.
pub const RESERVED_STATUS_KEYS: [&str; 3] = ["state", "message", "operation"];

/// Upper bound on the length of a persisted status message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 512;

/// Namespaced name of an instance in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    pub namespace: String,
    pub name: String,
}

impl InstanceKey {
    /// Create a key from a namespace and a name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Record metadata maintained by the store and the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    /// Set by the store when deletion is requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_requested_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped on every write.
    #[serde(default)]
    pub resource_version: u64,
    /// Bumped on every spec change.
    #[serde(default)]
    pub generation: u64,
}

impl ObjectMeta {
    /// Create metadata for a new record.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Attach an annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// The store key for this record.
    #[must_use]
    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(self.namespace.clone(), self.name.clone())
    }

    /// Whether the owning store has been asked to delete this record.
    #[must_use]
    pub const fn is_deletion_requested(&self) -> bool {
        self.deletion_requested_at.is_some()
    }
}

/// Desired-state fields of a resource type.
///
/// Every spec carries an opaque identifier that is handed to the resource
/// manager; it is distinct from the store key.
pub trait ResourceSpec:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Identifier of the external resource.
    fn id(&self) -> &str;
}

/// One record of a managed resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedInstance<S> {
    pub metadata: ObjectMeta,
    pub spec: S,
    #[serde(default)]
    pub status: Status,
}

impl<S: ResourceSpec> ManagedInstance<S> {
    /// Create a record with an empty status.
    pub fn new(metadata: ObjectMeta, spec: S) -> Self {
        Self {
            metadata,
            spec,
            status: Status::default(),
        }
    }

    /// The store key for this record.
    #[must_use]
    pub fn key(&self) -> InstanceKey {
        self.metadata.key()
    }

    /// Identifier of the external resource.
    #[must_use]
    pub fn id(&self) -> &str {
        self.spec.id()
    }
}

/// Top-level lifecycle state persisted on an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReconcileState {
    /// A dependency is not ready yet.
    Pending,
    /// An apply or delete is awaiting verification.
    InProgress,
    /// The external resource matches the declared state.
    Succeeded,
    /// The most recent cycle failed; see the status message.
    Failed,
}

impl ReconcileState {
    /// Whether the state only changes on drift or an external edit.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::InProgress => write!(f, "InProgress"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Mutating operation of the operation contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    /// Lowercase verb used in messages.
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Progressive form used in messages ("creating").
    #[must_use]
    pub const fn progressive(self) -> &'static str {
        match self {
            Self::Create => "creating",
            Self::Update => "updating",
            Self::Delete => "deleting",
        }
    }

    /// Past form used in messages ("created").
    #[must_use]
    pub const fn past(self) -> &'static str {
        match self {
            Self::Create => "created",
            Self::Update => "updated",
            Self::Delete => "deleted",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Persisted status of an instance. Written only by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ReconcileState>,
    #[serde(default)]
    pub message: String,
    /// Last mutating operation the engine issued for this instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<OperationKind>,
    /// Resource-type specific fields returned by the resource manager.
    #[serde(flatten)]
    pub payload: StatusPayload,
}

impl Status {
    /// Whether the persisted state is `Succeeded`.
    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        self.state == Some(ReconcileState::Succeeded)
    }

    /// Merge a payload, leaving engine-owned keys untouched.
    pub fn merge_payload(&mut self, payload: StatusPayload) {
        payload
            .into_iter()
            .filter(|(key, _)| !RESERVED_STATUS_KEYS.contains(&key.as_str()))
            .for_each(|(key, value)| {
                self.payload.insert(key, value);
            });
    }
}

/// Clip a message to [`MAX_MESSAGE_CHARS`] characters.
#[must_use]
pub fn bounded_message(message: &str) -> String {
    message.chars().take(MAX_MESSAGE_CHARS).collect()
}

/// Condition of the external resource as reported by `verify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerifyResult {
    Missing,
    InProgress,
    Ready,
    UpdateRequired,
    Deleting,
    Error,
}

impl fmt::Display for VerifyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Missing => "Missing",
            Self::InProgress => "InProgress",
            Self::Ready => "Ready",
            Self::UpdateRequired => "UpdateRequired",
            Self::Deleting => "Deleting",
            Self::Error => "Error",
        };
        f.write_str(name)
    }
}

/// Outcome of `create` or `update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApplyResult {
    Succeeded,
    AwaitingVerification,
    Error,
}

/// Outcome of `delete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeleteResult {
    Succeeded,
    AwaitingVerification,
    Error,
}

/// Response of `create` and `update`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyResponse {
    pub result: ApplyResult,
    pub payload: Option<StatusPayload>,
}

impl ApplyResponse {
    /// Response without a payload.
    #[must_use]
    pub const fn new(result: ApplyResult) -> Self {
        Self {
            result,
            payload: None,
        }
    }

    /// Attach a status payload.
    #[must_use]
    pub fn with_payload(mut self, payload: StatusPayload) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Response of `verify`.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyResponse {
    pub result: VerifyResult,
    pub payload: Option<StatusPayload>,
}

impl VerifyResponse {
    /// Response without a payload.
    #[must_use]
    pub const fn new(result: VerifyResult) -> Self {
        Self {
            result,
            payload: None,
        }
    }

    /// Attach a status payload.
    #[must_use]
    pub fn with_payload(mut self, payload: StatusPayload) -> Self {
        self.payload = Some(payload);
        self
    }
}
