//! Dependency resolution and readiness gating.
//!
//! A resource type declares, per instance, an optional owner and an ordered
//! list of further dependencies. Each one points at another instance and
//! carries a pure readiness accessor over that instance's status. An absent
//! referenced instance is simply not ready; a store fault while fetching it
//! is an error for the dispatch layer to retry.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::store::StatusReader;
use crate::types::{InstanceKey, ManagedInstance, ResourceSpec, Status};

/// Maps a dependency's status to "ready".
pub type ReadinessAccessor = fn(&Status) -> bool;

/// Default readiness: the dependency reconciled successfully.
#[must_use]
pub fn is_succeeded(status: &Status) -> bool {
    status.is_succeeded()
}

/// Reference to another instance plus its readiness rule.
#[derive(Clone)]
pub struct Dependency {
    key: InstanceKey,
    reader: Arc<dyn StatusReader>,
    ready: ReadinessAccessor,
}

impl Dependency {
    /// Depend on `key`, read through `reader`, ready when it succeeded.
    pub fn new(key: InstanceKey, reader: Arc<dyn StatusReader>) -> Self {
        Self {
            key,
            reader,
            ready: is_succeeded,
        }
    }

    /// Use a custom readiness accessor.
    #[must_use]
    pub fn with_readiness(mut self, ready: ReadinessAccessor) -> Self {
        self.ready = ready;
        self
    }

    /// Key of the referenced instance.
    #[must_use]
    pub const fn key(&self) -> &InstanceKey {
        &self.key
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency").field("key", &self.key).finish()
    }
}

/// Owner and dependencies declared by one instance.
#[derive(Debug, Clone, Default)]
pub struct DependencyDefinitions {
    pub owner: Option<Dependency>,
    pub dependencies: Vec<Dependency>,
}

impl DependencyDefinitions {
    /// No owner, no dependencies.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owner.is_none() && self.dependencies.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = (DependencyRole, &Dependency)> {
        self.owner
            .iter()
            .map(|owner| (DependencyRole::Owner, owner))
            .chain(
                self.dependencies
                    .iter()
                    .map(|dependency| (DependencyRole::Dependency, dependency)),
            )
    }
}

/// Per-type knowledge the engine needs beyond the operation contract.
pub trait ResourceDefinition<S: ResourceSpec>: Send + Sync {
    /// Resource kind, used in logs and events.
    fn kind(&self) -> &str;

    /// Finalizer marker guarding records of this kind.
    fn finalizer_name(&self) -> &str;

    /// Owner and dependencies of `instance`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInstance`] if the spec cannot be turned
    /// into references. The engine reports that as a `Failed` status.
    fn dependencies(&self, _instance: &ManagedInstance<S>) -> Result<DependencyDefinitions> {
        Ok(DependencyDefinitions::none())
    }
}

/// Whether a reference is the owner or an ordinary dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyRole {
    Owner,
    Dependency,
}

impl fmt::Display for DependencyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner => f.write_str("owner"),
            Self::Dependency => f.write_str("dependency"),
        }
    }
}

/// Outcome of the readiness gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Every reference is ready.
    Ready,
    /// The referenced instance does not exist.
    Missing { role: DependencyRole, key: InstanceKey },
    /// The referenced instance exists but is not ready.
    NotReady { role: DependencyRole, key: InstanceKey },
}

impl Readiness {
    /// Whether reconciliation may proceed.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Status message explaining why reconciliation is waiting.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Ready => String::new(),
            Self::Missing { role, key } => format!("waiting for {role} '{key}' to be created"),
            Self::NotReady { role, key } => format!("waiting for {role} '{key}' to be ready"),
        }
    }
}

/// Evaluate every reference in declaration order, owner first.
///
/// Stops at the first reference that is not ready.
///
/// # Errors
///
/// Returns the store error if a referenced status cannot be read.
pub async fn check_readiness(definitions: &DependencyDefinitions) -> Result<Readiness> {
    for (role, dependency) in definitions.iter() {
        let readiness = match dependency.reader.read_status(&dependency.key).await? {
            None => Readiness::Missing {
                role,
                key: dependency.key.clone(),
            },
            Some(status) if (dependency.ready)(&status) => continue,
            Some(_) => Readiness::NotReady {
                role,
                key: dependency.key.clone(),
            },
        };
        debug!(key = %dependency.key, %role, "Dependency not ready");
        return Ok(readiness);
    }
    Ok(Readiness::Ready)
}
