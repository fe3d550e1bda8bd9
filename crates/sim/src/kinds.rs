//! Sample resource kinds.
//!
//! `A` stands alone. `B` names an optional owner and a list of dependencies,
//! all of them `A` instances in its own namespace.

use std::sync::Arc;

use operatify_reconciler::{
    Dependency, DependencyDefinitions, Error, InstanceKey, ManagedInstance, ResourceDefinition,
    ResourceSpec, Result, StatusReader,
};
use serde::{Deserialize, Serialize};

pub const A_KIND: &str = "A";
pub const B_KIND: &str = "B";
pub const A_FINALIZER: &str = "a.finalizers.com";
pub const B_FINALIZER: &str = "b.finalizers.com";

/// Desired state of an `A`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ASpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub string_data: String,
    #[serde(default)]
    pub int_data: i64,
}

impl ASpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

impl ResourceSpec for ASpec {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Desired state of a `B`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub string_data: String,
    #[serde(default)]
    pub int_data: i64,
    /// Name of the owning `A`; empty for none.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
    /// Names of `A` instances that must be ready first, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl BSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    #[must_use]
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }
}

impl ResourceSpec for BSpec {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ADefinition;

impl ResourceDefinition<ASpec> for ADefinition {
    fn kind(&self) -> &str {
        A_KIND
    }

    fn finalizer_name(&self) -> &str {
        A_FINALIZER
    }
}

/// Definition of `B`; reads `A` statuses to gate on readiness.
#[derive(Clone)]
pub struct BDefinition {
    a_instances: Arc<dyn StatusReader>,
}

impl BDefinition {
    pub fn new(a_instances: Arc<dyn StatusReader>) -> Self {
        Self { a_instances }
    }

    fn reference(&self, namespace: &str, name: &str) -> Dependency {
        Dependency::new(
            InstanceKey::new(namespace, name),
            Arc::clone(&self.a_instances),
        )
    }
}

impl ResourceDefinition<BSpec> for BDefinition {
    fn kind(&self) -> &str {
        B_KIND
    }

    fn finalizer_name(&self) -> &str {
        B_FINALIZER
    }

    fn dependencies(&self, instance: &ManagedInstance<BSpec>) -> Result<DependencyDefinitions> {
        let namespace = instance.metadata.namespace.as_str();
        let spec = &instance.spec;

        if spec.dependencies.iter().any(String::is_empty) {
            return Err(Error::invalid_instance(
                instance.key(),
                "dependency names must not be empty",
            ));
        }

        Ok(DependencyDefinitions {
            owner: (!spec.owner.is_empty()).then(|| self.reference(namespace, &spec.owner)),
            dependencies: spec
                .dependencies
                .iter()
                .map(|name| self.reference(namespace, name))
                .collect(),
        })
    }
}
