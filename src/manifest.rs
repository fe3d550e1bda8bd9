//! YAML manifests of instances to apply.
//!
//! ```yaml
//! a:
//!   - name: a-1
//!     spec: { id: a-1, stringData: hello }
//! b:
//!   - name: b-1
//!     annotations: { operatify.io/access-permissions: CU }
//!     spec: { id: b-1, owner: a-1 }
//! behaviours:
//!   b-1:
//!     - { operation: CreateFail, count: 1 }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use operatify_reconciler::{ManagedInstance, ObjectMeta, ResourceSpec};
use operatify_sim::{ASpec, BSpec, Behaviour};
use serde::{Deserialize, Serialize};

fn default_namespace() -> String {
    "default".to_string()
}

/// One declared instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "S: ResourceSpec"))]
pub struct ManifestEntry<S> {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub spec: S,
}

impl<S: ResourceSpec> ManifestEntry<S> {
    /// Fresh record for this entry.
    #[must_use]
    pub fn to_instance(&self) -> ManagedInstance<S> {
        let metadata = ObjectMeta {
            annotations: self.annotations.clone(),
            ..ObjectMeta::new(self.namespace.clone(), self.name.clone())
        };
        ManagedInstance::new(metadata, self.spec.clone())
    }
}

/// Instances of both sample kinds plus backend behaviours keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub a: Vec<ManifestEntry<ASpec>>,
    #[serde(default)]
    pub b: Vec<ManifestEntry<BSpec>>,
    #[serde(default)]
    pub behaviours: BTreeMap<String, Vec<Behaviour>>,
}

impl Manifest {
    /// Parse a YAML document.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed YAML or duplicate names.
    pub fn from_yaml_str(input: &str) -> Result<Self> {
        let manifest: Self = serde_yaml::from_str(input).context("Failed to parse manifest")?;
        manifest.validate()
    }

    /// Load a manifest file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let input = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        Self::from_yaml_str(&input).with_context(|| format!("Invalid manifest {}", path.display()))
    }

    /// Total number of declared instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.a.len() + self.b.len()
    }

    /// Whether no instance is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.a.is_empty() && self.b.is_empty()
    }

    fn validate(self) -> Result<Self> {
        check_unique("a", self.a.iter().map(|e| (&e.namespace, &e.name)))?;
        check_unique("b", self.b.iter().map(|e| (&e.namespace, &e.name)))?;
        Ok(self)
    }
}

fn check_unique<'a>(
    kind: &str,
    keys: impl Iterator<Item = (&'a String, &'a String)>,
) -> Result<()> {
    let mut seen = std::collections::BTreeSet::new();
    for (namespace, name) in keys {
        anyhow::ensure!(
            seen.insert((namespace, name)),
            "duplicate {kind} instance {namespace}/{name}"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::indexing_slicing)]

    use operatify_sim::Operation;

    use super::*;

    const SAMPLE: &str = r"
a:
  - name: a-1
    spec: { id: a-1, stringData: hello, intData: 2 }
b:
  - name: b-1
    namespace: team
    annotations: { operatify.io/access-permissions: CU }
    spec: { id: b-1, owner: a-1, dependencies: [a-2] }
behaviours:
  b-1:
    - { operation: CreateFail, count: 1 }
";

    #[test]
    fn test_parse_sample() {
        let manifest = Manifest::from_yaml_str(SAMPLE).unwrap();

        assert_eq!(manifest.len(), 2);
        let a = &manifest.a[0];
        assert_eq!(a.namespace, "default");
        assert_eq!(a.spec.string_data, "hello");
        assert_eq!(a.spec.int_data, 2);

        let b = manifest.b[0].to_instance();
        assert_eq!(b.key().to_string(), "team/b-1");
        assert_eq!(b.spec.dependencies, vec!["a-2".to_string()]);
        assert_eq!(
            b.metadata.annotations.get("operatify.io/access-permissions"),
            Some(&"CU".to_string())
        );

        let behaviours = &manifest.behaviours["b-1"];
        assert_eq!(
            behaviours,
            &vec![Behaviour::new(Operation::CreateFail).times(1)]
        );
    }

    #[test]
    fn test_duplicates_rejected() {
        let input = "a:\n  - { name: a-1, spec: { id: x } }\n  - { name: a-1, spec: { id: y } }\n";
        assert!(Manifest::from_yaml_str(input).is_err());
    }

    #[test]
    fn test_empty_manifest() {
        assert!(Manifest::from_yaml_str("{}").unwrap().is_empty());
    }
}
