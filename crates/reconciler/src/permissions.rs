//! Access permissions derived from the permission annotation.
//!
//! The annotation value is a string whose characters name the operations the
//! engine may perform against the external resource: `C` (create), `U`
//! (update) and `D` (delete). A missing annotation grants everything; any
//! other value grants exactly the operations it names, so `"none"` grants
//! nothing.

use std::collections::BTreeMap;
use std::fmt;

use crate::types::OperationKind;

/// Default annotation base name.
pub const DEFAULT_ANNOTATION_BASE: &str = "operatify.io";

/// Build the permission annotation key for an annotation base name.
#[must_use]
pub fn permission_annotation_key(base: &str) -> String {
    format!("{base}/access-permissions")
}

/// Operations the engine is allowed to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    create: bool,
    update: bool,
    delete: bool,
}

impl Permissions {
    /// Every operation permitted.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            create: true,
            update: true,
            delete: true,
        }
    }

    /// No operation permitted.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            create: false,
            update: false,
            delete: false,
        }
    }

    /// Parse an annotation value.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        Self {
            create: value.contains('C'),
            update: value.contains('U'),
            delete: value.contains('D'),
        }
    }

    /// Read the permissions from an annotation map.
    #[must_use]
    pub fn from_annotations(annotations: &BTreeMap<String, String>, key: &str) -> Self {
        annotations
            .get(key)
            .map_or_else(Self::all, |value| Self::parse(value))
    }

    /// Whether `operation` is permitted.
    #[must_use]
    pub const fn allows(self, operation: OperationKind) -> bool {
        match operation {
            OperationKind::Create => self.create,
            OperationKind::Update => self.update,
            OperationKind::Delete => self.delete,
        }
    }

    /// Status message for a denied operation.
    #[must_use]
    pub fn denied_message(operation: OperationKind) -> String {
        format!(
            "permission to {} external resource is not set",
            operation.verb()
        )
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let codes: String = [(self.create, 'C'), (self.update, 'U'), (self.delete, 'D')]
            .into_iter()
            .filter_map(|(allowed, code)| allowed.then_some(code))
            .collect();
        f.write_str(&codes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotations(value: &str) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert(
            permission_annotation_key(DEFAULT_ANNOTATION_BASE),
            value.to_string(),
        );
        map
    }

    #[test]
    fn test_missing_annotation_grants_everything() {
        let key = permission_annotation_key(DEFAULT_ANNOTATION_BASE);
        let permissions = Permissions::from_annotations(&BTreeMap::new(), &key);
        assert_eq!(permissions, Permissions::all());
    }

    #[test]
    fn test_create_only() {
        let key = permission_annotation_key(DEFAULT_ANNOTATION_BASE);
        let permissions = Permissions::from_annotations(&annotations("C"), &key);
        assert!(permissions.allows(OperationKind::Create));
        assert!(!permissions.allows(OperationKind::Update));
        assert!(!permissions.allows(OperationKind::Delete));
    }

    #[test]
    fn test_none_grants_nothing() {
        assert_eq!(Permissions::parse("none"), Permissions::none());
        assert_eq!(Permissions::parse(""), Permissions::none());
    }

    #[test]
    fn test_order_does_not_matter() {
        assert_eq!(Permissions::parse("DUC"), Permissions::all());
        assert_eq!(Permissions::parse("DC").to_string(), "CD");
    }

    #[test]
    fn test_denied_message() {
        assert_eq!(
            Permissions::denied_message(OperationKind::Update),
            "permission to update external resource is not set"
        );
    }

    #[test]
    fn test_key_uses_base() {
        assert_eq!(
            permission_annotation_key("example.com"),
            "example.com/access-permissions"
        );
    }
}
