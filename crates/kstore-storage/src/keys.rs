//! Storage key layout.
//!
//! Every object lives at
//!
//! ```text
//! prefix[/tenant]/namespace/collection/name
//! ```
//!
//! Cluster-scoped objects use the reserved namespace segment [`CLUSTER_SEGMENT`].
//! The collection segment is the group-qualified collection name (`plural` or
//! `plural.group`), so all versions of a collection share one key space.

use serde::{Deserialize, Serialize};

use kstore_types::CollectionIdentity;

use crate::error::{StorageError, StorageResult};

/// Namespace segment used for cluster-scoped objects.
///
/// Namespace names may not contain `_`, so this cannot collide with a real
/// namespace.
pub const CLUSTER_SEGMENT: &str = "_cluster";

/// Key-space partitioning settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Fixed leading segment of every key.
    pub prefix: String,
    /// Optional tenant partition inserted after the prefix.
    pub tenant: Option<String>,
    /// Namespace used when a namespaced call does not name one.
    pub default_namespace: String,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            prefix: "/registry".to_string(),
            tenant: None,
            default_namespace: "default".to_string(),
        }
    }
}

/// The decomposed form of an object key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyParts {
    pub tenant: Option<String>,
    /// Empty for cluster-scoped objects.
    pub namespace: String,
    pub collection: String,
    pub name: Option<String>,
}

/// Pure key derivation for one configured key space.
#[derive(Clone, Debug)]
pub struct KeyScheme {
    config: KeyConfig,
    root: String,
}

impl KeyScheme {
    pub fn new(config: KeyConfig) -> StorageResult<Self> {
        let prefix = config.prefix.trim_end_matches('/');
        if !prefix.starts_with('/') {
            return Err(StorageError::BadRequest(format!(
                "key prefix must start with '/': {:?}",
                config.prefix
            )));
        }
        let mut root = prefix.to_string();
        if let Some(tenant) = &config.tenant {
            validate_segment("tenant", tenant)?;
            root.push('/');
            root.push_str(tenant);
        }
        Ok(Self { config, root })
    }

    pub fn config(&self) -> &KeyConfig {
        &self.config
    }

    pub fn default_namespace(&self) -> &str {
        &self.config.default_namespace
    }

    /// `prefix[/tenant]/`, covering every object in this key space.
    pub fn root_prefix(&self) -> String {
        format!("{}/", self.root)
    }

    /// Prefix covering every object in one namespace.
    pub fn namespace_prefix(&self, namespace: &str) -> StorageResult<String> {
        Ok(format!("{}/{}/", self.root, namespace_segment(namespace)?))
    }

    /// Prefix covering one collection within one namespace.
    pub fn collection_prefix(
        &self,
        collection: &CollectionIdentity,
        namespace: &str,
    ) -> StorageResult<String> {
        Ok(format!(
            "{}/{}/{}/",
            self.root,
            namespace_segment(namespace)?,
            collection.qualified_name()
        ))
    }

    /// Full key for one object.
    pub fn object_key(
        &self,
        collection: &CollectionIdentity,
        namespace: &str,
        name: &str,
    ) -> StorageResult<String> {
        validate_name(name)?;
        Ok(format!("{}{}", self.collection_prefix(collection, namespace)?, name))
    }

    /// Check that `key` belongs to this key space.
    pub fn validate(&self, key: &str) -> StorageResult<()> {
        if !key.starts_with(&self.root_prefix()) {
            let expected = match &self.config.tenant {
                Some(t) => format!("tenant {t:?} prefix {:?}", self.root),
                None => format!("prefix {:?}", self.root),
            };
            return Err(StorageError::BadRequest(format!(
                "key {key:?} does not carry {expected}"
            )));
        }
        Ok(())
    }

    /// Split a key or prefix produced by this scheme back into its parts.
    pub fn parse(&self, key: &str) -> StorageResult<KeyParts> {
        self.validate(key)?;
        let rest = &key[self.root.len() + 1..];
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        let segments: Vec<&str> = rest.split('/').collect();
        let (namespace, collection, name) = match segments.as_slice() {
            [ns, coll] => (*ns, *coll, None),
            [ns, coll, name] => (*ns, *coll, Some(name.to_string())),
            _ => {
                return Err(StorageError::BadRequest(format!(
                    "key {key:?} is not of the form namespace/collection[/name]"
                )))
            }
        };
        if namespace.is_empty() || collection.is_empty() {
            return Err(StorageError::BadRequest(format!("key {key:?} has empty segments")));
        }
        let namespace = if namespace == CLUSTER_SEGMENT {
            String::new()
        } else {
            namespace.to_string()
        };
        Ok(KeyParts {
            tenant: self.config.tenant.clone(),
            namespace,
            collection: collection.to_string(),
            name,
        })
    }
}

fn namespace_segment(namespace: &str) -> StorageResult<&str> {
    if namespace.is_empty() {
        return Ok(CLUSTER_SEGMENT);
    }
    let valid = namespace
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    if !valid {
        return Err(StorageError::BadRequest(format!(
            "invalid namespace {namespace:?}: only lowercase alphanumerics, '-' and '.' are allowed"
        )));
    }
    Ok(namespace)
}

/// Object names must be non-empty and must not contain `/`.
pub fn validate_name(name: &str) -> StorageResult<()> {
    validate_segment("name", name)
}

fn validate_segment(what: &str, value: &str) -> StorageResult<()> {
    if value.is_empty() {
        return Err(StorageError::BadRequest(format!("{what} must not be empty")));
    }
    if value.contains('/') {
        return Err(StorageError::BadRequest(format!("{what} {value:?} must not contain '/'")));
    }
    if value == "." || value == ".." {
        return Err(StorageError::BadRequest(format!("{what} {value:?} is reserved")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn widgets() -> CollectionIdentity {
        CollectionIdentity::new("apps.example.io", "v1", "widgets")
    }

    #[test]
    fn default_layout() {
        let keys = KeyScheme::new(KeyConfig::default()).unwrap();
        assert_eq!(
            keys.object_key(&widgets(), "default", "a").unwrap(),
            "/registry/default/widgets.apps.example.io/a"
        );
        assert_eq!(
            keys.object_key(&CollectionIdentity::new("", "v1", "events"), "ns", "e").unwrap(),
            "/registry/ns/events/e"
        );
        assert_eq!(keys.root_prefix(), "/registry/");
    }

    #[test]
    fn cluster_scoped_uses_reserved_segment() {
        let keys = KeyScheme::new(KeyConfig::default()).unwrap();
        let key = keys.object_key(&widgets(), "", "w").unwrap();
        assert_eq!(key, "/registry/_cluster/widgets.apps.example.io/w");
        let parts = keys.parse(&key).unwrap();
        assert_eq!(parts.namespace, "");
        assert_eq!(parts.name.as_deref(), Some("w"));
    }

    #[test]
    fn tenant_partition() {
        let keys = KeyScheme::new(KeyConfig {
            tenant: Some("acme".into()),
            ..KeyConfig::default()
        })
        .unwrap();
        let key = keys.object_key(&widgets(), "default", "a").unwrap();
        assert_eq!(key, "/registry/acme/default/widgets.apps.example.io/a");
        assert!(keys.validate(&key).is_ok());

        let err = keys.validate("/registry/default/widgets.apps.example.io/a").unwrap_err();
        assert!(err.is_bad_request());
    }

    #[test]
    fn custom_prefix_trailing_slash() {
        let keys = KeyScheme::new(KeyConfig {
            prefix: "/data/".into(),
            ..KeyConfig::default()
        })
        .unwrap();
        assert_eq!(keys.root_prefix(), "/data/");
        assert!(KeyScheme::new(KeyConfig {
            prefix: "data".into(),
            ..KeyConfig::default()
        })
        .is_err());
    }

    #[test]
    fn invalid_segments() {
        let keys = KeyScheme::new(KeyConfig::default()).unwrap();
        assert!(keys.object_key(&widgets(), "default", "").is_err());
        assert!(keys.object_key(&widgets(), "default", "a/b").is_err());
        assert!(keys.object_key(&widgets(), "Bad_NS", "a").is_err());
        assert!(keys.parse("/registry/only-one").is_err());
    }

    #[test]
    fn prefixes_do_not_overlap_sibling_collections() {
        let keys = KeyScheme::new(KeyConfig::default()).unwrap();
        let prefix = keys
            .collection_prefix(&CollectionIdentity::new("", "v1", "widget"), "default")
            .unwrap();
        let other = keys
            .object_key(&CollectionIdentity::new("", "v1", "widgets"), "default", "a")
            .unwrap();
        assert!(!other.starts_with(&prefix));
    }

    proptest! {
        #[test]
        fn object_keys_parse_back(
            ns in "[a-z0-9][a-z0-9-]{0,10}",
            name in "[A-Za-z0-9._-]{1,16}",
            tenant in proptest::option::of("[a-z]{1,8}"),
        ) {
            prop_assume!(name != "." && name != "..");
            let keys = KeyScheme::new(KeyConfig { tenant: tenant.clone(), ..KeyConfig::default() }).unwrap();
            let key = keys.object_key(&widgets(), &ns, &name).unwrap();
            let parts = keys.parse(&key).unwrap();
            prop_assert_eq!(parts.tenant, tenant);
            prop_assert_eq!(parts.namespace, ns);
            prop_assert_eq!(parts.collection, "widgets.apps.example.io");
            prop_assert_eq!(parts.name, Some(name));
        }

        #[test]
        fn object_key_is_under_its_prefixes(
            ns in "[a-z]{1,8}",
            name in "[a-z0-9]{1,8}",
        ) {
            let keys = KeyScheme::new(KeyConfig::default()).unwrap();
            let key = keys.object_key(&widgets(), &ns, &name).unwrap();
            prop_assert!(key.starts_with(&keys.collection_prefix(&widgets(), &ns).unwrap()));
            prop_assert!(key.starts_with(&keys.namespace_prefix(&ns).unwrap()));
            prop_assert!(key.starts_with(&keys.root_prefix()));
        }
    }
}
