use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Identifies a resource's schema: Group, Version, Kind.
///
/// The core group is the empty string, so `v1/Event` has `group == ""`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeIdentity {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl TypeIdentity {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Parse from the `apiVersion` + `kind` pair carried on serialized objects.
    pub fn from_api_version(api_version: &str, kind: impl Into<String>) -> Result<Self, TypeError> {
        let (group, version) = match api_version.split_once('/') {
            Some((g, v)) if !g.is_empty() && !v.is_empty() && !v.contains('/') => (g, v),
            None if !api_version.is_empty() => ("", api_version),
            _ => return Err(TypeError::InvalidApiVersion(api_version.to_string())),
        };
        Ok(Self::new(group, version, kind))
    }

    /// The `group/version` string, or just `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// The kind used for list containers of this type.
    pub fn list_kind(&self) -> String {
        format!("{}List", self.kind)
    }
}

impl fmt::Display for TypeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

/// Identifies a queryable collection: Group, Version, plural collection name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionIdentity {
    pub group: String,
    pub version: String,
    pub collection: String,
}

impl CollectionIdentity {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            collection: collection.into(),
        }
    }

    /// `plural` for the core group, `plural.group` otherwise.
    ///
    /// This is the group-qualified name used as the collection segment of
    /// storage keys; the version is deliberately absent so every version of
    /// a collection shares one key space.
    pub fn qualified_name(&self) -> String {
        if self.group.is_empty() {
            self.collection.clone()
        } else {
            format!("{}.{}", self.collection, self.group)
        }
    }
}

impl fmt::Display for CollectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}.{}", self.collection, self.version)
        } else {
            write!(f, "{}.{}.{}", self.collection, self.version, self.group)
        }
    }
}

/// Namespace + name addressing a single object.
///
/// `namespace` is empty for cluster-scoped resources.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key for a cluster-scoped object.
    pub fn cluster(name: impl Into<String>) -> Self {
        Self::new("", name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}
