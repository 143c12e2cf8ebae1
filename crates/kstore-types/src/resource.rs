use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::identity::{ObjectKey, TypeIdentity};
use crate::meta::{ListMeta, ObjectMeta, ObjectReference};

/// A typed record that can be stored, listed and watched.
///
/// Implementors provide their static [`TypeIdentity`] and access to their
/// [`ObjectMeta`]. The payload is everything else the type serializes;
/// by convention user data lives under `spec` and observed state under
/// `status`.
///
/// `Default` is the zero value used when an optional read finds nothing.
pub trait Resource: Serialize + DeserializeOwned + Clone + Default + Send + Sync + 'static {
    /// The schema identity of this type.
    fn type_identity() -> TypeIdentity;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Namespace + name of this object.
    fn object_key(&self) -> ObjectKey {
        self.meta().key()
    }
}

/// Anything an event can point at.
pub trait Referent {
    fn object_reference(&self) -> ObjectReference;
}

impl<T: Resource> Referent for T {
    fn object_reference(&self) -> ObjectReference {
        ObjectReference::from_meta(&T::type_identity(), self.meta())
    }
}

impl Referent for ObjectReference {
    fn object_reference(&self) -> ObjectReference {
        self.clone()
    }
}

/// Typed accessor over list containers.
pub trait ListItems {
    type Item;

    fn items(&self) -> &[Self::Item];

    fn into_items(self) -> Vec<Self::Item>;

    fn len(&self) -> usize {
        self.items().len()
    }

    fn is_empty(&self) -> bool {
        self.items().is_empty()
    }
}

/// List container returned by list calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct ResourceList<T> {
    #[serde(default)]
    pub metadata: ListMeta,
    #[serde(default)]
    pub items: Vec<T>,
}

impl<T> Default for ResourceList<T> {
    fn default() -> Self {
        Self {
            metadata: ListMeta::default(),
            items: Vec::new(),
        }
    }
}

impl<T> ResourceList<T> {
    pub fn new(resource_version: impl Into<String>, items: Vec<T>) -> Self {
        Self {
            metadata: ListMeta {
                resource_version: resource_version.into(),
            },
            items,
        }
    }
}

impl<T> ListItems for ResourceList<T> {
    type Item = T;

    fn items(&self) -> &[T] {
        &self.items
    }

    fn into_items(self) -> Vec<T> {
        self.items
    }
}
