//! Type registry: maps Rust types and collections to their resource descriptors.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use kstore_types::{CollectionIdentity, Resource, TypeIdentity};

use crate::descriptor::ResourceDescriptor;
use crate::error::{RegistryError, RegistryResult};
use crate::scheme::Scheme;

/// Registry behaviour settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Match short names and categories case-sensitively.
    pub case_sensitive_short_names: bool,
    /// Categories added to every registered descriptor.
    pub default_categories: Vec<String>,
}

#[derive(Debug, Default)]
struct RegistryState {
    resources: BTreeMap<CollectionIdentity, ResourceDescriptor>,
    short_names: HashMap<String, CollectionIdentity>,
    categories: BTreeMap<String, BTreeSet<CollectionIdentity>>,
    kind_to_collection: HashMap<TypeIdentity, CollectionIdentity>,
    collection_to_kind: HashMap<CollectionIdentity, TypeIdentity>,
}

/// Maps kinds to collections and holds each collection's query metadata.
///
/// All state sits behind a single `RwLock`: lookups run concurrently,
/// registration and removal are exclusive. The registry also owns the
/// [`Scheme`] used to build zero values by type identity.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    state: RwLock<RegistryState>,
    scheme: Scheme,
    config: RegistryConfig,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            scheme: Scheme::new(),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    fn read(&self) -> RegistryResult<RwLockReadGuard<'_, RegistryState>> {
        self.state
            .read()
            .map_err(|e| RegistryError::Internal(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> RegistryResult<RwLockWriteGuard<'_, RegistryState>> {
        self.state
            .write()
            .map_err(|e| RegistryError::Internal(format!("lock poisoned: {e}")))
    }

    fn normalize(&self, name: &str) -> String {
        if self.config.case_sensitive_short_names {
            name.to_string()
        } else {
            name.to_lowercase()
        }
    }

    /// Register a collection and its descriptor.
    pub fn register_resource(
        &self,
        collection: CollectionIdentity,
        mut descriptor: ResourceDescriptor,
    ) -> RegistryResult<()> {
        for (field, value) in [
            ("singular", &descriptor.singular),
            ("plural", &descriptor.plural),
            ("kind", &descriptor.kind),
        ] {
            if value.is_empty() {
                return Err(RegistryError::MissingField { collection, field });
            }
        }
        if collection.version.is_empty() {
            return Err(RegistryError::MissingField {
                collection,
                field: "version",
            });
        }
        if descriptor.list_kind.is_empty() {
            descriptor.list_kind = format!("{}List", descriptor.kind);
        }
        for category in &self.config.default_categories {
            if !descriptor.categories.contains(category) {
                descriptor.categories.push(category.clone());
            }
        }
        let type_identity = TypeIdentity::new(
            collection.group.clone(),
            collection.version.clone(),
            descriptor.kind.clone(),
        );

        let mut state = self.write()?;
        if state.resources.contains_key(&collection) {
            return Err(RegistryError::AlreadyRegistered(collection));
        }
        if let Some(existing) = state.kind_to_collection.get(&type_identity) {
            return Err(RegistryError::KindAlreadyMapped {
                type_identity,
                existing: existing.clone(),
            });
        }
        for short_name in &descriptor.short_names {
            if let Some(existing) = state.short_names.get(&self.normalize(short_name)) {
                if *existing != collection {
                    return Err(RegistryError::ShortNameConflict {
                        short_name: short_name.clone(),
                        existing: existing.clone(),
                    });
                }
            }
        }

        for short_name in &descriptor.short_names {
            state
                .short_names
                .insert(self.normalize(short_name), collection.clone());
        }
        for category in &descriptor.categories {
            state
                .categories
                .entry(self.normalize(category))
                .or_default()
                .insert(collection.clone());
        }
        state
            .kind_to_collection
            .insert(type_identity.clone(), collection.clone());
        state
            .collection_to_kind
            .insert(collection.clone(), type_identity);
        info!(collection = %collection, kind = %descriptor.kind, "registered resource");
        state.resources.insert(collection, descriptor);
        Ok(())
    }

    /// Register a Rust type together with its collection descriptor.
    ///
    /// The type's identity must share the collection's group and version;
    /// an empty descriptor kind is filled from the type.
    pub fn register_type<T: Resource>(
        &self,
        collection: CollectionIdentity,
        mut descriptor: ResourceDescriptor,
    ) -> RegistryResult<()> {
        let type_identity = T::type_identity();
        if descriptor.kind.is_empty() {
            descriptor.kind = type_identity.kind.clone();
        }
        if type_identity.group != collection.group
            || type_identity.version != collection.version
            || type_identity.kind != descriptor.kind
        {
            return Err(RegistryError::TypeMismatch {
                type_identity,
                collection,
            });
        }
        self.scheme.register::<T>()?;
        self.register_resource(collection, descriptor)
    }

    /// Remove a collection and every index entry pointing at it.
    pub fn unregister_resource(
        &self,
        collection: &CollectionIdentity,
    ) -> RegistryResult<ResourceDescriptor> {
        let mut state = self.write()?;
        let descriptor = state
            .resources
            .remove(collection)
            .ok_or_else(|| RegistryError::CollectionNotFound(collection.clone()))?;
        state.short_names.retain(|_, c| c != collection);
        state.categories.retain(|_, members| {
            members.remove(collection);
            !members.is_empty()
        });
        if let Some(type_identity) = state.collection_to_kind.remove(collection) {
            state.kind_to_collection.remove(&type_identity);
        }
        info!(collection = %collection, "unregistered resource");
        Ok(descriptor)
    }

    pub fn get_resource_config(
        &self,
        collection: &CollectionIdentity,
    ) -> RegistryResult<ResourceDescriptor> {
        self.read()?
            .resources
            .get(collection)
            .cloned()
            .ok_or_else(|| RegistryError::CollectionNotFound(collection.clone()))
    }

    /// Every registered collection, ordered by identity.
    pub fn list_resources(&self) -> RegistryResult<Vec<(CollectionIdentity, ResourceDescriptor)>> {
        Ok(self
            .read()?
            .resources
            .iter()
            .map(|(c, d)| (c.clone(), d.clone()))
            .collect())
    }

    pub fn is_resource_registered(&self, collection: &CollectionIdentity) -> bool {
        self.read()
            .map(|state| state.resources.contains_key(collection))
            .unwrap_or(false)
    }

    pub fn get_collection_for_short_name(&self, short_name: &str) -> RegistryResult<CollectionIdentity> {
        self.read()?
            .short_names
            .get(&self.normalize(short_name))
            .cloned()
            .ok_or_else(|| RegistryError::NameNotFound(short_name.to_string()))
    }

    /// Collections in a category; empty if the category is unknown.
    pub fn get_collections_for_category(
        &self,
        category: &str,
    ) -> RegistryResult<Vec<CollectionIdentity>> {
        Ok(self
            .read()?
            .categories
            .get(&self.normalize(category))
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    pub fn collection_for_type(&self, type_identity: &TypeIdentity) -> RegistryResult<CollectionIdentity> {
        self.read()?
            .kind_to_collection
            .get(type_identity)
            .cloned()
            .ok_or_else(|| RegistryError::KindNotFound(type_identity.clone()))
    }

    pub fn type_for_collection(&self, collection: &CollectionIdentity) -> RegistryResult<TypeIdentity> {
        self.read()?
            .collection_to_kind
            .get(collection)
            .cloned()
            .ok_or_else(|| RegistryError::CollectionNotFound(collection.clone()))
    }

    /// Collection and descriptor for a type, read under one lock.
    pub fn lookup_type(
        &self,
        type_identity: &TypeIdentity,
    ) -> RegistryResult<(CollectionIdentity, ResourceDescriptor)> {
        let state = self.read()?;
        let collection = state
            .kind_to_collection
            .get(type_identity)
            .ok_or_else(|| RegistryError::KindNotFound(type_identity.clone()))?;
        let descriptor = state
            .resources
            .get(collection)
            .ok_or_else(|| RegistryError::CollectionNotFound(collection.clone()))?;
        Ok((collection.clone(), descriptor.clone()))
    }

    /// Resolve a user-supplied resource name.
    ///
    /// Tries, in order: plural or `plural.group`, singular, kind
    /// (case-insensitive), then short name.
    pub fn resolve(&self, name: &str) -> RegistryResult<CollectionIdentity> {
        let state = self.read()?;
        let lower = name.to_lowercase();
        let by = |pred: &dyn Fn(&CollectionIdentity, &ResourceDescriptor) -> bool| {
            state
                .resources
                .iter()
                .find(|(c, d)| pred(c, d))
                .map(|(c, _)| c.clone())
        };
        let found = by(&|c, d| d.plural == lower || c.qualified_name() == lower)
            .or_else(|| by(&|_, d| d.singular == lower))
            .or_else(|| by(&|_, d| d.kind.to_lowercase() == lower))
            .or_else(|| state.short_names.get(&self.normalize(name)).cloned());
        debug!(name, resolved = ?found, "resolve resource name");
        found.ok_or_else(|| RegistryError::NameNotFound(name.to_string()))
    }
}
