//! Explicit type table mapping a [`TypeIdentity`] to a zero-value factory.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;

use kstore_types::{Resource, TypeIdentity};

use crate::error::{RegistryError, RegistryResult};

type Factory = fn() -> Result<Value, serde_json::Error>;

fn zero_value<T: Resource>() -> Result<Value, serde_json::Error> {
    serde_json::to_value(T::default())
}

/// One registered Rust type.
#[derive(Clone, Debug)]
pub struct TypeInfo {
    pub type_identity: TypeIdentity,
    pub type_name: &'static str,
    factory: Factory,
}

/// Registered Rust types, keyed by type identity.
#[derive(Debug, Default)]
pub struct Scheme {
    types: RwLock<HashMap<TypeIdentity, TypeInfo>>,
}

impl Scheme {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T`. Registering the same type twice is a no-op; a different
    /// type under the same identity is a conflict.
    pub fn register<T: Resource>(&self) -> RegistryResult<()> {
        let type_identity = T::type_identity();
        let type_name = std::any::type_name::<T>();
        let mut types = self
            .types
            .write()
            .map_err(|e| RegistryError::Internal(format!("lock poisoned: {e}")))?;
        if let Some(existing) = types.get(&type_identity) {
            if existing.type_name == type_name {
                return Ok(());
            }
            return Err(RegistryError::TypeConflict {
                type_identity,
                existing: existing.type_name,
            });
        }
        types.insert(
            type_identity.clone(),
            TypeInfo {
                type_identity,
                type_name,
                factory: zero_value::<T>,
            },
        );
        Ok(())
    }

    pub fn recognizes(&self, type_identity: &TypeIdentity) -> bool {
        self.types
            .read()
            .map(|types| types.contains_key(type_identity))
            .unwrap_or(false)
    }

    pub fn type_info(&self, type_identity: &TypeIdentity) -> RegistryResult<TypeInfo> {
        let types = self
            .types
            .read()
            .map_err(|e| RegistryError::Internal(format!("lock poisoned: {e}")))?;
        types
            .get(type_identity)
            .cloned()
            .ok_or_else(|| RegistryError::TypeNotFound(type_identity.clone()))
    }

    pub fn type_name(&self, type_identity: &TypeIdentity) -> RegistryResult<&'static str> {
        self.type_info(type_identity).map(|info| info.type_name)
    }

    /// The zero value of the registered type, as JSON with `apiVersion` and
    /// `kind` filled in.
    pub fn new_object(&self, type_identity: &TypeIdentity) -> RegistryResult<Value> {
        let info = self.type_info(type_identity)?;
        let mut value = (info.factory)()?;
        if let Some(map) = value.as_object_mut() {
            map.insert(
                "apiVersion".to_string(),
                Value::String(type_identity.api_version()),
            );
            map.insert("kind".to_string(), Value::String(type_identity.kind.clone()));
        }
        Ok(value)
    }

    /// Every registered type identity.
    pub fn known_types(&self) -> Vec<TypeIdentity> {
        let mut known: Vec<TypeIdentity> = self
            .types
            .read()
            .map(|types| types.keys().cloned().collect())
            .unwrap_or_default();
        known.sort();
        known
    }
}
