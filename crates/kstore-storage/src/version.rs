//! Resource version encoding.

use serde_json::Value;

use crate::error::{StorageError, StorageResult};

/// Converts between a backend's native sequence numbers and the opaque
/// `metadata.resourceVersion` strings handed to callers.
pub trait Versioner: Send + Sync {
    /// Render a native revision as a resource version string.
    fn encode(&self, revision: u64) -> String;

    /// Parse a resource version string back into a native revision.
    fn parse(&self, resource_version: &str) -> StorageResult<u64>;

    /// The revision recorded on an object, or `None` if unset.
    fn object_version(&self, object: &Value) -> StorageResult<Option<u64>> {
        match object.pointer("/metadata/resourceVersion") {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => self.parse(s).map(Some),
            Some(other) => Err(StorageError::BadRequest(format!(
                "resourceVersion must be a string, got {other}"
            ))),
        }
    }

    /// Stamp `revision` onto the object's metadata.
    fn set_object_version(&self, object: &mut Value, revision: u64) -> StorageResult<()> {
        metadata_mut(object)?.insert(
            "resourceVersion".to_string(),
            Value::String(self.encode(revision)),
        );
        Ok(())
    }

    fn clear_object_version(&self, object: &mut Value) {
        if let Some(meta) = object.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.remove("resourceVersion");
        }
    }
}

/// Base-10 encoding of the revision counter.
#[derive(Clone, Copy, Debug, Default)]
pub struct DecimalVersioner;

impl Versioner for DecimalVersioner {
    fn encode(&self, revision: u64) -> String {
        revision.to_string()
    }

    fn parse(&self, resource_version: &str) -> StorageResult<u64> {
        resource_version.parse::<u64>().map_err(|_| {
            StorageError::BadRequest(format!("invalid resource version {resource_version:?}"))
        })
    }
}

/// Mutable access to `metadata`, creating it if missing.
pub(crate) fn metadata_mut(
    object: &mut Value,
) -> StorageResult<&mut serde_json::Map<String, Value>> {
    let map = object
        .as_object_mut()
        .ok_or_else(|| StorageError::BadRequest("stored objects must be JSON objects".into()))?;
    let meta = map
        .entry("metadata")
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    meta.as_object_mut()
        .ok_or_else(|| StorageError::BadRequest("metadata must be a JSON object".into()))
}
