//! Patch formats and the engines that apply them to JSON documents.
//!
//! - [`Patch::Json`]: RFC 6902 operation list
//! - [`Patch::Merge`]: RFC 7386 merge patch
//! - [`Patch::Strategic`]: field-aware merge where lists of objects merge by
//!   their `name` key, with `$patch` and `$deleteFromPrimitiveList` directives
//! - [`Patch::Apply`]: declarative apply of a full configuration, merged
//!   strategically and creating the object when missing

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Key used to match list elements in strategic merges.
pub const MERGE_KEY: &str = "name";

const DIRECTIVE: &str = "$patch";
const DELETE_FROM_PRIMITIVE_LIST: &str = "$deleteFromPrimitiveList/";
const SET_ELEMENT_ORDER: &str = "$setElementOrder/";
const RETAIN_KEYS: &str = "$retainKeys";

/// A patch request.
#[derive(Clone, Debug, PartialEq)]
pub enum Patch {
    Json(Value),
    Merge(Value),
    Strategic(Value),
    Apply(Value),
}

impl Patch {
    /// An apply patch carrying the serialized form of `object`.
    pub fn apply<T: Serialize>(object: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(object).map(Self::Apply)
    }

    /// An RFC 7386 merge patch built from any serializable value.
    pub fn merge<T: Serialize>(patch: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(patch).map(Self::Merge)
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json(_) => "application/json-patch+json",
            Self::Merge(_) => "application/merge-patch+json",
            Self::Strategic(_) => "application/strategic-merge-patch+json",
            Self::Apply(_) => "application/apply-patch+yaml",
        }
    }

    pub fn is_apply(&self) -> bool {
        matches!(self, Self::Apply(_))
    }

    /// Apply this patch to `document`, returning the patched copy.
    pub fn apply_to(&self, document: &Value) -> Result<Value, PatchError> {
        match self {
            Self::Json(ops) => json_patch(document, ops),
            Self::Merge(patch) => Ok(merge_patch(document, patch)),
            Self::Strategic(patch) | Self::Apply(patch) => strategic_merge_patch(document, patch),
        }
    }
}

/// Errors raised while applying a patch.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("malformed patch: {0}")]
    Malformed(String),

    #[error("invalid JSON pointer {0:?}")]
    InvalidPointer(String),

    #[error("path {0:?} does not exist")]
    PathNotFound(String),

    #[error("test operation failed at {0:?}")]
    TestFailed(String),
}

// ---------------------------------------------------------------------------
// RFC 6902
// ---------------------------------------------------------------------------

/// Apply an RFC 6902 operation list. Either every operation applies or the
/// document is returned untouched via `Err`.
pub fn json_patch(document: &Value, operations: &Value) -> Result<Value, PatchError> {
    let ops = operations
        .as_array()
        .ok_or_else(|| PatchError::Malformed("JSON patch must be an array".into()))?;
    let mut doc = document.clone();
    for op in ops {
        let name = op
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| PatchError::Malformed(format!("operation without `op`: {op}")))?;
        let path = string_field(op, "path")?;
        match name {
            "add" => add(&mut doc, path, value_field(op)?.clone())?,
            "remove" => {
                remove(&mut doc, path)?;
            }
            "replace" => {
                remove(&mut doc, path)?;
                add(&mut doc, path, value_field(op)?.clone())?;
            }
            "move" => {
                let from = string_field(op, "from")?;
                if path.starts_with(&format!("{from}/")) {
                    return Err(PatchError::Malformed(format!(
                        "cannot move {from:?} into its own child {path:?}"
                    )));
                }
                let value = remove(&mut doc, from)?;
                add(&mut doc, path, value)?;
            }
            "copy" => {
                let from = string_field(op, "from")?;
                let value = doc
                    .pointer(&check_pointer(from)?)
                    .cloned()
                    .ok_or_else(|| PatchError::PathNotFound(from.to_string()))?;
                add(&mut doc, path, value)?;
            }
            "test" => {
                let expected = value_field(op)?;
                match doc.pointer(&check_pointer(path)?) {
                    Some(actual) if actual == expected => {}
                    _ => return Err(PatchError::TestFailed(path.to_string())),
                }
            }
            other => return Err(PatchError::Malformed(format!("unknown operation {other:?}"))),
        }
    }
    Ok(doc)
}

fn string_field<'a>(op: &'a Value, field: &str) -> Result<&'a str, PatchError> {
    op.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| PatchError::Malformed(format!("operation without `{field}`: {op}")))
}

fn value_field(op: &Value) -> Result<&Value, PatchError> {
    op.get("value")
        .ok_or_else(|| PatchError::Malformed(format!("operation without `value`: {op}")))
}

fn check_pointer(path: &str) -> Result<String, PatchError> {
    if !path.is_empty() && !path.starts_with('/') {
        return Err(PatchError::InvalidPointer(path.to_string()));
    }
    Ok(path.to_string())
}

fn split_pointer(path: &str) -> Result<(String, String), PatchError> {
    check_pointer(path)?;
    let idx = path
        .rfind('/')
        .ok_or_else(|| PatchError::InvalidPointer(path.to_string()))?;
    let token = path[idx + 1..].replace("~1", "/").replace("~0", "~");
    Ok((path[..idx].to_string(), token))
}

fn array_index(token: &str, len: usize, path: &str) -> Result<usize, PatchError> {
    if token.len() > 1 && token.starts_with('0') {
        return Err(PatchError::InvalidPointer(path.to_string()));
    }
    let idx: usize = token
        .parse()
        .map_err(|_| PatchError::InvalidPointer(path.to_string()))?;
    if idx > len {
        return Err(PatchError::PathNotFound(path.to_string()));
    }
    Ok(idx)
}

fn add(doc: &mut Value, path: &str, value: Value) -> Result<(), PatchError> {
    if path.is_empty() {
        *doc = value;
        return Ok(());
    }
    let (parent, token) = split_pointer(path)?;
    let target = doc
        .pointer_mut(&parent)
        .ok_or_else(|| PatchError::PathNotFound(path.to_string()))?;
    match target {
        Value::Object(map) => {
            map.insert(token, value);
        }
        Value::Array(items) => {
            if token == "-" {
                items.push(value);
            } else {
                let idx = array_index(&token, items.len(), path)?;
                items.insert(idx, value);
            }
        }
        _ => return Err(PatchError::PathNotFound(path.to_string())),
    }
    Ok(())
}

fn remove(doc: &mut Value, path: &str) -> Result<Value, PatchError> {
    if path.is_empty() {
        return Ok(std::mem::take(doc));
    }
    let (parent, token) = split_pointer(path)?;
    let target = doc
        .pointer_mut(&parent)
        .ok_or_else(|| PatchError::PathNotFound(path.to_string()))?;
    match target {
        Value::Object(map) => map
            .remove(&token)
            .ok_or_else(|| PatchError::PathNotFound(path.to_string())),
        Value::Array(items) => {
            let idx = array_index(&token, items.len(), path)?;
            if idx >= items.len() {
                return Err(PatchError::PathNotFound(path.to_string()));
            }
            Ok(items.remove(idx))
        }
        _ => Err(PatchError::PathNotFound(path.to_string())),
    }
}

// ---------------------------------------------------------------------------
// RFC 7386
// ---------------------------------------------------------------------------

/// Apply an RFC 7386 merge patch. Objects merge recursively, `null` deletes,
/// anything else (including arrays) replaces.
pub fn merge_patch(target: &Value, patch: &Value) -> Value {
    match patch {
        Value::Object(fields) => {
            let mut merged = match target {
                Value::Object(map) => map.clone(),
                _ => Map::new(),
            };
            for (key, value) in fields {
                if value.is_null() {
                    merged.remove(key);
                } else {
                    let current = merged.get(key).cloned().unwrap_or(Value::Null);
                    merged.insert(key.clone(), merge_patch(&current, value));
                }
            }
            Value::Object(merged)
        }
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// Strategic merge
// ---------------------------------------------------------------------------

/// Apply a strategic merge patch.
///
/// Differences from a plain merge patch:
///
/// - lists whose elements are objects carrying a [`MERGE_KEY`] merge
///   element-by-element instead of being replaced
/// - `{"$patch": "replace"}` in a map replaces it wholesale; in a list it
///   replaces the whole list
/// - `{"$patch": "delete"}` removes a map, or the keyed list element
/// - `$deleteFromPrimitiveList/<field>` removes values from a primitive list
/// - `$retainKeys` drops every key not listed
pub fn strategic_merge_patch(original: &Value, patch: &Value) -> Result<Value, PatchError> {
    match merge_value(Some(original), patch)? {
        Some(v) => Ok(v),
        None => Ok(Value::Object(Map::new())),
    }
}

/// `None` means the patch deleted the value.
fn merge_value(original: Option<&Value>, patch: &Value) -> Result<Option<Value>, PatchError> {
    match patch {
        Value::Object(fields) => merge_map(original, fields),
        Value::Array(items) => merge_list(original, items).map(Some),
        Value::Null => Ok(None),
        other => Ok(Some(other.clone())),
    }
}

fn merge_map(
    original: Option<&Value>,
    patch: &Map<String, Value>,
) -> Result<Option<Value>, PatchError> {
    match patch.get(DIRECTIVE).and_then(Value::as_str) {
        Some("delete") => return Ok(None),
        Some("replace") => return Ok(Some(strip_directives(patch))),
        Some("merge") | None => {}
        Some(other) => return Err(PatchError::Malformed(format!("unknown $patch directive {other:?}"))),
    }

    let mut merged = match original {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };

    if let Some(retain) = patch.get(RETAIN_KEYS) {
        let keep: Vec<&str> = retain
            .as_array()
            .ok_or_else(|| PatchError::Malformed("$retainKeys must be a list".into()))?
            .iter()
            .filter_map(Value::as_str)
            .collect();
        merged.retain(|k, _| keep.contains(&k.as_str()));
    }

    for (key, value) in patch {
        if key == DIRECTIVE || key == RETAIN_KEYS || key.starts_with(SET_ELEMENT_ORDER) {
            continue;
        }
        if let Some(field) = key.strip_prefix(DELETE_FROM_PRIMITIVE_LIST) {
            let doomed = value.as_array().ok_or_else(|| {
                PatchError::Malformed(format!("{key} must be a list"))
            })?;
            if let Some(Value::Array(items)) = merged.get_mut(field) {
                items.retain(|item| !doomed.contains(item));
            }
            continue;
        }
        match merge_value(merged.get(key), value)? {
            Some(v) => {
                merged.insert(key.clone(), v);
            }
            None => {
                merged.remove(key);
            }
        }
    }
    Ok(Some(Value::Object(merged)))
}

fn merge_list(original: Option<&Value>, patch: &[Value]) -> Result<Value, PatchError> {
    let replace = patch
        .iter()
        .any(|item| item.get(DIRECTIVE).and_then(Value::as_str) == Some("replace"));
    let items: Vec<&Value> = patch
        .iter()
        .filter(|item| !is_bare_directive(item))
        .collect();
    if replace {
        return Ok(Value::Array(items.into_iter().map(strip_value).collect()));
    }

    let keyed = !items.is_empty() && items.iter().all(|item| item.get(MERGE_KEY).is_some());
    let base = match original {
        Some(Value::Array(list)) if keyed => list.clone(),
        _ => return Ok(Value::Array(items.into_iter().map(strip_value).collect())),
    };

    let mut merged = base;
    for item in items {
        let key = item.get(MERGE_KEY);
        let position = merged.iter().position(|existing| existing.get(MERGE_KEY) == key);
        let deleting = item.get(DIRECTIVE).and_then(Value::as_str) == Some("delete");
        match (position, deleting) {
            (Some(idx), true) => {
                merged.remove(idx);
            }
            (None, true) => {}
            (Some(idx), false) => match merge_value(Some(&merged[idx]), item)? {
                Some(v) => merged[idx] = v,
                None => {
                    merged.remove(idx);
                }
            },
            (None, false) => {
                if let Some(v) = merge_value(None, item)? {
                    merged.push(v);
                }
            }
        }
    }
    Ok(Value::Array(merged))
}

/// A list entry that only carries `$patch` (e.g. `{"$patch": "replace"}`).
fn is_bare_directive(item: &Value) -> bool {
    item.as_object()
        .map_or(false, |m| m.len() == 1 && m.contains_key(DIRECTIVE))
}

fn strip_value(item: &Value) -> Value {
    match item {
        Value::Object(map) => strip_directives(map),
        other => other.clone(),
    }
}

fn strip_directives(map: &Map<String, Value>) -> Value {
    let cleaned = map
        .iter()
        .filter(|(k, _)| {
            k.as_str() != DIRECTIVE
                && k.as_str() != RETAIN_KEYS
                && !k.starts_with(SET_ELEMENT_ORDER)
                && !k.starts_with(DELETE_FROM_PRIMITIVE_LIST)
        })
        .map(|(k, v)| (k.clone(), strip_value(v)))
        .collect();
    Value::Object(cleaned)
}
