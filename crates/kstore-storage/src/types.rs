use std::time::Duration;

use serde_json::Value;

use kstore_types::LabelSelector;

use crate::error::{StorageError, StorageResult};

/// Options for [`Storage::get`](crate::Storage::get).
#[derive(Clone, Debug, Default)]
pub struct GetOptions {
    /// Return `Ok(None)` instead of `NotFound` when the key is absent.
    pub ignore_not_found: bool,
}

/// Options for [`Storage::list`](crate::Storage::list).
#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    /// Backends may pre-filter on `metadata.labels`; callers still filter
    /// everything else themselves.
    pub label_selector: LabelSelector,
}

/// Items under a prefix, plus the revision they were read at.
#[derive(Clone, Debug, Default)]
pub struct ListResult {
    pub items: Vec<Value>,
    pub resource_version: String,
}

/// Conditions a caller requires of the current object before a write.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Preconditions {
    pub uid: Option<String>,
    pub resource_version: Option<String>,
}

impl Preconditions {
    pub fn uid(uid: impl Into<String>) -> Self {
        Self {
            uid: Some(uid.into()),
            resource_version: None,
        }
    }

    pub fn resource_version(rv: impl Into<String>) -> Self {
        Self {
            uid: None,
            resource_version: Some(rv.into()),
        }
    }

    /// `Conflict` if `current` violates any set condition.
    pub fn check(&self, key: &str, current: &Value) -> StorageResult<()> {
        if let Some(uid) = &self.uid {
            let actual = current
                .pointer("/metadata/uid")
                .and_then(Value::as_str)
                .unwrap_or("");
            if actual != uid {
                return Err(StorageError::Conflict {
                    key: key.to_string(),
                    reason: format!("UID precondition failed: expected {uid}, found {actual:?}"),
                });
            }
        }
        if let Some(rv) = &self.resource_version {
            let actual = current
                .pointer("/metadata/resourceVersion")
                .and_then(Value::as_str)
                .unwrap_or("");
            if actual != rv {
                return Err(StorageError::Conflict {
                    key: key.to_string(),
                    reason: format!(
                        "resourceVersion precondition failed: expected {rv}, found {actual:?}"
                    ),
                });
            }
        }
        Ok(())
    }
}

/// The object a `try_update` callback wants committed.
#[derive(Clone, Debug)]
pub struct Proposal {
    pub object: Value,
    pub ttl: Option<Duration>,
}

impl Proposal {
    pub fn new(object: Value) -> Self {
        Self { object, ttl: None }
    }
}

/// Result of a guaranteed update.
#[derive(Clone, Debug)]
pub struct UpdateOutcome {
    /// The object as stored after the call.
    pub object: Value,
    /// `false` when the proposal equalled the current object and nothing
    /// was written.
    pub changed: bool,
    /// `true` when the object did not exist and was created.
    pub created: bool,
}

/// Options for [`Storage::watch`](crate::Storage::watch).
#[derive(Clone, Debug, Default)]
pub struct WatchOptions {
    /// Where the stream starts:
    ///
    /// - `None` or `""`: changes after the current revision
    /// - `"0"`: synthetic `Added` for every existing object, then live
    /// - any other revision: retained history after it, then live
    pub resource_version: Option<String>,
    /// Emit a `Bookmark` carrying the starting revision once initial events
    /// have been sent.
    pub allow_bookmarks: bool,
}

/// One change observed by a watch.
#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent {
    Added(Value),
    Modified(Value),
    Deleted(Value),
    /// Progress marker; no object changed.
    Bookmark { resource_version: String },
    /// The stream failed and will close after this event.
    Error(String),
}

impl WatchEvent {
    pub fn object(&self) -> Option<&Value> {
        match self {
            Self::Added(v) | Self::Modified(v) | Self::Deleted(v) => Some(v),
            Self::Bookmark { .. } | Self::Error(_) => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Added(_) => "ADDED",
            Self::Modified(_) => "MODIFIED",
            Self::Deleted(_) => "DELETED",
            Self::Bookmark { .. } => "BOOKMARK",
            Self::Error(_) => "ERROR",
        }
    }
}
