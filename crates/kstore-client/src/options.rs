//! Per-call options and client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use kstore_storage::Preconditions;
use kstore_types::{FieldSelector, LabelSelector};

/// Client-wide settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Field manager recorded for apply patches that do not name one.
    pub default_field_manager: String,
    /// Namespace used for namespaced objects that leave it empty. Falls back
    /// to the key scheme's default namespace when unset.
    pub default_namespace: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_field_manager: "kstore".to_string(),
            default_namespace: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct GetOptions {
    /// Return the zero value instead of `NotFound`.
    pub ignore_not_found: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    /// `None` lists every namespace.
    pub namespace: Option<String>,
    pub label_selector: LabelSelector,
    pub field_selector: FieldSelector,
}

impl ListOptions {
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Self::default()
        }
    }

    pub fn labels(mut self, selector: LabelSelector) -> Self {
        self.label_selector = selector;
        self
    }

    pub fn fields(mut self, selector: FieldSelector) -> Self {
        self.field_selector = selector;
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct CreateOptions {
    /// Run defaulting and validation but skip the write.
    pub dry_run: bool,
    pub field_manager: Option<String>,
    /// Expire the object after this long.
    pub ttl: Option<Duration>,
}

#[derive(Clone, Debug, Default)]
pub struct UpdateOptions {
    pub dry_run: bool,
    pub field_manager: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct DeleteOptions {
    pub dry_run: bool,
    pub preconditions: Option<Preconditions>,
}

#[derive(Clone, Debug, Default)]
pub struct PatchOptions {
    pub dry_run: bool,
    /// Required for apply patches unless the client has a default.
    pub field_manager: Option<String>,
    /// Accepted for apply patches; there is no field ownership to override.
    pub force: bool,
}

impl PatchOptions {
    pub fn apply(field_manager: impl Into<String>) -> Self {
        Self {
            field_manager: Some(field_manager.into()),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct WatchOptions {
    /// `None` watches every namespace.
    pub namespace: Option<String>,
    pub label_selector: LabelSelector,
    pub field_selector: FieldSelector,
    /// `None` starts now, `"0"` replays existing objects first, anything
    /// else resumes after that version.
    pub resource_version: Option<String>,
    pub allow_bookmarks: bool,
}
