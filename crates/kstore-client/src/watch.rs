use std::collections::{BTreeMap, HashSet};
use std::marker::PhantomData;

use serde_json::Value;

use kstore_storage::{WatchEvent, WatchStream};
use kstore_types::{FieldSelector, LabelSelector, Resource, TypeIdentity};

use crate::options::WatchOptions;

/// One decoded change.
#[derive(Clone, Debug, PartialEq)]
pub enum Event<T> {
    Added(T),
    Modified(T),
    Deleted(T),
    /// Progress marker carrying the resource version reached.
    Bookmark(String),
    /// The feed failed; no further events follow.
    Error(String),
}

impl<T> Event<T> {
    pub fn object(&self) -> Option<&T> {
        match self {
            Self::Added(o) | Self::Modified(o) | Self::Deleted(o) => Some(o),
            Self::Bookmark(_) | Self::Error(_) => None,
        }
    }
}

/// Change feed for one Rust type, filtered by the watch's selectors.
///
/// An object this watch has delivered that is modified so it no longer
/// matches the selectors is reported once as [`Event::Deleted`], carrying its
/// new state. Objects that stop matching without ever having been delivered
/// by this watch produce nothing.
pub struct TypedWatch<T> {
    stream: WatchStream,
    api_version: String,
    kind: String,
    labels: LabelSelector,
    fields: FieldSelector,
    /// (namespace, name) of objects currently in view.
    visible: HashSet<(String, String)>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Resource> TypedWatch<T> {
    pub(crate) fn new(stream: WatchStream, type_identity: &TypeIdentity, opts: &WatchOptions) -> Self {
        Self {
            stream,
            api_version: type_identity.api_version(),
            kind: type_identity.kind.clone(),
            labels: opts.label_selector.clone(),
            fields: opts.field_selector.clone(),
            visible: HashSet::new(),
            _marker: PhantomData,
        }
    }

    /// Next matching event, or `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<Event<T>> {
        loop {
            let (wrap, object): (fn(T) -> Event<T>, Value) = match self.stream.recv().await? {
                WatchEvent::Added(o) => (Event::Added, o),
                WatchEvent::Modified(o) => (Event::Modified, o),
                WatchEvent::Deleted(o) => {
                    if !self.is_kind(&o) {
                        continue;
                    }
                    let was_visible = self.visible.remove(&identity(&o));
                    if was_visible || self.in_view(&o) {
                        return Some(self.decode(o, Event::Deleted));
                    }
                    continue;
                }
                WatchEvent::Bookmark { resource_version } => {
                    return Some(Event::Bookmark(resource_version))
                }
                WatchEvent::Error(message) => return Some(Event::Error(message)),
            };
            if !self.is_kind(&object) {
                continue;
            }
            let id = identity(&object);
            if self.in_view(&object) {
                self.visible.insert(id);
                return Some(self.decode(object, wrap));
            }
            // Leaving the view reads as a delete to this watcher.
            if self.visible.remove(&id) {
                return Some(self.decode(object, Event::Deleted));
            }
        }
    }

    fn decode(&self, object: Value, wrap: fn(T) -> Event<T>) -> Event<T> {
        match serde_json::from_value::<T>(object) {
            Ok(obj) => wrap(obj),
            Err(e) => Event::Error(format!("decoding {}: {e}", self.kind)),
        }
    }

    /// Stop the feed. Idempotent.
    pub fn stop(&self) {
        self.stream.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stream.is_stopped()
    }

    fn is_kind(&self, object: &Value) -> bool {
        object.get("apiVersion").and_then(Value::as_str) == Some(self.api_version.as_str())
            && object.get("kind").and_then(Value::as_str) == Some(self.kind.as_str())
    }

    fn in_view(&self, object: &Value) -> bool {
        self.fields.matches(object) && self.labels.matches(&labels_of(object))
    }
}

fn identity(object: &Value) -> (String, String) {
    let field = |name: &str| {
        object
            .pointer(&format!("/metadata/{name}"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    (field("namespace"), field("name"))
}

fn labels_of(object: &Value) -> BTreeMap<String, String> {
    object
        .pointer("/metadata/labels")
        .and_then(Value::as_object)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}
