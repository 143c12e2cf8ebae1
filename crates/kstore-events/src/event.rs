//! The `v1/Event` resource and its aggregation rule.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kstore_registry::{PrintColumn, RegistryResult, ResourceDescriptor, TypeRegistry};
use kstore_types::{CollectionIdentity, ObjectMeta, ObjectReference, Resource, TypeIdentity};

/// Collection events are stored under.
pub const EVENT_COLLECTION: &str = "events";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[default]
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "Normal"),
            Self::Warning => write!(f, "Warning"),
        }
    }
}

/// Component that reported an event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventSource {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub component: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
}

/// An audit record about some other object.
///
/// Repeated occurrences are folded into one stored event by
/// [`Event::merge_occurrence`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub involved_object: ObjectReference,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default)]
    pub source: EventSource,
    #[serde(default, rename = "type")]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub count: i32,
}

impl Resource for Event {
    fn type_identity() -> TypeIdentity {
        TypeIdentity::new("", "v1", "Event")
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Event {
    /// Fold a new occurrence into this stored event: counts add up, the
    /// first timestamp stays the earliest, everything else takes the newer
    /// value.
    pub fn merge_occurrence(&mut self, newer: &Event) {
        self.count = self.count.max(0) + newer.count.max(1);
        self.first_timestamp = match (self.first_timestamp, newer.first_timestamp) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if newer.last_timestamp.is_some() {
            self.last_timestamp = newer.last_timestamp;
        }
        self.message = newer.message.clone();
        self.reason = newer.reason.clone();
        self.event_type = newer.event_type;
        self.source = newer.source.clone();
        for (k, v) in &newer.metadata.annotations {
            self.metadata.annotations.insert(k.clone(), v.clone());
        }
    }
}

pub fn event_collection() -> CollectionIdentity {
    CollectionIdentity::new("", "v1", EVENT_COLLECTION)
}

pub fn event_descriptor() -> ResourceDescriptor {
    ResourceDescriptor::new("event", EVENT_COLLECTION, "Event")
        .namespaced(true)
        .short_names(["ev"])
        .print_column(PrintColumn::new("Type", "string", ".type"))
        .print_column(PrintColumn::new("Reason", "string", ".reason"))
        .print_column(PrintColumn::new("Object", "string", ".involvedObject.name"))
        .print_column(PrintColumn::new("Count", "integer", ".count"))
        .print_column(PrintColumn::new("Message", "string", ".message"))
        .description("Operational events reported about other objects")
}

/// Register [`Event`] with a registry so event sinks can persist it.
pub fn register_event_type(registry: &TypeRegistry) -> RegistryResult<()> {
    registry.register_type::<Event>(event_collection(), event_descriptor())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn occurrence(count: i32, first: DateTime<Utc>, last: DateTime<Utc>, message: &str) -> Event {
        Event {
            reason: "Scaled".into(),
            message: message.into(),
            first_timestamp: Some(first),
            last_timestamp: Some(last),
            count,
            ..Event::default()
        }
    }

    #[test]
    fn aggregation_adds_counts_and_keeps_first_seen() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(30);
        let t2 = t0 + Duration::seconds(60);
        let mut stored = occurrence(5, t0, t1, "old");
        let newer = Event {
            event_type: EventType::Warning,
            ..occurrence(2, t2, t2, "new")
        };
        stored.merge_occurrence(&newer);
        assert_eq!(stored.count, 7);
        assert_eq!(stored.first_timestamp, Some(t0));
        assert_eq!(stored.last_timestamp, Some(t2));
        assert_eq!(stored.message, "new");
        assert_eq!(stored.event_type, EventType::Warning);
    }

    #[test]
    fn wire_format() {
        let event = Event {
            metadata: ObjectMeta::named("default", "w.1"),
            reason: "Created".into(),
            count: 1,
            ..Event::default()
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Normal");
        assert_eq!(json["count"], 1);
        assert!(json.get("firstTimestamp").is_none());
        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn registers_with_short_name() {
        let registry = TypeRegistry::new();
        register_event_type(&registry).unwrap();
        assert_eq!(registry.get_collection_for_short_name("EV").unwrap(), event_collection());
        let descriptor = registry.get_resource_config(&event_collection()).unwrap();
        assert_eq!(descriptor.list_kind, "EventList");
        assert!(descriptor.namespaced);
    }
}
