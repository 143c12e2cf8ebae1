//! Builds events about objects and hands them to a broadcaster.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use kstore_types::{ObjectMeta, Referent};

use crate::broadcaster::Broadcaster;
use crate::event::{Event, EventSource, EventType};

const DEFAULT_EVENT_NAMESPACE: &str = "default";

static LAST_STAMP: AtomicU64 = AtomicU64::new(0);

/// Nanosecond wall-clock stamp, strictly increasing within the process.
fn unique_stamp() -> u64 {
    let now = Utc::now()
        .timestamp_nanos_opt()
        .map_or(0, |nanos| nanos.max(0) as u64);
    let prev = match LAST_STAMP.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
        Some(now.max(prev + 1))
    }) {
        Ok(prev) | Err(prev) => prev,
    };
    now.max(prev + 1)
}

/// Builds events about objects and hands them to a [`Broadcaster`].
///
/// Recording is fire-and-forget: nothing here blocks or fails.
#[derive(Clone, Debug)]
pub struct EventRecorder {
    broadcaster: Broadcaster,
    source: EventSource,
}

impl EventRecorder {
    pub fn new(broadcaster: Broadcaster, source: EventSource) -> Self {
        Self {
            broadcaster,
            source,
        }
    }

    pub fn source(&self) -> &EventSource {
        &self.source
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn event(&self, object: &dyn Referent, event_type: EventType, reason: &str, message: &str) {
        self.broadcaster
            .record(self.build(object, BTreeMap::new(), event_type, reason, message.to_string()));
    }

    /// Like [`event`](Self::event) with a formatted message:
    /// `recorder.eventf(&obj, EventType::Normal, "Scaled", format_args!("to {n}"))`.
    pub fn eventf(
        &self,
        object: &dyn Referent,
        event_type: EventType,
        reason: &str,
        message: fmt::Arguments<'_>,
    ) {
        self.broadcaster
            .record(self.build(object, BTreeMap::new(), event_type, reason, message.to_string()));
    }

    /// [`eventf`](Self::eventf) with annotations attached to the event's metadata.
    pub fn annotated_eventf(
        &self,
        object: &dyn Referent,
        annotations: BTreeMap<String, String>,
        event_type: EventType,
        reason: &str,
        message: fmt::Arguments<'_>,
    ) {
        self.broadcaster
            .record(self.build(object, annotations, event_type, reason, message.to_string()));
    }

    fn build(
        &self,
        object: &dyn Referent,
        annotations: BTreeMap<String, String>,
        event_type: EventType,
        reason: &str,
        message: String,
    ) -> Event {
        let involved_object = object.object_reference();
        let namespace = if involved_object.namespace.is_empty() {
            DEFAULT_EVENT_NAMESPACE.to_string()
        } else {
            involved_object.namespace.clone()
        };
        let name = format!("{}.{:x}", involved_object.name, unique_stamp());
        let now = Utc::now();
        Event {
            metadata: ObjectMeta {
                annotations,
                ..ObjectMeta::named(namespace, name)
            },
            involved_object,
            reason: reason.to_string(),
            message,
            source: self.source.clone(),
            event_type,
            first_timestamp: Some(now),
            last_timestamp: Some(now),
            count: 1,
        }
    }
}
