//! Deduplication of recurring events before they reach a sink.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use kstore_types::ObjectReference;

use crate::event::Event;

/// What makes two occurrences "the same event": the object and the reason.
/// Type and source are taken from the newest occurrence on merge.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CorrelationKey {
    involved_object: ObjectReference,
    reason: String,
}

impl CorrelationKey {
    fn of(event: &Event) -> Self {
        let mut involved_object = event.involved_object.clone();
        // Every write to the object moves its version; recurrences must still match.
        involved_object.resource_version.clear();
        Self {
            involved_object,
            reason: event.reason.clone(),
        }
    }
}

#[derive(Debug)]
struct Seen {
    name: String,
    first_timestamp: Option<DateTime<Utc>>,
    last_seen: Instant,
    tick: u64,
}

/// Folds recurrences of an event onto the first occurrence's name.
///
/// A recurrence seen within `window` of the previous one is renamed to the
/// stored event's name, so the sink's create conflicts and the occurrence is
/// merged by update instead of stored as a new event. Entries are evicted
/// least recently seen first once `capacity` is exceeded.
#[derive(Debug)]
pub struct EventCorrelator {
    window: Duration,
    capacity: usize,
    entries: HashMap<CorrelationKey, Seen>,
    recency: BTreeMap<u64, CorrelationKey>,
    next_tick: u64,
}

impl EventCorrelator {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(1),
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
        }
    }

    pub fn correlate(&mut self, event: Event) -> Event {
        self.correlate_at(event, Instant::now())
    }

    pub fn correlate_at(&mut self, mut event: Event, now: Instant) -> Event {
        let key = CorrelationKey::of(&event);
        let tick = self.next_tick;
        self.next_tick += 1;

        match self.entries.get_mut(&key) {
            Some(seen) if now.saturating_duration_since(seen.last_seen) <= self.window => {
                event.metadata.name = seen.name.clone();
                event.first_timestamp = seen.first_timestamp.or(event.first_timestamp);
                seen.last_seen = now;
                self.recency.remove(&seen.tick);
                seen.tick = tick;
            }
            Some(seen) => {
                seen.name = event.metadata.name.clone();
                seen.first_timestamp = event.first_timestamp;
                seen.last_seen = now;
                self.recency.remove(&seen.tick);
                seen.tick = tick;
            }
            None => {
                self.entries.insert(
                    key.clone(),
                    Seen {
                        name: event.metadata.name.clone(),
                        first_timestamp: event.first_timestamp,
                        last_seen: now,
                        tick,
                    },
                );
            }
        }
        self.recency.insert(tick, key);
        self.evict();
        event
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict(&mut self) {
        while self.entries.len() > self.capacity {
            let Some((_, key)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&key);
        }
    }
}
