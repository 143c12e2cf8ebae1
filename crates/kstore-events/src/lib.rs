//! Event recording and broadcasting for kstore.
//!
//! Components report what happened to an object through an
//! [`EventRecorder`]. Recording never blocks: events go onto the
//! [`Broadcaster`]'s bounded queue and are fanned out to every registered
//! [`EventSink`] and watcher callback.
//!
//! # Key Types
//!
//! - [`Event`]: the stored `v1/Event` resource and its aggregation rule
//! - [`Broadcaster`]: queue, distribution loop and destination registry
//! - [`EventRecorder`]: builds events about objects for one component
//! - [`EventSink`]: durable destination; [`ClientSink`] persists through a
//!   [`Client`](kstore_client::Client), [`InMemorySink`] keeps a map
//! - [`EventCorrelator`]: folds recurrences onto one stored event
//! - [`RecordingClient`]: client wrapper that reports its own writes
//!
//! # Metrics
//!
//! `kstore_events_recorded_total` and `kstore_events_dropped_total` count
//! queue outcomes; `kstore_event_sinks_active` and
//! `kstore_event_watchers_active` track registered destinations and drop to
//! zero on shutdown.

pub mod broadcaster;
pub mod correlator;
pub mod error;
pub mod event;
pub mod recorder;
pub mod recording;
pub mod sink;

pub use broadcaster::{Broadcaster, BroadcasterConfig, Subscription};
pub use correlator::EventCorrelator;
pub use error::{EventError, EventResult};
pub use event::{
    event_collection, event_descriptor, register_event_type, Event, EventSource, EventType,
    EVENT_COLLECTION,
};
pub use recorder::EventRecorder;
pub use recording::RecordingClient;
pub use sink::{ClientSink, EventSink, InMemorySink, SinkOptions};
