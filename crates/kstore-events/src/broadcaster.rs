//! Fan-out of recorded events to sinks and watchers.
//!
//! Recording only enqueues: a single distribution loop drains the queue and
//! spawns one delivery task per destination per event, so a slow sink never
//! holds up other destinations or the next dequeue. Delivery to one sink is
//! therefore unordered across events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kstore_storage::Context;

use crate::correlator::EventCorrelator;
use crate::error::{EventError, EventResult};
use crate::event::{Event, EventSource, EventType};
use crate::recorder::EventRecorder;
use crate::sink::{EventSink, SinkOptions};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcasterConfig {
    /// Events buffered before recording starts dropping.
    pub queue_capacity: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    Running,
    ShutDown,
}

type WatchFn = dyn Fn(&Event) + Send + Sync;

#[derive(Clone)]
enum Target {
    Sink {
        sink: Arc<dyn EventSink>,
        options: SinkOptions,
        correlator: Arc<Mutex<EventCorrelator>>,
    },
    Watcher(Arc<WatchFn>),
}

impl Target {
    fn is_sink(&self) -> bool {
        matches!(self, Self::Sink { .. })
    }
}

struct Destination {
    target: Target,
    stop: CancellationToken,
}

struct Inner {
    config: BroadcasterConfig,
    state: Mutex<State>,
    tx: mpsc::Sender<Event>,
    rx: Mutex<Option<mpsc::Receiver<Event>>>,
    destinations: Mutex<HashMap<u64, Destination>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
    recorded: AtomicU64,
    shutdown: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Distributes recorded events to every registered sink and watcher.
///
/// Lifecycle is `Idle` until the first destination registers, then
/// `Running`, then `ShutDown` after [`Broadcaster::shutdown`]. Shutdown is
/// terminal: later registrations fail and later events are counted as
/// dropped.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

impl Broadcaster {
    pub fn new(config: BroadcasterConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State::Idle),
                tx,
                rx: Mutex::new(Some(rx)),
                destinations: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                dropped: AtomicU64::new(0),
                recorded: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &BroadcasterConfig {
        &self.inner.config
    }

    /// Recorder stamping events with `component` as their source.
    pub fn new_recorder(&self, component: impl Into<String>) -> EventRecorder {
        let source = EventSource {
            component: component.into(),
            host: std::env::var("HOSTNAME").unwrap_or_default(),
        };
        EventRecorder::new(self.clone(), source)
    }

    /// Enqueue an event. Never blocks; a full queue or a shut-down
    /// broadcaster drops the event and bumps the drop counter.
    pub fn record(&self, event: Event) {
        if self.inner.shutdown.is_cancelled() {
            self.drop_event(&event, "broadcaster is shut down");
            return;
        }
        match self.inner.tx.try_send(event) {
            Ok(()) => {
                self.inner.recorded.fetch_add(1, Ordering::Relaxed);
                counter!("kstore_events_recorded_total", 1u64);
            }
            Err(TrySendError::Full(event)) => self.drop_event(&event, "queue full"),
            Err(TrySendError::Closed(event)) => self.drop_event(&event, "queue closed"),
        }
    }

    /// Persist every event to `sink`, folding recurrences together.
    pub fn start_recording_to_sink(
        &self,
        sink: Arc<dyn EventSink>,
        options: SinkOptions,
    ) -> EventResult<Subscription> {
        let correlator = EventCorrelator::new(options.dedup_window(), options.cache_size);
        self.register(Target::Sink {
            sink,
            options,
            correlator: Arc::new(Mutex::new(correlator)),
        })
    }

    /// Call `watcher` with every event.
    pub fn start_event_watcher<F>(&self, watcher: F) -> EventResult<Subscription>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(Target::Watcher(Arc::new(watcher)))
    }

    /// Log every event: `Normal` at info, `Warning` at warn.
    pub fn start_logging(&self) -> EventResult<Subscription> {
        self.start_event_watcher(|event| {
            let object = event.involved_object.key();
            match event.event_type {
                EventType::Normal => info!(
                    kind = %event.involved_object.kind,
                    object = %object,
                    reason = %event.reason,
                    "{}", event.message
                ),
                EventType::Warning => warn!(
                    kind = %event.involved_object.kind,
                    object = %object,
                    reason = %event.reason,
                    "{}", event.message
                ),
            }
        })
    }

    /// Stop every destination and the distribution loop. Idempotent.
    pub fn shutdown(&self) {
        let mut state = lock(&self.inner.state);
        if *state == State::ShutDown {
            return;
        }
        *state = State::ShutDown;
        self.inner.shutdown.cancel();
        {
            let mut destinations = lock(&self.inner.destinations);
            for destination in destinations.values() {
                destination.stop.cancel();
            }
            destinations.clear();
        }
        gauge!("kstore_event_sinks_active", 0.0);
        gauge!("kstore_event_watchers_active", 0.0);
        info!(
            recorded = self.recorded_count(),
            dropped = self.dropped_count(),
            "event broadcaster shut down"
        );
    }

    pub fn is_shut_down(&self) -> bool {
        *lock(&self.inner.state) == State::ShutDown
    }

    pub fn is_running(&self) -> bool {
        *lock(&self.inner.state) == State::Running
    }

    /// Events accepted into the queue.
    pub fn recorded_count(&self) -> u64 {
        self.inner.recorded.load(Ordering::Relaxed)
    }

    /// Events discarded because the queue was full or the broadcaster was shut down.
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn sink_count(&self) -> usize {
        lock(&self.inner.destinations)
            .values()
            .filter(|d| d.target.is_sink())
            .count()
    }

    pub fn watcher_count(&self) -> usize {
        lock(&self.inner.destinations)
            .values()
            .filter(|d| !d.target.is_sink())
            .count()
    }

    fn drop_event(&self, event: &Event, cause: &str) {
        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        counter!("kstore_events_dropped_total", 1u64);
        warn!(
            object = %event.involved_object.key(),
            reason = %event.reason,
            cause,
            "dropping event"
        );
    }

    fn register(&self, target: Target) -> EventResult<Subscription> {
        let mut state = self
            .inner
            .state
            .lock()
            .map_err(|_| EventError::Internal("broadcaster state lock poisoned".into()))?;
        if *state == State::ShutDown {
            return Err(EventError::ShutDown);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let stop = self.inner.shutdown.child_token();
        let is_sink = target.is_sink();
        {
            let mut destinations = self
                .inner
                .destinations
                .lock()
                .map_err(|_| EventError::Internal("broadcaster destination lock poisoned".into()))?;
            destinations.insert(
                id,
                Destination {
                    target,
                    stop: stop.clone(),
                },
            );
            publish_gauges(&destinations);
        }

        // Destinations go in before the loop starts so queued events reach them.
        if *state == State::Idle {
            if let Err(e) = self.spawn_loop() {
                let mut destinations = lock(&self.inner.destinations);
                destinations.remove(&id);
                publish_gauges(&destinations);
                return Err(e);
            }
            *state = State::Running;
            info!(
                queue_capacity = self.inner.config.queue_capacity,
                "event broadcaster started"
            );
        }
        debug!(id, sink = is_sink, "event destination registered");
        Ok(Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
            stop,
        })
    }

    fn spawn_loop(&self) -> EventResult<()> {
        let handle = Handle::try_current()
            .map_err(|_| EventError::Internal("event broadcaster needs a tokio runtime".into()))?;
        let rx = lock(&self.inner.rx)
            .take()
            .ok_or_else(|| EventError::Internal("event queue already consumed".into()))?;
        handle.spawn(distribute(
            Arc::downgrade(&self.inner),
            rx,
            self.inner.shutdown.clone(),
        ));
        Ok(())
    }
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("config", &self.inner.config)
            .field("state", &*lock(&self.inner.state))
            .field("recorded", &self.recorded_count())
            .field("dropped", &self.dropped_count())
            .finish()
    }
}

/// Handle to one registered sink or watcher.
#[derive(Debug)]
pub struct Subscription {
    inner: Weak<Inner>,
    id: u64,
    stop: CancellationToken,
}

impl Subscription {
    /// Unregister this destination; in-flight deliveries to it are abandoned.
    /// Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut destinations = lock(&inner.destinations);
        if destinations.remove(&self.id).is_some() {
            publish_gauges(&destinations);
            debug!(id = self.id, "event destination stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

// ---------------------------------------------------------------------------
// Distribution
// ---------------------------------------------------------------------------

async fn distribute(
    inner: Weak<Inner>,
    mut rx: mpsc::Receiver<Event>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        dispatch(&inner, event);
    }
    debug!("event distribution loop stopped");
}

fn dispatch(inner: &Inner, event: Event) {
    let destinations: Vec<(Target, CancellationToken)> = lock(&inner.destinations)
        .values()
        .map(|d| (d.target.clone(), d.stop.clone()))
        .collect();
    for (target, stop) in destinations {
        let event = event.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => {}
                _ = deliver(target, event) => {}
            }
        });
    }
}

async fn deliver(target: Target, event: Event) {
    match target {
        Target::Watcher(watcher) => watcher(&event),
        Target::Sink {
            sink,
            options,
            correlator,
        } => {
            let event = lock(&correlator).correlate(event);
            deliver_to_sink(sink.as_ref(), &options, &event).await;
        }
    }
}

async fn deliver_to_sink(sink: &dyn EventSink, options: &SinkOptions, event: &Event) {
    let ctx = Context::background();
    let attempts = options.max_attempts.max(1);
    for attempt in 1..=attempts {
        match write_event(sink, &ctx, event).await {
            Ok(stored) => {
                debug!(event = %stored.metadata.name, count = stored.count, "event persisted");
                return;
            }
            Err(e) if !e.is_retryable() || attempt == attempts => {
                warn!(
                    event = %event.metadata.name,
                    reason = %event.reason,
                    attempt,
                    error = %e,
                    "giving up on event"
                );
                return;
            }
            Err(e) => {
                debug!(event = %event.metadata.name, attempt, error = %e, "event write failed, retrying");
                tokio::time::sleep(options.retry_interval()).await;
            }
        }
    }
}

/// Create, or merge into the existing event of the same name.
async fn write_event(sink: &dyn EventSink, ctx: &Context, event: &Event) -> EventResult<Event> {
    match sink.create(ctx, event).await {
        Err(e) if e.is_already_exists() => sink.update(ctx, event).await,
        other => other,
    }
}

fn publish_gauges(destinations: &HashMap<u64, Destination>) {
    let sinks = destinations.values().filter(|d| d.target.is_sink()).count();
    gauge!("kstore_event_sinks_active", sinks as f64);
    gauge!(
        "kstore_event_watchers_active",
        (destinations.len() - sinks) as f64
    );
}

/// Every critical section here leaves its data consistent, so a poisoned
/// lock is still safe to use.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
