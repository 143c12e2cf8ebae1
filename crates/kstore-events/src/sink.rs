//! Durable event destinations.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use kstore_client::{Client, ClientError, CreateOptions, Patch, PatchOptions, UpdateOptions};
use kstore_storage::Context;
use kstore_types::{ObjectKey, Resource};

use crate::error::{EventError, EventResult};
use crate::event::{Event, EVENT_COLLECTION};

/// Retries of the read-merge-write cycle in [`ClientSink::update`] before a
/// conflict is reported.
const MAX_MERGE_RETRIES: usize = 8;

/// A place events are persisted.
///
/// The broadcaster calls `create` first and falls back to `update` when the
/// event name already exists, so `update` must fold the incoming occurrence
/// into whatever is stored.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn create(&self, ctx: &Context, event: &Event) -> EventResult<Event>;

    /// Merge `event` into the stored event of the same name.
    async fn update(&self, ctx: &Context, event: &Event) -> EventResult<Event>;

    async fn patch(&self, ctx: &Context, event: &Event, patch: &Patch) -> EventResult<Event>;
}

/// Per-sink delivery settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkOptions {
    /// Recurrences within this many seconds reuse the first occurrence's name.
    pub dedup_window_secs: u64,
    /// Attempts per event, including the first.
    pub max_attempts: u32,
    pub retry_interval_ms: u64,
    /// Correlation entries kept before the least recently seen is evicted.
    pub cache_size: usize,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            dedup_window_secs: 600,
            max_attempts: 3,
            retry_interval_ms: 100,
            cache_size: 4096,
        }
    }
}

impl SinkOptions {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// ClientSink
// ---------------------------------------------------------------------------

/// Persists events through a [`Client`]; the `Event` type must be registered
/// with the client's registry.
#[derive(Clone)]
pub struct ClientSink {
    client: Client,
}

impl ClientSink {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventSink for ClientSink {
    async fn create(&self, ctx: &Context, event: &Event) -> EventResult<Event> {
        Ok(self.client.create(ctx, event, &CreateOptions::default()).await?)
    }

    async fn update(&self, ctx: &Context, event: &Event) -> EventResult<Event> {
        let key = event.object_key();
        for _ in 0..MAX_MERGE_RETRIES {
            let Some(mut stored) = self.client.get_opt::<Event>(ctx, &key).await? else {
                match self.client.create(ctx, event, &CreateOptions::default()).await {
                    Err(e) if e.is_already_exists() => continue,
                    other => return Ok(other?),
                }
            };
            stored.merge_occurrence(event);
            match self.client.update(ctx, &stored, &UpdateOptions::default()).await {
                Err(e) if e.is_conflict() => {
                    debug!(event = %key, "event changed underneath merge, retrying");
                }
                other => return Ok(other?),
            }
        }
        Err(ClientError::Conflict {
            collection: EVENT_COLLECTION.into(),
            name: key.name,
            reason: "too many concurrent writers".into(),
        }
        .into())
    }

    async fn patch(&self, ctx: &Context, event: &Event, patch: &Patch) -> EventResult<Event> {
        let patched = self
            .client
            .patch::<Event>(ctx, &event.object_key(), patch, &PatchOptions::default())
            .await?;
        Ok(patched.object)
    }
}

// ---------------------------------------------------------------------------
// InMemorySink
// ---------------------------------------------------------------------------

/// Keeps events in a map; useful in tests and for processes without storage.
#[derive(Debug, Default)]
pub struct InMemorySink {
    events: Mutex<BTreeMap<ObjectKey, Event>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored event, ordered by key.
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, key: &ObjectKey) -> Option<Event> {
        self.events.lock().ok()?.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> EventResult<std::sync::MutexGuard<'_, BTreeMap<ObjectKey, Event>>> {
        self.events
            .lock()
            .map_err(|_| EventError::Internal("in-memory sink lock poisoned".into()))
    }
}

#[async_trait]
impl EventSink for InMemorySink {
    async fn create(&self, ctx: &Context, event: &Event) -> EventResult<Event> {
        ctx.check().map_err(|e| ClientError::from_storage(e, EVENT_COLLECTION, &event.metadata.name))?;
        let key = event.object_key();
        let mut events = self.lock()?;
        if events.contains_key(&key) {
            return Err(EventError::AlreadyExists(key.to_string()));
        }
        events.insert(key, event.clone());
        Ok(event.clone())
    }

    async fn update(&self, ctx: &Context, event: &Event) -> EventResult<Event> {
        ctx.check().map_err(|e| ClientError::from_storage(e, EVENT_COLLECTION, &event.metadata.name))?;
        let mut events = self.lock()?;
        let stored = events
            .entry(event.object_key())
            .and_modify(|stored| stored.merge_occurrence(event))
            .or_insert_with(|| event.clone());
        Ok(stored.clone())
    }

    async fn patch(&self, ctx: &Context, event: &Event, patch: &Patch) -> EventResult<Event> {
        ctx.check().map_err(|e| ClientError::from_storage(e, EVENT_COLLECTION, &event.metadata.name))?;
        let key = event.object_key();
        let mut events = self.lock()?;
        let stored = events
            .get(&key)
            .ok_or_else(|| EventError::NotFound(key.to_string()))?;
        let document = serde_json::to_value(stored).map_err(ClientError::from)?;
        let patched = patch.apply_to(&document).map_err(ClientError::from)?;
        let patched: Event = serde_json::from_value(patched).map_err(ClientError::from)?;
        events.insert(key, patched.clone());
        Ok(patched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kstore_types::ObjectMeta;
    use serde_json::json;

    fn event(name: &str, count: i32) -> Event {
        Event {
            metadata: ObjectMeta::named("default", name),
            reason: "Synced".into(),
            message: format!("seen {count}"),
            count,
            ..Event::default()
        }
    }

    #[tokio::test]
    async fn in_memory_create_then_update_aggregates() {
        let sink = InMemorySink::new();
        let ctx = Context::background();
        sink.create(&ctx, &event("a.1", 5)).await.unwrap();

        let err = sink.create(&ctx, &event("a.1", 2)).await.unwrap_err();
        assert!(err.is_already_exists());

        let merged = sink.update(&ctx, &event("a.1", 2)).await.unwrap();
        assert_eq!(merged.count, 7);
        assert_eq!(merged.message, "seen 2");
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn in_memory_patch() {
        let sink = InMemorySink::new();
        let ctx = Context::background();
        let e = event("a.1", 1);
        assert!(sink
            .patch(&ctx, &e, &Patch::Merge(json!({})))
            .await
            .unwrap_err()
            .is_not_found());

        sink.create(&ctx, &e).await.unwrap();
        let patched = sink
            .patch(&ctx, &e, &Patch::Merge(json!({"message": "patched"})))
            .await
            .unwrap();
        assert_eq!(patched.message, "patched");
        assert_eq!(sink.get(&e.object_key()).unwrap().message, "patched");
    }

    #[tokio::test]
    async fn cancelled_context_writes_nothing() {
        let sink = InMemorySink::new();
        let ctx = Context::background();
        ctx.cancel();
        assert!(sink.create(&ctx, &event("a.1", 1)).await.is_err());
        assert!(sink.is_empty());
    }

    #[test]
    fn options_defaults_and_partial_override() {
        let opts: SinkOptions = serde_json::from_value(json!({"max_attempts": 5})).unwrap();
        assert_eq!(opts.max_attempts, 5);
        assert_eq!(opts.dedup_window(), Duration::from_secs(600));
        assert_eq!(opts.cache_size, 4096);
    }
}
