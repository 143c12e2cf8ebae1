//! In-memory storage backend for testing and single-process use.
//!
//! [`InMemoryStorage`] keeps every object in a `BTreeMap` behind a `RwLock`,
//! with a single global revision counter. It implements the full
//! [`Storage`] contract, including TTLs, bounded watch history and
//! lag-aware watch streams. Data is lost when the store is dropped.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{StorageError, StorageResult};
use crate::traits::{Storage, UpdateFn, ValidateDeleteFn};
use crate::types::{
    GetOptions, ListOptions, ListResult, Preconditions, UpdateOutcome, WatchEvent, WatchOptions,
};
use crate::version::{DecimalVersioner, Versioner};
use crate::watch::{watch_channel, WatchSender, WatchStream};

/// Tuning for [`InMemoryStorage`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStorageConfig {
    /// Number of past changes retained for watches that resume from a
    /// resource version.
    pub watch_history: usize,
    /// Per-watch buffer. A consumer further behind than this is closed
    /// with an `Error` event.
    pub watch_channel_capacity: usize,
}

impl Default for MemoryStorageConfig {
    fn default() -> Self {
        Self {
            watch_history: 1024,
            watch_channel_capacity: 256,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

#[derive(Clone, Debug)]
struct Change {
    key: String,
    revision: u64,
    kind: ChangeKind,
    object: Value,
}

impl Change {
    fn to_event(&self) -> WatchEvent {
        match self.kind {
            ChangeKind::Added => WatchEvent::Added(self.object.clone()),
            ChangeKind::Modified => WatchEvent::Modified(self.object.clone()),
            ChangeKind::Deleted => WatchEvent::Deleted(self.object.clone()),
        }
    }
}

#[derive(Debug)]
struct Entry {
    object: Value,
    revision: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, Entry>,
    revision: u64,
    history: VecDeque<Change>,
    /// Highest revision evicted from `history`.
    compacted: u64,
}

impl State {
    fn live(&self, key: &str, now: Instant) -> Option<&Entry> {
        self.objects.get(key).filter(|e| e.is_live(now))
    }

    fn live_under<'a>(
        &'a self,
        prefix: &'a str,
        now: Instant,
    ) -> impl Iterator<Item = (&'a String, &'a Entry)> + 'a {
        self.objects
            .range(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .filter(move |(_, e)| e.is_live(now))
    }
}

enum WatchStart {
    Now,
    Snapshot,
    After(u64),
}

/// An in-memory implementation of [`Storage`].
#[derive(Debug)]
pub struct InMemoryStorage {
    state: RwLock<State>,
    changes: broadcast::Sender<Change>,
    versioner: DecimalVersioner,
    config: MemoryStorageConfig,
}

impl InMemoryStorage {
    /// Create an empty store with default settings.
    pub fn new() -> Self {
        Self::with_config(MemoryStorageConfig::default())
    }

    pub fn with_config(config: MemoryStorageConfig) -> Self {
        let (changes, _) = broadcast::channel(config.watch_channel_capacity.max(1));
        Self {
            state: RwLock::new(State::default()),
            changes,
            versioner: DecimalVersioner,
            config,
        }
    }

    /// The current global revision.
    pub fn current_revision(&self) -> StorageResult<u64> {
        Ok(self.read()?.revision)
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|e| StorageError::Internal(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|e| StorageError::Internal(format!("lock poisoned: {e}")))
    }

    /// Apply one mutation under the write lock: bump the revision, stamp it
    /// on the object, update the map and publish the change.
    fn commit(
        &self,
        state: &mut State,
        key: &str,
        kind: ChangeKind,
        mut object: Value,
        expires_at: Option<Instant>,
    ) -> StorageResult<Value> {
        let revision = state.revision + 1;
        self.versioner.set_object_version(&mut object, revision)?;
        state.revision = revision;
        match kind {
            ChangeKind::Deleted => {
                state.objects.remove(key);
            }
            ChangeKind::Added | ChangeKind::Modified => {
                state.objects.insert(
                    key.to_string(),
                    Entry {
                        object: object.clone(),
                        revision,
                        expires_at,
                    },
                );
            }
        }
        let change = Change {
            key: key.to_string(),
            revision,
            kind,
            object: object.clone(),
        };
        state.history.push_back(change.clone());
        while state.history.len() > self.config.watch_history {
            if let Some(evicted) = state.history.pop_front() {
                state.compacted = evicted.revision;
            }
        }
        // No receivers is fine.
        let _ = self.changes.send(change);
        Ok(object)
    }

    /// Remove expired entries, publishing a `Deleted` change for each.
    fn reap_expired(&self, state: &mut State, now: Instant) -> StorageResult<()> {
        let expired: Vec<String> = state
            .objects
            .iter()
            .filter(|(_, e)| !e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            if let Some(entry) = state.objects.get(&key) {
                let object = entry.object.clone();
                debug!(key = %key, "object expired");
                self.commit(state, &key, ChangeKind::Deleted, object, None)?;
            }
        }
        Ok(())
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn labels_of(object: &Value) -> BTreeMap<String, String> {
    object
        .pointer("/metadata/labels")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Blank out the resource version so two objects can be compared by content.
/// A TTL too large to represent as an instant never expires.
fn expiry(now: Instant, ttl: Option<Duration>) -> Option<Instant> {
    ttl.and_then(|t| now.checked_add(t))
}

fn without_version(versioner: &dyn Versioner, object: &Value) -> Value {
    let mut copy = object.clone();
    versioner.clear_object_version(&mut copy);
    copy
}

#[async_trait]
impl Storage for InMemoryStorage {
    fn versioner(&self) -> &dyn Versioner {
        &self.versioner
    }

    async fn create(
        &self,
        ctx: &Context,
        key: &str,
        object: Value,
        ttl: Option<Duration>,
    ) -> StorageResult<Value> {
        ctx.check()?;
        if !object.is_object() {
            return Err(StorageError::BadRequest("stored objects must be JSON objects".into()));
        }
        if self.versioner.object_version(&object)?.is_some() {
            return Err(StorageError::BadRequest(
                "resourceVersion should not be set on objects to be created".into(),
            ));
        }

        let now = Instant::now();
        let expires_at = expiry(now, ttl);
        let mut state = self.write()?;
        self.reap_expired(&mut state, now)?;
        if state.objects.contains_key(key) {
            return Err(StorageError::AlreadyExists {
                key: key.to_string(),
            });
        }
        let stored = self.commit(
            &mut state,
            key,
            ChangeKind::Added,
            object,
            expires_at,
        )?;
        debug!(key, revision = state.revision, "created");
        Ok(stored)
    }

    async fn get(
        &self,
        ctx: &Context,
        key: &str,
        opts: &GetOptions,
    ) -> StorageResult<Option<Value>> {
        ctx.check()?;
        let state = self.read()?;
        match state.live(key, Instant::now()) {
            Some(entry) => Ok(Some(entry.object.clone())),
            None if opts.ignore_not_found => Ok(None),
            None => Err(StorageError::NotFound {
                key: key.to_string(),
            }),
        }
    }

    async fn list(
        &self,
        ctx: &Context,
        prefix: &str,
        opts: &ListOptions,
    ) -> StorageResult<ListResult> {
        ctx.check()?;
        let state = self.read()?;
        let items: Vec<Value> = state
            .live_under(prefix, Instant::now())
            .map(|(_, e)| &e.object)
            .filter(|obj| {
                opts.label_selector.is_empty() || opts.label_selector.matches(&labels_of(obj))
            })
            .cloned()
            .collect();
        debug!(prefix, count = items.len(), "listed");
        Ok(ListResult {
            items,
            resource_version: self.versioner.encode(state.revision),
        })
    }

    async fn delete(
        &self,
        ctx: &Context,
        key: &str,
        preconditions: Option<&Preconditions>,
        validate: Option<&ValidateDeleteFn<'_>>,
    ) -> StorageResult<Value> {
        loop {
            ctx.check()?;
            let (current, observed) = {
                let state = self.read()?;
                match state.live(key, Instant::now()) {
                    Some(entry) => (entry.object.clone(), entry.revision),
                    None => {
                        return Err(StorageError::NotFound {
                            key: key.to_string(),
                        })
                    }
                }
            };

            if let Some(p) = preconditions {
                p.check(key, &current)?;
            }
            if let Some(validate) = validate {
                ctx.run(validate(current.clone())).await?;
            }

            let now = Instant::now();
            let mut state = self.write()?;
            self.reap_expired(&mut state, now)?;
            if state.live(key, now).map(|e| e.revision) != Some(observed) {
                debug!(key, "delete raced with another writer, retrying");
                continue;
            }
            let deleted = self.commit(&mut state, key, ChangeKind::Deleted, current, None)?;
            debug!(key, revision = state.revision, "deleted");
            return Ok(deleted);
        }
    }

    async fn guaranteed_update(
        &self,
        ctx: &Context,
        key: &str,
        ignore_not_found: bool,
        preconditions: Option<&Preconditions>,
        try_update: &UpdateFn<'_>,
    ) -> StorageResult<UpdateOutcome> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            ctx.check()?;
            let (current, observed) = {
                let state = self.read()?;
                match state.live(key, Instant::now()) {
                    Some(entry) => (Some(entry.object.clone()), Some(entry.revision)),
                    None => (None, None),
                }
            };
            match &current {
                Some(obj) => {
                    if let Some(p) = preconditions {
                        p.check(key, obj)?;
                    }
                }
                None if ignore_not_found => {}
                None => {
                    return Err(StorageError::NotFound {
                        key: key.to_string(),
                    })
                }
            }

            let proposal = ctx.run(try_update(current.clone())).await?;
            if !proposal.object.is_object() {
                return Err(StorageError::BadRequest("stored objects must be JSON objects".into()));
            }
            let proposed = without_version(&self.versioner, &proposal.object);

            if let Some(existing) = &current {
                if without_version(&self.versioner, existing) == proposed {
                    let state = self.read()?;
                    if state.live(key, Instant::now()).map(|e| e.revision) != observed {
                        debug!(key, attempt, "stale no-op update, retrying");
                        continue;
                    }
                    return Ok(UpdateOutcome {
                        object: existing.clone(),
                        changed: false,
                        created: false,
                    });
                }
            }

            let now = Instant::now();
            let expires_at = expiry(now, proposal.ttl);
            let mut state = self.write()?;
            self.reap_expired(&mut state, now)?;
            if state.live(key, now).map(|e| e.revision) != observed {
                debug!(key, attempt, "guaranteed update raced with another writer, retrying");
                continue;
            }
            let kind = if observed.is_some() {
                ChangeKind::Modified
            } else {
                ChangeKind::Added
            };
            let stored = self.commit(
                &mut state,
                key,
                kind,
                proposed,
                expires_at,
            )?;
            debug!(key, revision = state.revision, attempt, "updated");
            return Ok(UpdateOutcome {
                object: stored,
                changed: true,
                created: observed.is_none(),
            });
        }
    }

    async fn watch(
        &self,
        ctx: &Context,
        prefix: &str,
        opts: &WatchOptions,
    ) -> StorageResult<WatchStream> {
        ctx.check()?;
        let start = match opts.resource_version.as_deref() {
            None | Some("") => WatchStart::Now,
            Some("0") => WatchStart::Snapshot,
            Some(rv) => WatchStart::After(self.versioner.parse(rv)?),
        };

        // Subscribe and snapshot under one read lock; commits publish while
        // holding the write lock, so nothing falls between the two.
        let (initial, from, receiver) = {
            let state = self.read()?;
            let receiver = self.changes.subscribe();
            match start {
                WatchStart::Now => (Vec::new(), state.revision, receiver),
                WatchStart::Snapshot => {
                    let initial = state
                        .live_under(prefix, Instant::now())
                        .map(|(_, e)| WatchEvent::Added(e.object.clone()))
                        .collect();
                    (initial, state.revision, receiver)
                }
                WatchStart::After(revision) => {
                    if revision < state.compacted {
                        return Err(StorageError::Expired {
                            requested: revision,
                            oldest: state.compacted,
                        });
                    }
                    let replay = state
                        .history
                        .iter()
                        .filter(|c| c.revision > revision && c.key.starts_with(prefix))
                        .map(Change::to_event)
                        .collect();
                    (replay, state.revision.max(revision), receiver)
                }
            }
        };

        let bookmark = opts.allow_bookmarks.then(|| WatchEvent::Bookmark {
            resource_version: self.versioner.encode(from),
        });
        let (sender, stream) = watch_channel(ctx, self.config.watch_channel_capacity);
        debug!(prefix, from, "watch opened");
        tokio::spawn(forward(
            sender,
            prefix.to_string(),
            initial,
            bookmark,
            from,
            receiver,
        ));
        Ok(stream)
    }
}

/// Producer task for one watch.
async fn forward(
    sender: WatchSender,
    prefix: String,
    initial: Vec<WatchEvent>,
    bookmark: Option<WatchEvent>,
    from: u64,
    mut receiver: broadcast::Receiver<Change>,
) {
    for event in initial.into_iter().chain(bookmark) {
        if !sender.send(event).await {
            return;
        }
    }
    loop {
        let received = tokio::select! {
            _ = sender.stopped() => return,
            received = receiver.recv() => received,
        };
        match received {
            Ok(change) => {
                if change.revision <= from || !change.key.starts_with(&prefix) {
                    continue;
                }
                if !sender.send(change.to_event()).await {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(prefix = %prefix, skipped, "watch consumer fell behind, closing stream");
                let _ = sender
                    .send(WatchEvent::Error(format!(
                        "watch fell behind by {skipped} events"
                    )))
                    .await;
                return;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
