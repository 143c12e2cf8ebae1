//! The [`Storage`] trait every backend implements.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::context::Context;
use crate::error::StorageResult;
use crate::types::{
    GetOptions, ListOptions, ListResult, Preconditions, Proposal, UpdateOutcome, WatchOptions,
};
use crate::version::Versioner;
use crate::watch::WatchStream;

/// Read-modify-write callback for [`Storage::guaranteed_update`].
///
/// Receives the current object (`None` if absent and `ignore_not_found` was
/// set) and returns the object to commit. May be invoked more than once.
pub type UpdateFn<'a> =
    dyn Fn(Option<Value>) -> BoxFuture<'a, StorageResult<Proposal>> + Send + Sync + 'a;

/// Veto callback for [`Storage::delete`], run against the loaded object.
pub type ValidateDeleteFn<'a> =
    dyn Fn(Value) -> BoxFuture<'a, StorageResult<()>> + Send + Sync + 'a;

/// Versioned object storage with optimistic concurrency and change feeds.
///
/// Objects are JSON values addressed by fully-qualified key strings (see
/// [`KeyScheme`](crate::KeyScheme)). Every successful mutation of a key
/// assigns it a strictly greater resource version, written to
/// `metadata.resourceVersion` of the stored object. Versions are never
/// reused.
///
/// Implementations must be safe to share across tasks (`Send + Sync`) and
/// every operation must return promptly with `Cancelled` or `Timeout` once
/// the call context is done.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Encoder for this backend's resource versions.
    fn versioner(&self) -> &dyn Versioner;

    /// Store a new object. Fails with `AlreadyExists` if the key is live.
    /// Returns the object as stored, with its resource version set.
    async fn create(
        &self,
        ctx: &Context,
        key: &str,
        object: Value,
        ttl: Option<Duration>,
    ) -> StorageResult<Value>;

    /// Read one object. `NotFound` unless `opts.ignore_not_found`, in which
    /// case a missing key yields `Ok(None)`.
    async fn get(&self, ctx: &Context, key: &str, opts: &GetOptions)
        -> StorageResult<Option<Value>>;

    /// All live objects whose key starts with `prefix`, in key order.
    async fn list(&self, ctx: &Context, prefix: &str, opts: &ListOptions)
        -> StorageResult<ListResult>;

    /// Remove an object and return its last state.
    ///
    /// `NotFound` if absent; `Conflict` if `preconditions` do not hold
    /// against the loaded object. `validate`, if given, runs after loading
    /// and may veto the deletion.
    async fn delete(
        &self,
        ctx: &Context,
        key: &str,
        preconditions: Option<&Preconditions>,
        validate: Option<&ValidateDeleteFn<'_>>,
    ) -> StorageResult<Value>;

    /// Optimistic-concurrency read-modify-write.
    ///
    /// Loads the current object, runs `try_update`, and commits the proposal
    /// only if no other writer committed to the key in between. On a race
    /// the whole load/update/commit cycle repeats; a caller never loses an
    /// update silently. An error from `try_update` ends the loop and is
    /// returned as is. `Conflict` is only returned when `preconditions`
    /// fail.
    async fn guaranteed_update(
        &self,
        ctx: &Context,
        key: &str,
        ignore_not_found: bool,
        preconditions: Option<&Preconditions>,
        try_update: &UpdateFn<'_>,
    ) -> StorageResult<UpdateOutcome>;

    /// Open a change feed for every key under `prefix`.
    async fn watch(&self, ctx: &Context, prefix: &str, opts: &WatchOptions)
        -> StorageResult<WatchStream>;
}
