use kstore_client::{
    Client, ClientResult, CreateOptions, DeleteOptions, GetOptions, ListOptions, Patch,
    PatchOptions, PatchOutcome, Patched, UpdateOptions,
};
use kstore_storage::Context;
use kstore_types::{ObjectKey, ObjectMeta, ObjectReference, Referent, Resource, ResourceList};

use crate::event::EventType;
use crate::recorder::EventRecorder;

/// A [`Client`] that reports every write as an event on the object.
///
/// Successful writes emit `Normal` events (`Created`, `Updated`, `Deleted`,
/// `Patched`); failures emit `Warning` events (`FailedCreate`, ...). Dry runs
/// and patches that change nothing emit nothing.
#[derive(Clone, Debug)]
pub struct RecordingClient {
    client: Client,
    recorder: EventRecorder,
}

impl RecordingClient {
    pub fn new(client: Client, recorder: EventRecorder) -> Self {
        Self { client, recorder }
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    pub async fn get<T: Resource>(&self, ctx: &Context, key: &ObjectKey, opts: &GetOptions) -> ClientResult<T> {
        self.client.get(ctx, key, opts).await
    }

    pub async fn list<T: Resource>(&self, ctx: &Context, opts: &ListOptions) -> ClientResult<ResourceList<T>> {
        self.client.list(ctx, opts).await
    }

    pub async fn create<T: Resource>(&self, ctx: &Context, obj: &T, opts: &CreateOptions) -> ClientResult<T> {
        let result = self.client.create(ctx, obj, opts).await;
        if !opts.dry_run {
            match &result {
                Ok(created) => self.succeeded(created, "Created", "created"),
                Err(e) => self.failed(obj, "FailedCreate", "create", e),
            }
        }
        result
    }

    pub async fn update<T: Resource>(&self, ctx: &Context, obj: &T, opts: &UpdateOptions) -> ClientResult<T> {
        let result = self.client.update(ctx, obj, opts).await;
        if !opts.dry_run {
            match &result {
                Ok(updated) => self.succeeded(updated, "Updated", "updated"),
                Err(e) => self.failed(obj, "FailedUpdate", "update", e),
            }
        }
        result
    }

    pub async fn delete<T: Resource>(&self, ctx: &Context, obj: &T, opts: &DeleteOptions) -> ClientResult<T> {
        self.delete_by_key(ctx, &obj.object_key(), opts).await
    }

    pub async fn delete_by_key<T: Resource>(
        &self,
        ctx: &Context,
        key: &ObjectKey,
        opts: &DeleteOptions,
    ) -> ClientResult<T> {
        let result = self.client.delete_by_key::<T>(ctx, key, opts).await;
        if !opts.dry_run {
            match &result {
                Ok(deleted) => self.succeeded(deleted, "Deleted", "deleted"),
                Err(e) => self.failed(&reference::<T>(key), "FailedDelete", "delete", e),
            }
        }
        result
    }

    pub async fn patch<T: Resource>(
        &self,
        ctx: &Context,
        key: &ObjectKey,
        patch: &Patch,
        opts: &PatchOptions,
    ) -> ClientResult<Patched<T>> {
        let result = self.client.patch::<T>(ctx, key, patch, opts).await;
        if !opts.dry_run {
            match &result {
                Ok(Patched {
                    outcome: PatchOutcome::Unchanged,
                    ..
                }) => {}
                Ok(Patched {
                    object,
                    outcome: PatchOutcome::Created,
                }) => self.succeeded(object, "Created", "created"),
                Ok(Patched { object, .. }) => self.succeeded(object, "Patched", "patched"),
                Err(e) => self.failed(&reference::<T>(key), "FailedPatch", "patch", e),
            }
        }
        result
    }

    fn succeeded<T: Resource>(&self, obj: &T, reason: &str, verb: &str) {
        self.recorder.eventf(
            obj,
            EventType::Normal,
            reason,
            format_args!("{verb} {} {}", T::type_identity().kind, obj.object_key()),
        );
    }

    fn failed(&self, obj: &dyn Referent, reason: &str, verb: &str, err: &dyn std::error::Error) {
        self.recorder
            .eventf(obj, EventType::Warning, reason, format_args!("{verb} failed: {err}"));
    }
}

fn reference<T: Resource>(key: &ObjectKey) -> ObjectReference {
    ObjectReference::from_meta(&T::type_identity(), &ObjectMeta::named(key.namespace.clone(), key.name.clone()))
}
