//! The generic typed client.
//!
//! A [`Client`] binds one [`Storage`] backend to one [`TypeRegistry`]. Every
//! operation resolves the Rust type's [`TypeIdentity`] to its collection,
//! derives the storage key through the [`KeyScheme`], runs admission hooks
//! and then calls into storage. Objects travel through storage as JSON with
//! `apiVersion` and `kind` stamped in.

use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use rand::Rng;
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use kstore_registry::{ResourceDescriptor, TypeRegistry};
use kstore_storage::{
    self as storage, Context, KeyScheme, Preconditions, Proposal, Storage, StorageError,
};
use kstore_types::{
    CollectionIdentity, FieldError, ObjectKey, ObjectMeta, Resource, ResourceList, TypeIdentity,
};

use crate::admission::Admission;
use crate::error::{ClientError, ClientResult};
use crate::options::{
    ClientConfig, CreateOptions, DeleteOptions, GetOptions, ListOptions, PatchOptions,
    UpdateOptions, WatchOptions,
};
use crate::patch::Patch;
use crate::status::StatusClient;
use crate::watch::TypedWatch;

/// Characters used for `generateName` suffixes; no vowels, no look-alikes.
const NAME_SUFFIX_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";
const NAME_SUFFIX_LEN: usize = 5;

/// What a patch call did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The object did not exist and an apply patch created it.
    Created,
    /// The object changed.
    Patched,
    /// The patch left the object as it was; nothing was written.
    Unchanged,
}

/// Result of [`Client::patch`].
#[derive(Clone, Debug)]
pub struct Patched<T> {
    pub object: T,
    pub outcome: PatchOutcome,
}

/// Registry lookup result for one Rust type.
#[derive(Clone, Debug)]
pub(crate) struct Target {
    pub(crate) type_identity: TypeIdentity,
    pub(crate) collection: CollectionIdentity,
    pub(crate) descriptor: ResourceDescriptor,
}

impl Target {
    pub(crate) fn collection_name(&self) -> String {
        self.collection.qualified_name()
    }

    pub(crate) fn wrap(&self, err: StorageError, name: &str) -> ClientError {
        ClientError::from_storage(err, &self.collection_name(), name)
    }

    pub(crate) fn not_found(&self, name: &str) -> ClientError {
        ClientError::NotFound {
            collection: self.collection_name(),
            name: name.to_string(),
        }
    }

    pub(crate) fn conflict(&self, name: &str, reason: impl Into<String>) -> ClientError {
        ClientError::Conflict {
            collection: self.collection_name(),
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    fn missing_name(&self) -> ClientError {
        ClientError::Invalid {
            kind: self.type_identity.kind.clone(),
            name: String::new(),
            errors: FieldError::required("metadata.name", "name or generateName is required")
                .into(),
        }
    }
}

struct ClientInner {
    storage: Arc<dyn Storage>,
    registry: Arc<TypeRegistry>,
    keys: KeyScheme,
    admission: Admission,
    config: ClientConfig,
}

/// Typed CRUD, patch, status and watch over any [`Storage`] backend.
///
/// Cheap to clone; clones share storage, registry and admission hooks.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("root", &self.inner.keys.root_prefix())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn new(storage: Arc<dyn Storage>, registry: Arc<TypeRegistry>, keys: KeyScheme) -> Self {
        Self::with_config(storage, registry, keys, ClientConfig::default())
    }

    pub fn with_config(
        storage: Arc<dyn Storage>,
        registry: Arc<TypeRegistry>,
        keys: KeyScheme,
        config: ClientConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                storage,
                registry,
                keys,
                admission: Admission::new(),
                config,
            }),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.storage
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.inner.registry
    }

    pub fn keys(&self) -> &KeyScheme {
        &self.inner.keys
    }

    /// Defaulting and validation hooks applied by this client.
    pub fn admission(&self) -> &Admission {
        &self.inner.admission
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Sub-client that reads and writes only the `status` of objects.
    pub fn status(&self) -> StatusClient<'_> {
        StatusClient::new(self)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Fetch one object. With `ignore_not_found`, a missing object yields
    /// `T::default()`.
    pub async fn get<T: Resource>(
        &self,
        ctx: &Context,
        key: &ObjectKey,
        opts: &GetOptions,
    ) -> ClientResult<T> {
        match self.get_opt::<T>(ctx, key).await? {
            Some(obj) => Ok(obj),
            None if opts.ignore_not_found => Ok(T::default()),
            None => Err(self.target::<T>()?.not_found(&key.name)),
        }
    }

    /// Fetch one object, `None` if it does not exist.
    pub async fn get_opt<T: Resource>(&self, ctx: &Context, key: &ObjectKey) -> ClientResult<Option<T>> {
        ctx.check()?;
        let target = self.target::<T>()?;
        let namespace = self.namespace_for(&target, &key.namespace);
        let skey = self.storage_key(&target, &namespace, &key.name)?;
        debug!(key = %skey, "get");
        let found = self
            .inner
            .storage
            .get(ctx, &skey, &storage::GetOptions { ignore_not_found: true })
            .await
            .map_err(|e| target.wrap(e, &key.name))?;
        found.map(decode).transpose()
    }

    /// List objects of `T`, in one namespace or across all of them.
    ///
    /// Namespace scoping becomes a storage key prefix; label and field
    /// selectors are applied to the results.
    pub async fn list<T: Resource>(&self, ctx: &Context, opts: &ListOptions) -> ClientResult<ResourceList<T>> {
        ctx.check()?;
        let target = self.target::<T>()?;
        let prefix = self.scan_prefix(&target, opts.namespace.as_deref(), &opts.field_selector)?;
        debug!(prefix = %prefix, labels = %opts.label_selector, "list");
        let result = self
            .inner
            .storage
            .list(
                ctx,
                &prefix,
                &storage::ListOptions {
                    label_selector: opts.label_selector.clone(),
                },
            )
            .await
            .map_err(|e| target.wrap(e, ""))?;

        let api_version = target.type_identity.api_version();
        let mut items = Vec::with_capacity(result.items.len());
        for value in result.items {
            if !is_kind(&value, &api_version, &target.type_identity.kind)
                || !opts.field_selector.matches(&value)
            {
                continue;
            }
            let obj: T = decode(value)?;
            if opts.label_selector.matches(&obj.meta().labels) {
                items.push(obj);
            }
        }
        Ok(ResourceList::new(result.resource_version, items))
    }

    /// Open a typed change feed for `T`.
    pub async fn watch<T: Resource>(&self, ctx: &Context, opts: &WatchOptions) -> ClientResult<TypedWatch<T>> {
        ctx.check()?;
        let target = self.target::<T>()?;
        let prefix = self.scan_prefix(&target, opts.namespace.as_deref(), &opts.field_selector)?;
        debug!(prefix = %prefix, resource_version = ?opts.resource_version, "watch");
        let stream = self
            .inner
            .storage
            .watch(
                ctx,
                &prefix,
                &storage::WatchOptions {
                    resource_version: opts.resource_version.clone(),
                    allow_bookmarks: opts.allow_bookmarks,
                },
            )
            .await
            .map_err(|e| target.wrap(e, ""))?;
        Ok(TypedWatch::new(stream, &target.type_identity, opts))
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Default, validate and store a new object. Returns the stored object.
    ///
    /// Nothing is written unless every hook passes.
    pub async fn create<T: Resource>(&self, ctx: &Context, obj: &T, opts: &CreateOptions) -> ClientResult<T> {
        ctx.check()?;
        let target = self.target::<T>()?;
        if !obj.meta().resource_version.is_empty() {
            return Err(ClientError::BadRequest(
                "resourceVersion must not be set on create".into(),
            ));
        }
        let mut obj = obj.clone();
        self.prepare_create(ctx, &target, &mut obj).await?;
        let name = obj.meta().name.clone();
        let key = self.storage_key(&target, &obj.meta().namespace, &name)?;
        if opts.dry_run {
            debug!(key = %key, "dry-run create");
            return Ok(obj);
        }
        let value = encode(&target, &obj)?;
        let stored = self
            .inner
            .storage
            .create(ctx, &key, value, opts.ttl)
            .await
            .map_err(|e| target.wrap(e, &name))?;
        debug!(key = %key, field_manager = ?opts.field_manager, "created");
        decode(stored)
    }

    /// Replace an object. If the caller's copy carries a resource version,
    /// the write only succeeds against that version; otherwise it applies to
    /// whatever is current.
    pub async fn update<T: Resource>(&self, ctx: &Context, obj: &T, opts: &UpdateOptions) -> ClientResult<T> {
        ctx.check()?;
        let target = self.target::<T>()?;
        let mut obj = obj.clone();
        let namespace = self.namespace_for(&target, &obj.meta().namespace);
        obj.meta_mut().namespace = namespace;
        self.inner.admission.apply_defaults(ctx, &mut obj).await?;
        let name = obj.meta().name.clone();
        let key = self.storage_key(&target, &obj.meta().namespace, &name)?;
        let preconditions = caller_preconditions(obj.meta());

        if opts.dry_run {
            let current = self.load(ctx, &target, &key, &name).await?;
            if let Some(p) = &preconditions {
                p.check(&key, &current).map_err(|e| target.wrap(e, &name))?;
            }
            let next = self.update_proposal(ctx, &target, &obj, current).await?;
            return decode(next);
        }

        let (client, target_ref, obj_ref) = (self, &target, &obj);
        let try_update = move |current: Option<Value>| {
            async move {
                let current = current
                    .ok_or_else(|| target_ref.not_found(&obj_ref.meta().name))
                    .map_err(ClientError::into_storage)?;
                client
                    .update_proposal(ctx, target_ref, obj_ref, current)
                    .await
                    .map(Proposal::new)
                    .map_err(ClientError::into_storage)
            }
            .boxed()
        };
        let outcome = self
            .inner
            .storage
            .guaranteed_update(ctx, &key, false, preconditions.as_ref(), &try_update)
            .await
            .map_err(|e| target.wrap(e, &name))?;
        debug!(key = %key, changed = outcome.changed, field_manager = ?opts.field_manager, "updated");
        decode(outcome.object)
    }

    /// Delete the object `obj` names. Returns its last stored state.
    pub async fn delete<T: Resource>(&self, ctx: &Context, obj: &T, opts: &DeleteOptions) -> ClientResult<T> {
        self.delete_by_key::<T>(ctx, &obj.object_key(), opts).await
    }

    pub async fn delete_by_key<T: Resource>(
        &self,
        ctx: &Context,
        key: &ObjectKey,
        opts: &DeleteOptions,
    ) -> ClientResult<T> {
        ctx.check()?;
        let target = self.target::<T>()?;
        let namespace = self.namespace_for(&target, &key.namespace);
        let skey = self.storage_key(&target, &namespace, &key.name)?;

        if opts.dry_run {
            let current = self.load(ctx, &target, &skey, &key.name).await?;
            if let Some(p) = &opts.preconditions {
                p.check(&skey, &current).map_err(|e| target.wrap(e, &key.name))?;
            }
            let obj: T = decode(current)?;
            self.inner.admission.validate_delete(ctx, &obj).await?;
            return Ok(obj);
        }

        let admission = &self.inner.admission;
        let validate = move |current: Value| {
            async move {
                let obj: T = decode(current).map_err(ClientError::into_storage)?;
                admission
                    .validate_delete(ctx, &obj)
                    .await
                    .map_err(ClientError::into_storage)
            }
            .boxed()
        };
        let deleted = self
            .inner
            .storage
            .delete(ctx, &skey, opts.preconditions.as_ref(), Some(&validate))
            .await
            .map_err(|e| target.wrap(e, &key.name))?;
        debug!(key = %skey, "deleted");
        decode(deleted)
    }

    /// Patch an object as a read-modify-write under optimistic concurrency.
    ///
    /// Apply patches create the object when it is missing and report
    /// [`PatchOutcome::Unchanged`] when they leave it as it was.
    pub async fn patch<T: Resource>(
        &self,
        ctx: &Context,
        key: &ObjectKey,
        patch: &Patch,
        opts: &PatchOptions,
    ) -> ClientResult<Patched<T>> {
        ctx.check()?;
        let target = self.target::<T>()?;
        let namespace = self.namespace_for(&target, &key.namespace);
        let skey = self.storage_key(&target, &namespace, &key.name)?;
        let object_key = ObjectKey::new(namespace, key.name.clone());
        let field_manager = match patch {
            Patch::Apply(body) => {
                check_apply_body(&target, body)?;
                Some(self.field_manager(opts)?)
            }
            _ => opts.field_manager.clone(),
        };

        if opts.dry_run {
            let current = self
                .inner
                .storage
                .get(ctx, &skey, &storage::GetOptions { ignore_not_found: true })
                .await
                .map_err(|e| target.wrap(e, &key.name))?;
            if current.is_none() && !patch.is_apply() {
                return Err(target.not_found(&key.name));
            }
            let next = self
                .patch_proposal::<T>(ctx, &target, &object_key, patch, current.clone())
                .await?;
            let outcome = match &current {
                None => PatchOutcome::Created,
                Some(cur) if same_ignoring_version(cur, &next) => PatchOutcome::Unchanged,
                Some(_) => PatchOutcome::Patched,
            };
            return Ok(Patched {
                object: decode(next)?,
                outcome,
            });
        }

        let (client, target_ref, key_ref) = (self, &target, &object_key);
        let try_update = move |current: Option<Value>| {
            async move {
                client
                    .patch_proposal::<T>(ctx, target_ref, key_ref, patch, current)
                    .await
                    .map(Proposal::new)
                    .map_err(ClientError::into_storage)
            }
            .boxed()
        };
        let outcome = self
            .inner
            .storage
            .guaranteed_update(ctx, &skey, patch.is_apply(), None, &try_update)
            .await
            .map_err(|e| target.wrap(e, &key.name))?;
        let result = if outcome.created {
            PatchOutcome::Created
        } else if outcome.changed {
            PatchOutcome::Patched
        } else {
            PatchOutcome::Unchanged
        };
        if result == PatchOutcome::Created {
            info!(key = %skey, field_manager = ?field_manager, "apply created object");
        }
        debug!(key = %skey, patch_type = patch.content_type(), outcome = ?result, "patched");
        Ok(Patched {
            object: decode(outcome.object)?,
            outcome: result,
        })
    }

    // -----------------------------------------------------------------------
    // Internals shared with the status sub-client
    // -----------------------------------------------------------------------

    pub(crate) fn target<T: Resource>(&self) -> ClientResult<Target> {
        let type_identity = T::type_identity();
        let (collection, descriptor) = self.inner.registry.lookup_type(&type_identity)?;
        Ok(Target {
            type_identity,
            collection,
            descriptor,
        })
    }

    fn default_namespace(&self) -> &str {
        self.inner
            .config
            .default_namespace
            .as_deref()
            .unwrap_or_else(|| self.inner.keys.default_namespace())
    }

    /// Cluster-scoped objects never carry a namespace; namespaced ones fall
    /// back to the default.
    pub(crate) fn namespace_for(&self, target: &Target, requested: &str) -> String {
        if !target.descriptor.namespaced {
            String::new()
        } else if requested.is_empty() {
            self.default_namespace().to_string()
        } else {
            requested.to_string()
        }
    }

    pub(crate) fn storage_key(&self, target: &Target, namespace: &str, name: &str) -> ClientResult<String> {
        if name.is_empty() {
            return Err(target.missing_name());
        }
        self.inner
            .keys
            .object_key(&target.collection, namespace, name)
            .map_err(|e| target.wrap(e, name))
    }

    /// Storage prefix for a list or watch. A field selector pinning
    /// `metadata.namespace` narrows an all-namespaces scan to one namespace.
    fn scan_prefix(
        &self,
        target: &Target,
        namespace: Option<&str>,
        fields: &kstore_types::FieldSelector,
    ) -> ClientResult<String> {
        let namespace = if !target.descriptor.namespaced {
            Some("")
        } else {
            namespace.or_else(|| fields.required_value("metadata.namespace"))
        };
        let prefix = match namespace {
            Some(ns) => self.inner.keys.collection_prefix(&target.collection, ns),
            None => Ok(self.inner.keys.root_prefix()),
        };
        prefix.map_err(|e| target.wrap(e, ""))
    }

    pub(crate) async fn load(
        &self,
        ctx: &Context,
        target: &Target,
        key: &str,
        name: &str,
    ) -> ClientResult<Value> {
        self.inner
            .storage
            .get(ctx, key, &storage::GetOptions::default())
            .await
            .map_err(|e| target.wrap(e, name))?
            .ok_or_else(|| target.not_found(name))
    }

    fn field_manager(&self, opts: &PatchOptions) -> ClientResult<String> {
        opts.field_manager
            .as_deref()
            .filter(|m| !m.is_empty())
            .or_else(|| Some(self.inner.config.default_field_manager.as_str()).filter(|m| !m.is_empty()))
            .map(str::to_string)
            .ok_or_else(|| ClientError::BadRequest("apply patches require a field manager".into()))
    }

    /// Namespace, generated name, admission and server-owned metadata for a
    /// new object.
    async fn prepare_create<T: Resource>(&self, ctx: &Context, target: &Target, obj: &mut T) -> ClientResult<()> {
        let namespace = self.namespace_for(target, &obj.meta().namespace);
        let meta = obj.meta_mut();
        meta.namespace = namespace;
        if meta.name.is_empty() && !meta.generate_name.is_empty() {
            meta.name = format!("{}{}", meta.generate_name, random_suffix());
        }
        self.inner.admission.apply_defaults(ctx, obj).await?;
        if obj.meta().name.is_empty() {
            return Err(target.missing_name());
        }
        self.inner.admission.validate(ctx, obj).await?;

        let meta = obj.meta_mut();
        meta.uid = Uuid::now_v7().to_string();
        meta.creation_timestamp = Some(Utc::now());
        meta.generation = 1;
        meta.resource_version.clear();
        Ok(())
    }

    /// The object an update of `current` to `obj` should store.
    async fn update_proposal<T: Resource>(
        &self,
        ctx: &Context,
        target: &Target,
        obj: &T,
        current: Value,
    ) -> ClientResult<Value> {
        let old: T = decode(current.clone())?;
        self.inner.admission.validate_update(ctx, obj, &old).await?;
        let mut next = encode(target, obj)?;
        carry_server_fields(&mut next, &current, target.descriptor.subresources.status);
        Ok(next)
    }

    async fn patch_proposal<T: Resource>(
        &self,
        ctx: &Context,
        target: &Target,
        key: &ObjectKey,
        patch: &Patch,
        current: Option<Value>,
    ) -> ClientResult<Value> {
        let current = match current {
            Some(current) => current,
            None => return self.apply_create::<T>(ctx, target, key, patch).await,
        };
        let patched = patch.apply_to(&current)?;
        check_patched_version(target, &key.name, &current, &patched)?;
        let mut obj: T = decode(patched)?;
        pin_identity(obj.meta_mut(), key)?;
        self.inner.admission.apply_defaults(ctx, &mut obj).await?;
        self.update_proposal(ctx, target, &obj, current).await
    }

    /// Apply against a missing object: patch the zero value, then create.
    async fn apply_create<T: Resource>(
        &self,
        ctx: &Context,
        target: &Target,
        key: &ObjectKey,
        patch: &Patch,
    ) -> ClientResult<Value> {
        let scheme = self.inner.registry.scheme();
        let mut base = if scheme.recognizes(&target.type_identity) {
            scheme.new_object(&target.type_identity)?
        } else {
            encode(target, &T::default())?
        };
        if let Some(meta) = metadata_mut(&mut base) {
            meta.insert("name".into(), Value::String(key.name.clone()));
            if !key.namespace.is_empty() {
                meta.insert("namespace".into(), Value::String(key.namespace.clone()));
            }
        }
        let patched = patch.apply_to(&base)?;
        if !resource_version(&patched).is_empty() {
            return Err(target.conflict(
                &key.name,
                "resourceVersion was set but the object does not exist",
            ));
        }
        let mut obj: T = decode(patched)?;
        pin_identity(obj.meta_mut(), key)?;
        self.prepare_create(ctx, target, &mut obj).await?;
        encode(target, &obj)
    }
}

// ---------------------------------------------------------------------------
// JSON helpers
// ---------------------------------------------------------------------------

pub(crate) fn encode<T: Resource>(target: &Target, obj: &T) -> ClientResult<Value> {
    let mut value = serde_json::to_value(obj)?;
    let map = value.as_object_mut().ok_or_else(|| {
        ClientError::BadRequest(format!(
            "{} must serialize to a JSON object",
            target.type_identity.kind
        ))
    })?;
    map.insert(
        "apiVersion".to_string(),
        Value::String(target.type_identity.api_version()),
    );
    map.insert(
        "kind".to_string(),
        Value::String(target.type_identity.kind.clone()),
    );
    Ok(value)
}

pub(crate) fn decode<T: Resource>(value: Value) -> ClientResult<T> {
    Ok(serde_json::from_value(value)?)
}

/// UID and resource version preconditions the caller's copy carries.
pub(crate) fn caller_preconditions(meta: &ObjectMeta) -> Option<Preconditions> {
    let uid = Some(meta.uid.clone()).filter(|s| !s.is_empty());
    let resource_version = Some(meta.resource_version.clone()).filter(|s| !s.is_empty());
    if uid.is_none() && resource_version.is_none() {
        return None;
    }
    Some(Preconditions {
        uid,
        resource_version,
    })
}

pub(crate) fn resource_version(obj: &Value) -> &str {
    obj.pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
        .unwrap_or("")
}

/// A patch may echo the current resource version but not name another.
pub(crate) fn check_patched_version(
    target: &Target,
    name: &str,
    current: &Value,
    patched: &Value,
) -> ClientResult<()> {
    let requested = resource_version(patched);
    let actual = resource_version(current);
    if !requested.is_empty() && requested != actual {
        return Err(target.conflict(
            name,
            format!("patch requires resourceVersion {requested}, found {actual}"),
        ));
    }
    Ok(())
}

pub(crate) fn same_ignoring_version(a: &Value, b: &Value) -> bool {
    let strip = |v: &Value| {
        let mut v = v.clone();
        if let Some(meta) = metadata_mut(&mut v) {
            meta.remove("resourceVersion");
        }
        v
    };
    strip(a) == strip(b)
}

fn metadata_mut(obj: &mut Value) -> Option<&mut Map<String, Value>> {
    obj.as_object_mut()?
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
}

fn is_kind(obj: &Value, api_version: &str, kind: &str) -> bool {
    obj.get("apiVersion").and_then(Value::as_str) == Some(api_version)
        && obj.get("kind").and_then(Value::as_str) == Some(kind)
}

/// Copy server-owned fields from `current` into `next` and bump
/// `generation` when anything outside metadata and status changed.
fn carry_server_fields(next: &mut Value, current: &Value, preserve_status: bool) {
    if preserve_status {
        let next_map = next.as_object_mut();
        if let Some(map) = next_map {
            match current.get("status") {
                Some(status) => {
                    map.insert("status".into(), status.clone());
                }
                None => {
                    map.remove("status");
                }
            }
        }
    }

    let generation = current
        .pointer("/metadata/generation")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let generation = if payload(next) != payload(current) {
        generation + 1
    } else {
        generation
    };

    if let Some(meta) = metadata_mut(next) {
        for field in ["uid", "creationTimestamp", "resourceVersion"] {
            match current.pointer(&format!("/metadata/{field}")) {
                Some(v) => {
                    meta.insert(field.into(), v.clone());
                }
                None => {
                    meta.remove(field);
                }
            }
        }
        if generation > 0 {
            meta.insert("generation".into(), Value::from(generation));
        } else {
            meta.remove("generation");
        }
    }
}

/// Everything except `metadata` and `status`.
fn payload(obj: &Value) -> Map<String, Value> {
    let mut map = obj.as_object().cloned().unwrap_or_default();
    map.remove("metadata");
    map.remove("status");
    map
}

/// Patches may not move an object to a different key.
fn pin_identity(meta: &mut ObjectMeta, key: &ObjectKey) -> ClientResult<()> {
    if meta.name.is_empty() {
        meta.name = key.name.clone();
    } else if meta.name != key.name {
        return Err(ClientError::BadRequest(format!(
            "patch may not change metadata.name from {:?} to {:?}",
            key.name, meta.name
        )));
    }
    if meta.namespace.is_empty() {
        meta.namespace = key.namespace.clone();
    } else if meta.namespace != key.namespace {
        return Err(ClientError::BadRequest(format!(
            "patch may not change metadata.namespace from {:?} to {:?}",
            key.namespace, meta.namespace
        )));
    }
    Ok(())
}

/// An apply body that names its type must name the target type.
fn check_apply_body(target: &Target, body: &Value) -> ClientResult<()> {
    if !body.is_object() {
        return Err(ClientError::BadRequest("apply patch must be a JSON object".into()));
    }
    let api_version = target.type_identity.api_version();
    if let Some(v) = body.get("apiVersion").and_then(Value::as_str) {
        if v != api_version {
            return Err(ClientError::BadRequest(format!(
                "apply patch apiVersion {v:?} does not match {api_version:?}"
            )));
        }
    }
    if let Some(k) = body.get("kind").and_then(Value::as_str) {
        if k != target.type_identity.kind {
            return Err(ClientError::BadRequest(format!(
                "apply patch kind {k:?} does not match {:?}",
                target.type_identity.kind
            )));
        }
    }
    Ok(())
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..NAME_SUFFIX_LEN)
        .map(|_| NAME_SUFFIX_ALPHABET[rng.gen_range(0..NAME_SUFFIX_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use kstore_registry::ResourceDescriptor;
    use kstore_storage::{InMemoryStorage, KeyConfig};
    use kstore_types::{FieldErrors, FieldSelector, LabelSelector, ListItems};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use crate::watch::Event;

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Widget {
        #[serde(default)]
        metadata: ObjectMeta,
        #[serde(default)]
        spec: WidgetSpec,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<WidgetStatus>,
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct WidgetSpec {
        #[serde(default)]
        count: i64,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        ports: Vec<Port>,
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Port {
        name: String,
        port: u16,
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct WidgetStatus {
        ready: bool,
    }

    impl Resource for Widget {
        fn type_identity() -> TypeIdentity {
            TypeIdentity::new("apps.example.io", "v1", "Widget")
        }
        fn meta(&self) -> &ObjectMeta {
            &self.metadata
        }
        fn meta_mut(&mut self) -> &mut ObjectMeta {
            &mut self.metadata
        }
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Zone {
        #[serde(default)]
        metadata: ObjectMeta,
        #[serde(default)]
        region: String,
    }

    impl Resource for Zone {
        fn type_identity() -> TypeIdentity {
            TypeIdentity::new("", "v1", "Zone")
        }
        fn meta(&self) -> &ObjectMeta {
            &self.metadata
        }
        fn meta_mut(&mut self) -> &mut ObjectMeta {
            &mut self.metadata
        }
    }

    fn client() -> Client {
        let registry = Arc::new(TypeRegistry::new());
        registry
            .register_type::<Widget>(
                CollectionIdentity::new("apps.example.io", "v1", "widgets"),
                ResourceDescriptor::new("widget", "widgets", "Widget")
                    .namespaced(true)
                    .short_names(["wd"])
                    .with_status_subresource(),
            )
            .unwrap();
        registry
            .register_type::<Zone>(
                CollectionIdentity::new("", "v1", "zones"),
                ResourceDescriptor::new("zone", "zones", "Zone"),
            )
            .unwrap();
        let keys = KeyScheme::new(KeyConfig::default()).unwrap();
        Client::new(Arc::new(InMemoryStorage::new()), registry, keys)
    }

    fn widget(ns: &str, name: &str, count: i64) -> Widget {
        Widget {
            metadata: ObjectMeta::named(ns, name),
            spec: WidgetSpec {
                count,
                ports: Vec::new(),
            },
            status: None,
        }
    }

    // ---- Test 1: create / get round trip ----

    #[tokio::test]
    async fn create_then_get() {
        let client = client();
        let ctx = Context::background();
        let created = client
            .create(&ctx, &widget("default", "a", 3), &CreateOptions::default())
            .await
            .unwrap();
        assert!(!created.metadata.resource_version.is_empty());
        assert!(!created.metadata.uid.is_empty());
        assert_eq!(created.metadata.generation, 1);
        assert!(created.metadata.creation_timestamp.is_some());

        let got: Widget = client
            .get(&ctx, &ObjectKey::new("default", "a"), &GetOptions::default())
            .await
            .unwrap();
        assert_eq!(got, created);
        assert_eq!(got.spec.count, 3);
    }

    #[tokio::test]
    async fn create_fills_default_namespace_and_generated_name() {
        let client = client();
        let ctx = Context::background();
        let mut w = widget("", "", 1);
        w.metadata.generate_name = "w-".into();
        let created = client.create(&ctx, &w, &CreateOptions::default()).await.unwrap();
        assert_eq!(created.metadata.namespace, "default");
        assert!(created.metadata.name.starts_with("w-"));
        assert_eq!(created.metadata.name.len(), 2 + NAME_SUFFIX_LEN);
    }

    #[tokio::test]
    async fn create_rejects_bad_requests() {
        let client = client();
        let ctx = Context::background();
        let err = client
            .create(&ctx, &widget("default", "", 1), &CreateOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_invalid());
        assert_eq!(err.field_messages(), vec!["metadata.name: Required value: name or generateName is required"]);

        let mut w = widget("default", "a", 1);
        w.metadata.resource_version = "7".into();
        let err = client.create(&ctx, &w, &CreateOptions::default()).await.unwrap_err();
        assert!(err.is_bad_request());

        let opts = CreateOptions::default();
        client.create(&ctx, &widget("default", "dup", 1), &opts).await.unwrap();
        let err = client.create(&ctx, &widget("default", "dup", 1), &opts).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn unregistered_type_is_bad_request() {
        #[derive(Clone, Debug, Default, Serialize, Deserialize)]
        struct Stray {
            metadata: ObjectMeta,
        }
        impl Resource for Stray {
            fn type_identity() -> TypeIdentity {
                TypeIdentity::new("", "v1", "Stray")
            }
            fn meta(&self) -> &ObjectMeta {
                &self.metadata
            }
            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        }
        let err = client()
            .get::<Stray>(&Context::background(), &ObjectKey::cluster("x"), &GetOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_bad_request());
    }

    // ---- Test 2: defaulting and validation ----

    #[tokio::test]
    async fn defaulter_runs_before_create() {
        let client = client();
        client
            .admission()
            .default_with(|w: &mut Widget| {
                if w.spec.count == 0 {
                    w.spec.count = 1;
                }
                Ok(())
            })
            .unwrap();
        let ctx = Context::background();
        client
            .create(&ctx, &widget("default", "a", 0), &CreateOptions::default())
            .await
            .unwrap();
        let got: Widget = client
            .get(&ctx, &ObjectKey::new("default", "a"), &GetOptions::default())
            .await
            .unwrap();
        assert_eq!(got.spec.count, 1);
    }

    #[tokio::test]
    async fn failed_validation_writes_nothing() {
        let client = client();
        client
            .admission()
            .validate_with(|w: &Widget| {
                if w.spec.count < 0 {
                    let mut errs = FieldErrors::new();
                    errs.push(FieldError::invalid("spec.count", "must be non-negative"));
                    return errs.into_result();
                }
                Ok(())
            })
            .unwrap();
        let ctx = Context::background();
        let err = client
            .create(&ctx, &widget("default", "a", -1), &CreateOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_invalid());
        let got: Option<Widget> = client.get_opt(&ctx, &ObjectKey::new("default", "a")).await.unwrap();
        assert!(got.is_none());
    }

    // ---- Test 3: get / delete of missing objects ----

    #[tokio::test]
    async fn missing_objects() {
        let client = client();
        let ctx = Context::background();
        let key = ObjectKey::new("default", "nope");
        let err = client
            .delete_by_key::<Widget>(&ctx, &key, &DeleteOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = client
            .get::<Widget>(&ctx, &key, &GetOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let zero: Widget = client
            .get(&ctx, &key, &GetOptions { ignore_not_found: true })
            .await
            .unwrap();
        assert_eq!(zero, Widget::default());
    }

    // ---- Test 4: update ----

    #[tokio::test]
    async fn update_bumps_version_and_generation() {
        let client = client();
        let ctx = Context::background();
        let created = client
            .create(&ctx, &widget("default", "a", 1), &CreateOptions::default())
            .await
            .unwrap();
        let mut next = created.clone();
        next.spec.count = 2;
        let updated = client.update(&ctx, &next, &UpdateOptions::default()).await.unwrap();
        assert_eq!(updated.spec.count, 2);
        assert_eq!(updated.metadata.generation, 2);
        assert_eq!(updated.metadata.uid, created.metadata.uid);
        assert_eq!(updated.metadata.creation_timestamp, created.metadata.creation_timestamp);
        let rv = |w: &Widget| w.metadata.resource_version.parse::<u64>().unwrap();
        assert!(rv(&updated) > rv(&created));

        // Label-only change: new version, same generation.
        let mut relabeled = updated.clone();
        relabeled.metadata.labels.insert("tier".into(), "web".into());
        let relabeled = client.update(&ctx, &relabeled, &UpdateOptions::default()).await.unwrap();
        assert_eq!(relabeled.metadata.generation, 2);
        assert!(rv(&relabeled) > rv(&updated));
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let client = client();
        let ctx = Context::background();
        let created = client
            .create(&ctx, &widget("default", "a", 1), &CreateOptions::default())
            .await
            .unwrap();
        let mut first = created.clone();
        first.spec.count = 2;
        client.update(&ctx, &first, &UpdateOptions::default()).await.unwrap();

        let mut stale = created.clone();
        stale.spec.count = 3;
        let err = client.update(&ctx, &stale, &UpdateOptions::default()).await.unwrap_err();
        assert!(err.is_conflict());

        // Without a resource version the update applies to whatever is current.
        stale.metadata.resource_version.clear();
        let out = client.update(&ctx, &stale, &UpdateOptions::default()).await.unwrap();
        assert_eq!(out.spec.count, 3);
    }

    #[tokio::test]
    async fn update_preserves_status_subresource() {
        let client = client();
        let ctx = Context::background();
        let created = client
            .create(&ctx, &widget("default", "a", 1), &CreateOptions::default())
            .await
            .unwrap();
        let mut with_status = created.clone();
        with_status.status = Some(WidgetStatus { ready: true });
        client
            .status()
            .update(&ctx, &with_status, &UpdateOptions::default())
            .await
            .unwrap();

        let mut main = created.clone();
        main.metadata.resource_version.clear();
        main.spec.count = 5;
        main.status = None;
        let out = client.update(&ctx, &main, &UpdateOptions::default()).await.unwrap();
        assert_eq!(out.status, Some(WidgetStatus { ready: true }));
        assert_eq!(out.spec.count, 5);
    }

    #[tokio::test]
    async fn status_patch_touches_only_status() {
        let client = client();
        let ctx = Context::background();
        let created = client
            .create(&ctx, &widget("default", "a", 1), &CreateOptions::default())
            .await
            .unwrap();
        let patch = Patch::Merge(json!({"spec": {"count": 99}, "status": {"ready": true}}));
        let out: Patched<Widget> = client
            .status()
            .patch(&ctx, &created.object_key(), &patch, &PatchOptions::default())
            .await
            .unwrap();
        assert_eq!(out.outcome, PatchOutcome::Patched);
        assert_eq!(out.object.status, Some(WidgetStatus { ready: true }));
        assert_eq!(out.object.spec.count, 1);
        assert_eq!(out.object.metadata.generation, 1);

        let again: Patched<Widget> = client
            .status()
            .patch(&ctx, &created.object_key(), &patch, &PatchOptions::default())
            .await
            .unwrap();
        assert_eq!(again.outcome, PatchOutcome::Unchanged);
    }

    #[tokio::test]
    async fn validate_update_sees_old_object() {
        let client = client();
        struct NoDecrease;
        #[async_trait::async_trait]
        impl crate::admission::Validator<Widget> for NoDecrease {
            async fn validate_update(&self, _ctx: &Context, obj: &Widget, old: &Widget) -> Result<(), FieldErrors> {
                if obj.spec.count < old.spec.count {
                    return Err(FieldError::forbidden("spec.count", "may not decrease").into());
                }
                Ok(())
            }
        }
        client.admission().register_validator(NoDecrease).unwrap();
        let ctx = Context::background();
        let created = client
            .create(&ctx, &widget("default", "a", 5), &CreateOptions::default())
            .await
            .unwrap();
        let mut lower = created.clone();
        lower.spec.count = 4;
        let err = client.update(&ctx, &lower, &UpdateOptions::default()).await.unwrap_err();
        assert!(err.is_invalid());
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let client = client();
        let err = client
            .update(&Context::background(), &widget("default", "ghost", 1), &UpdateOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    // ---- Test 5: delete ----

    #[tokio::test]
    async fn delete_with_hooks_and_preconditions() {
        let client = client();
        let vetoes = Arc::new(AtomicUsize::new(0));
        struct Protect(Arc<AtomicUsize>);
        #[async_trait::async_trait]
        impl crate::admission::Validator<Widget> for Protect {
            async fn validate_delete(&self, _ctx: &Context, obj: &Widget) -> Result<(), FieldErrors> {
                if obj.metadata.labels.contains_key("protected") {
                    self.0.fetch_add(1, Ordering::SeqCst);
                    return Err(FieldError::forbidden("metadata.labels", "object is protected").into());
                }
                Ok(())
            }
        }
        client.admission().register_validator(Protect(vetoes.clone())).unwrap();

        let ctx = Context::background();
        let mut w = widget("default", "a", 1);
        w.metadata.labels.insert("protected".into(), "yes".into());
        let created = client.create(&ctx, &w, &CreateOptions::default()).await.unwrap();
        let err = client.delete(&ctx, &created, &DeleteOptions::default()).await.unwrap_err();
        assert!(err.is_invalid());
        assert_eq!(vetoes.load(Ordering::SeqCst), 1);

        let plain = client
            .create(&ctx, &widget("default", "b", 1), &CreateOptions::default())
            .await
            .unwrap();
        let opts = DeleteOptions {
            preconditions: Some(Preconditions::uid("someone-else")),
            ..DeleteOptions::default()
        };
        assert!(client.delete(&ctx, &plain, &opts).await.unwrap_err().is_conflict());

        let dry = DeleteOptions {
            dry_run: true,
            ..DeleteOptions::default()
        };
        client.delete(&ctx, &plain, &dry).await.unwrap();
        assert!(client.get_opt::<Widget>(&ctx, &plain.object_key()).await.unwrap().is_some());

        let deleted = client.delete(&ctx, &plain, &DeleteOptions::default()).await.unwrap();
        assert_eq!(deleted.metadata.uid, plain.metadata.uid);
        assert!(client.get_opt::<Widget>(&ctx, &plain.object_key()).await.unwrap().is_none());
    }

    // ---- Test 6: list ----

    #[tokio::test]
    async fn list_scopes_and_selectors() {
        let client = client();
        let ctx = Context::background();
        let opts = CreateOptions::default();
        for (ns, name, tier) in [("a", "w1", "web"), ("a", "w2", "db"), ("b", "w3", "web")] {
            let mut w = widget(ns, name, 1);
            w.metadata.labels = BTreeMap::from([("tier".to_string(), tier.to_string())]);
            client.create(&ctx, &w, &opts).await.unwrap();
        }
        client
            .create(
                &ctx,
                &Zone {
                    metadata: ObjectMeta::named("", "eu"),
                    region: "eu-west".into(),
                },
                &opts,
            )
            .await
            .unwrap();

        let all: ResourceList<Widget> = client.list(&ctx, &ListOptions::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(!all.metadata.resource_version.is_empty());

        let in_a: ResourceList<Widget> = client.list(&ctx, &ListOptions::in_namespace("a")).await.unwrap();
        assert_eq!(in_a.len(), 2);

        let web = ListOptions::default().labels(LabelSelector::parse("tier=web").unwrap());
        let web: ResourceList<Widget> = client.list(&ctx, &web).await.unwrap();
        let names: Vec<_> = web.items().iter().map(|w| w.metadata.name.as_str()).collect();
        assert_eq!(names, vec!["w1", "w3"]);

        let pinned = ListOptions::default().fields(FieldSelector::parse("metadata.namespace=b").unwrap());
        let pinned: ResourceList<Widget> = client.list(&ctx, &pinned).await.unwrap();
        assert_eq!(pinned.into_items().len(), 1);

        let by_name = ListOptions::default().fields(FieldSelector::parse("metadata.name!=w1").unwrap());
        assert_eq!(client.list::<Widget>(&ctx, &by_name).await.unwrap().len(), 2);

        let zones: ResourceList<Zone> = client.list(&ctx, &ListOptions::in_namespace("a")).await.unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones.items[0].metadata.namespace, "");
    }

    // ---- Test 7: patch ----

    #[tokio::test]
    async fn merge_and_json_patches() {
        let client = client();
        let ctx = Context::background();
        client
            .create(&ctx, &widget("default", "a", 1), &CreateOptions::default())
            .await
            .unwrap();
        let key = ObjectKey::new("default", "a");

        let out: Patched<Widget> = client
            .patch(&ctx, &key, &Patch::Merge(json!({"spec": {"count": 4}})), &PatchOptions::default())
            .await
            .unwrap();
        assert_eq!(out.outcome, PatchOutcome::Patched);
        assert_eq!(out.object.spec.count, 4);
        assert_eq!(out.object.metadata.generation, 2);

        let ops = json!([{"op": "replace", "path": "/spec/count", "value": 9}]);
        let out: Patched<Widget> = client
            .patch(&ctx, &key, &Patch::Json(ops), &PatchOptions::default())
            .await
            .unwrap();
        assert_eq!(out.object.spec.count, 9);

        let stale = json!({"metadata": {"resourceVersion": "1"}, "spec": {"count": 0}});
        let err = client
            .patch::<Widget>(&ctx, &key, &Patch::Merge(stale), &PatchOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let rename = json!({"metadata": {"name": "b"}});
        let err = client
            .patch::<Widget>(&ctx, &key, &Patch::Merge(rename), &PatchOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_bad_request());

        let err = client
            .patch::<Widget>(&ctx, &ObjectKey::new("default", "zzz"), &Patch::Merge(json!({})), &PatchOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn strategic_patch_merges_keyed_lists() {
        let client = client();
        let ctx = Context::background();
        let mut w = widget("default", "a", 1);
        w.spec.ports = vec![
            Port { name: "http".into(), port: 80 },
            Port { name: "admin".into(), port: 9000 },
        ];
        client.create(&ctx, &w, &CreateOptions::default()).await.unwrap();
        let patch = Patch::Strategic(json!({"spec": {"ports": [{"name": "http", "port": 8080}]}}));
        let out: Patched<Widget> = client
            .patch(&ctx, &ObjectKey::new("default", "a"), &patch, &PatchOptions::default())
            .await
            .unwrap();
        assert_eq!(
            out.object.spec.ports,
            vec![
                Port { name: "http".into(), port: 8080 },
                Port { name: "admin".into(), port: 9000 },
            ]
        );
    }

    #[tokio::test]
    async fn apply_creates_then_is_idempotent() {
        let client = client();
        let ctx = Context::background();
        let key = ObjectKey::new("default", "applied");
        let desired = widget("default", "applied", 7);
        let patch = Patch::apply(&desired).unwrap();
        let opts = PatchOptions::apply("tests");

        let first: Patched<Widget> = client.patch(&ctx, &key, &patch, &opts).await.unwrap();
        assert_eq!(first.outcome, PatchOutcome::Created);
        assert_eq!(first.object.spec.count, 7);
        assert!(!first.object.metadata.uid.is_empty());

        let second: Patched<Widget> = client.patch(&ctx, &key, &patch, &opts).await.unwrap();
        assert_eq!(second.outcome, PatchOutcome::Unchanged);
        assert_eq!(second.object.metadata.resource_version, first.object.metadata.resource_version);

        let changed = Patch::apply(&widget("default", "applied", 8)).unwrap();
        let third: Patched<Widget> = client.patch(&ctx, &key, &changed, &opts).await.unwrap();
        assert_eq!(third.outcome, PatchOutcome::Patched);
        assert_eq!(third.object.metadata.generation, 2);
    }

    #[tokio::test]
    async fn apply_requires_field_manager_and_matching_kind() {
        let registry = client().registry().clone();
        let keys = KeyScheme::new(KeyConfig::default()).unwrap();
        let config = ClientConfig {
            default_field_manager: String::new(),
            default_namespace: None,
        };
        let client = Client::with_config(Arc::new(InMemoryStorage::new()), registry, keys, config);
        let ctx = Context::background();
        let key = ObjectKey::new("default", "a");
        let patch = Patch::apply(&widget("default", "a", 1)).unwrap();
        let err = client
            .patch::<Widget>(&ctx, &key, &patch, &PatchOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_bad_request());

        let wrong = Patch::Apply(json!({"apiVersion": "v1", "kind": "Zone"}));
        let err = client
            .patch::<Widget>(&ctx, &key, &wrong, &PatchOptions::apply("tests"))
            .await
            .unwrap_err();
        assert!(err.is_bad_request());
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let client = client();
        let ctx = Context::background();
        let key = ObjectKey::new("default", "a");
        let dry = CreateOptions {
            dry_run: true,
            ..CreateOptions::default()
        };
        let out = client.create(&ctx, &widget("default", "a", 1), &dry).await.unwrap();
        assert!(!out.metadata.uid.is_empty());
        assert!(client.get_opt::<Widget>(&ctx, &key).await.unwrap().is_none());

        let created = client
            .create(&ctx, &widget("default", "a", 1), &CreateOptions::default())
            .await
            .unwrap();
        let opts = PatchOptions {
            dry_run: true,
            ..PatchOptions::default()
        };
        let out: Patched<Widget> = client
            .patch(&ctx, &key, &Patch::Merge(json!({"spec": {"count": 5}})), &opts)
            .await
            .unwrap();
        assert_eq!(out.outcome, PatchOutcome::Patched);
        assert_eq!(out.object.spec.count, 5);

        let mut next = created.clone();
        next.spec.count = 6;
        let upd = UpdateOptions {
            dry_run: true,
            ..UpdateOptions::default()
        };
        assert_eq!(client.update(&ctx, &next, &upd).await.unwrap().spec.count, 6);

        let stored: Widget = client.get(&ctx, &key, &GetOptions::default()).await.unwrap();
        assert_eq!(stored, created);
    }

    // ---- Test 8: concurrency and cancellation ----

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_patches_lose_nothing() {
        let client = client();
        let ctx = Context::background();
        client
            .create(&ctx, &widget("default", "counter", 0), &CreateOptions::default())
            .await
            .unwrap();
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                let ctx = Context::background();
                let key = ObjectKey::new("default", "counter");
                for _ in 0..10 {
                    let current: Widget = client.get(&ctx, &key, &GetOptions::default()).await.unwrap();
                    let mut next = current.clone();
                    next.spec.count += 1;
                    // Retry on conflict, exactly like a careful caller would.
                    loop {
                        match client.update(&ctx, &next, &UpdateOptions::default()).await {
                            Ok(_) => break,
                            Err(e) if e.is_conflict() => {
                                let fresh: Widget =
                                    client.get(&ctx, &key, &GetOptions::default()).await.unwrap();
                                next = fresh.clone();
                                next.spec.count += 1;
                            }
                            Err(e) => panic!("unexpected error: {e}"),
                        }
                    }
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        let done: Widget = client
            .get(&ctx, &ObjectKey::new("default", "counter"), &GetOptions::default())
            .await
            .unwrap();
        assert_eq!(done.spec.count, 80);
    }

    #[tokio::test]
    async fn cancelled_context_fails_fast() {
        let client = client();
        let ctx = Context::background();
        ctx.cancel();
        let err = client
            .create(&ctx, &widget("default", "a", 1), &CreateOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    // ---- Test 9: watch ----

    #[tokio::test]
    async fn typed_watch_filters_by_kind_and_label() {
        let client = client();
        let ctx = Context::background();
        let opts = WatchOptions {
            label_selector: LabelSelector::parse("tier=web").unwrap(),
            ..WatchOptions::default()
        };
        let mut watch = client.watch::<Widget>(&ctx, &opts).await.unwrap();

        client
            .create(&ctx, &Zone { metadata: ObjectMeta::named("", "eu"), region: "eu".into() }, &CreateOptions::default())
            .await
            .unwrap();
        client
            .create(&ctx, &widget("default", "quiet", 1), &CreateOptions::default())
            .await
            .unwrap();
        let mut w = widget("default", "loud", 2);
        w.metadata.labels.insert("tier".into(), "web".into());
        client.create(&ctx, &w, &CreateOptions::default()).await.unwrap();

        match watch.next().await {
            Some(Event::Added(got)) => assert_eq!(got.metadata.name, "loud"),
            other => panic!("unexpected event {other:?}"),
        }
        watch.stop();
        assert!(watch.next().await.is_none());
    }

    #[tokio::test]
    async fn object_leaving_selector_is_reported_as_deleted() {
        let client = client();
        let ctx = Context::background();
        let opts = WatchOptions {
            label_selector: LabelSelector::parse("tier=web").unwrap(),
            ..WatchOptions::default()
        };
        let mut watch = client.watch::<Widget>(&ctx, &opts).await.unwrap();

        let mut w = widget("default", "edge", 1);
        w.metadata.labels.insert("tier".into(), "web".into());
        let mut stored = client.create(&ctx, &w, &CreateOptions::default()).await.unwrap();
        assert!(matches!(watch.next().await, Some(Event::Added(_))));

        stored.metadata.labels.insert("tier".into(), "batch".into());
        let stored = client.update(&ctx, &stored, &UpdateOptions::default()).await.unwrap();
        match watch.next().await {
            Some(Event::Deleted(got)) => {
                assert_eq!(got.metadata.name, "edge");
                assert_eq!(got.metadata.labels["tier"], "batch");
            }
            other => panic!("unexpected event {other:?}"),
        }

        // Further changes outside the view stay silent until it matches again.
        let mut quiet = stored.clone();
        quiet.spec.count = 2;
        let mut quiet = client.update(&ctx, &quiet, &UpdateOptions::default()).await.unwrap();
        quiet.metadata.labels.insert("tier".into(), "web".into());
        client.update(&ctx, &quiet, &UpdateOptions::default()).await.unwrap();
        match watch.next().await {
            Some(Event::Modified(got)) => assert_eq!(got.spec.count, 2),
            other => panic!("unexpected event {other:?}"),
        }
        watch.stop();
    }
}
