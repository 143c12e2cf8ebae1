//! Status sub-client: writes that touch only an object's `status`.
//!
//! The stored object is taken as the base and only its `status` is
//! replaced, so spec changes carried by the caller's copy are ignored and
//! `generation` never moves.

use futures::FutureExt;
use serde_json::Value;
use tracing::debug;

use kstore_storage::{Context, Proposal};
use kstore_types::{ObjectKey, Resource};

use crate::client::{
    caller_preconditions, check_patched_version, decode, encode, same_ignoring_version, Client,
    PatchOutcome, Patched, Target,
};
use crate::error::{ClientError, ClientResult};
use crate::options::{PatchOptions, UpdateOptions};
use crate::patch::Patch;

/// Returned by [`Client::status`].
#[derive(Clone, Copy, Debug)]
pub struct StatusClient<'a> {
    client: &'a Client,
}

impl<'a> StatusClient<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self { client }
    }

    /// Replace the stored object's status with the status of `obj`.
    pub async fn update<T: Resource>(&self, ctx: &Context, obj: &T, opts: &UpdateOptions) -> ClientResult<T> {
        ctx.check()?;
        let client = self.client;
        let target = client.target::<T>()?;
        let namespace = client.namespace_for(&target, &obj.meta().namespace);
        let name = obj.meta().name.clone();
        let key = client.storage_key(&target, &namespace, &name)?;
        let status = encode(&target, obj)?.get("status").cloned();
        let preconditions = caller_preconditions(obj.meta());

        if opts.dry_run {
            let current = client.load(ctx, &target, &key, &name).await?;
            if let Some(p) = &preconditions {
                p.check(&key, &current).map_err(|e| target.wrap(e, &name))?;
            }
            let next = self.proposal::<T>(ctx, current, status).await?;
            return decode(next);
        }

        let (this, target_ref, name_ref, status_ref) = (self, &target, name.as_str(), &status);
        let try_update = move |current: Option<Value>| {
            async move {
                let current = current
                    .ok_or_else(|| target_ref.not_found(name_ref))
                    .map_err(ClientError::into_storage)?;
                this.proposal::<T>(ctx, current, status_ref.clone())
                    .await
                    .map(Proposal::new)
                    .map_err(ClientError::into_storage)
            }
            .boxed()
        };
        let outcome = client
            .storage()
            .guaranteed_update(ctx, &key, false, preconditions.as_ref(), &try_update)
            .await
            .map_err(|e| target.wrap(e, &name))?;
        debug!(key = %key, changed = outcome.changed, "status updated");
        decode(outcome.object)
    }

    /// Patch the object, keeping only the resulting status.
    pub async fn patch<T: Resource>(
        &self,
        ctx: &Context,
        key: &ObjectKey,
        patch: &Patch,
        opts: &PatchOptions,
    ) -> ClientResult<Patched<T>> {
        ctx.check()?;
        let client = self.client;
        let target = client.target::<T>()?;
        let namespace = client.namespace_for(&target, &key.namespace);
        let skey = client.storage_key(&target, &namespace, &key.name)?;

        if opts.dry_run {
            let current = client.load(ctx, &target, &skey, &key.name).await?;
            let next = self.patched_proposal::<T>(ctx, &target, &key.name, patch, current.clone()).await?;
            let outcome = if same_ignoring_version(&current, &next) {
                PatchOutcome::Unchanged
            } else {
                PatchOutcome::Patched
            };
            return Ok(Patched {
                object: decode(next)?,
                outcome,
            });
        }

        let (this, target_ref, name) = (self, &target, key.name.as_str());
        let try_update = move |current: Option<Value>| {
            async move {
                let current = current
                    .ok_or_else(|| target_ref.not_found(name))
                    .map_err(ClientError::into_storage)?;
                this.patched_proposal::<T>(ctx, target_ref, name, patch, current)
                    .await
                    .map(Proposal::new)
                    .map_err(ClientError::into_storage)
            }
            .boxed()
        };
        let outcome = client
            .storage()
            .guaranteed_update(ctx, &skey, false, None, &try_update)
            .await
            .map_err(|e| target.wrap(e, &key.name))?;
        let result = if outcome.changed {
            PatchOutcome::Patched
        } else {
            PatchOutcome::Unchanged
        };
        debug!(key = %skey, outcome = ?result, "status patched");
        Ok(Patched {
            object: decode(outcome.object)?,
            outcome: result,
        })
    }

    async fn patched_proposal<T: Resource>(
        &self,
        ctx: &Context,
        target: &Target,
        name: &str,
        patch: &Patch,
        current: Value,
    ) -> ClientResult<Value> {
        let patched = patch.apply_to(&current)?;
        check_patched_version(target, name, &current, &patched)?;
        let status = patched.get("status").cloned();
        self.proposal::<T>(ctx, current, status).await
    }

    /// `current` with its status swapped for `status`, validated as an
    /// update.
    async fn proposal<T: Resource>(
        &self,
        ctx: &Context,
        current: Value,
        status: Option<Value>,
    ) -> ClientResult<Value> {
        let mut next = current.clone();
        if let Some(map) = next.as_object_mut() {
            match status {
                Some(status) => {
                    map.insert("status".into(), status);
                }
                None => {
                    map.remove("status");
                }
            }
        }
        let old: T = decode(current)?;
        let obj: T = decode(next.clone())?;
        self.client.admission().validate_update(ctx, &obj, &old).await?;
        Ok(next)
    }
}
