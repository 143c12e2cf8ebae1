//! Pluggable defaulting and validation hooks.
//!
//! The client runs, per Rust type:
//!
//! - create: every [`Defaulter`], then [`Validator::validate`]
//! - update: every [`Defaulter`], then [`Validator::validate_update`]
//! - delete: [`Validator::validate_delete`]
//!
//! A type without hooks passes straight through. Hook failures surface as
//! [`ClientError::Invalid`] carrying the hook's field errors unchanged.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use kstore_storage::Context;
use kstore_types::{FieldErrors, Resource};

use crate::error::{ClientError, ClientResult};

/// Fills in unset fields before validation.
#[async_trait]
pub trait Defaulter<T: Resource>: Send + Sync {
    async fn default(&self, ctx: &Context, obj: &mut T) -> Result<(), FieldErrors>;
}

/// Checks an object before it is written or removed.
#[async_trait]
pub trait Validator<T: Resource>: Send + Sync {
    async fn validate(&self, _ctx: &Context, _obj: &T) -> Result<(), FieldErrors> {
        Ok(())
    }

    async fn validate_update(&self, _ctx: &Context, _obj: &T, _old: &T) -> Result<(), FieldErrors> {
        Ok(())
    }

    async fn validate_delete(&self, _ctx: &Context, _obj: &T) -> Result<(), FieldErrors> {
        Ok(())
    }
}

/// [`Defaulter`] backed by a closure.
pub struct FnDefaulter<T, F> {
    f: F,
    _marker: PhantomData<fn(&mut T)>,
}

impl<T, F> FnDefaulter<T, F>
where
    T: Resource,
    F: Fn(&mut T) -> Result<(), FieldErrors> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F> Defaulter<T> for FnDefaulter<T, F>
where
    T: Resource,
    F: Fn(&mut T) -> Result<(), FieldErrors> + Send + Sync,
{
    async fn default(&self, _ctx: &Context, obj: &mut T) -> Result<(), FieldErrors> {
        (self.f)(obj)
    }
}

/// [`Validator`] backed by a closure, applied on create and on update.
pub struct FnValidator<T, F> {
    f: F,
    _marker: PhantomData<fn(&T)>,
}

impl<T, F> FnValidator<T, F>
where
    T: Resource,
    F: Fn(&T) -> Result<(), FieldErrors> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F> Validator<T> for FnValidator<T, F>
where
    T: Resource,
    F: Fn(&T) -> Result<(), FieldErrors> + Send + Sync,
{
    async fn validate(&self, _ctx: &Context, obj: &T) -> Result<(), FieldErrors> {
        (self.f)(obj)
    }

    async fn validate_update(&self, _ctx: &Context, obj: &T, _old: &T) -> Result<(), FieldErrors> {
        (self.f)(obj)
    }
}

type Hooks = RwLock<HashMap<TypeId, Vec<Arc<dyn Any + Send + Sync>>>>;

/// Hook table keyed by Rust type.
#[derive(Default)]
pub struct Admission {
    defaulters: Hooks,
    validators: Hooks,
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = |hooks: &Hooks| hooks.read().map(|h| h.values().map(Vec::len).sum()).unwrap_or(0);
        f.debug_struct("Admission")
            .field("defaulters", &count(&self.defaulters))
            .field("validators", &count(&self.validators))
            .finish()
    }
}

impl Admission {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a defaulter for `T`. Defaulters run in registration order.
    pub fn register_defaulter<T: Resource>(&self, defaulter: impl Defaulter<T> + 'static) -> ClientResult<()> {
        let hook: Arc<dyn Defaulter<T>> = Arc::new(defaulter);
        insert::<T>(&self.defaulters, Arc::new(hook))
    }

    pub fn register_validator<T: Resource>(&self, validator: impl Validator<T> + 'static) -> ClientResult<()> {
        let hook: Arc<dyn Validator<T>> = Arc::new(validator);
        insert::<T>(&self.validators, Arc::new(hook))
    }

    /// Shorthand for registering a [`FnDefaulter`].
    pub fn default_with<T, F>(&self, f: F) -> ClientResult<()>
    where
        T: Resource,
        F: Fn(&mut T) -> Result<(), FieldErrors> + Send + Sync + 'static,
    {
        self.register_defaulter(FnDefaulter::new(f))
    }

    /// Shorthand for registering a [`FnValidator`].
    pub fn validate_with<T, F>(&self, f: F) -> ClientResult<()>
    where
        T: Resource,
        F: Fn(&T) -> Result<(), FieldErrors> + Send + Sync + 'static,
    {
        self.register_validator(FnValidator::new(f))
    }

    pub(crate) async fn apply_defaults<T: Resource>(&self, ctx: &Context, obj: &mut T) -> ClientResult<()> {
        for hook in lookup::<T, dyn Defaulter<T>>(&self.defaulters)? {
            hook.default(ctx, obj).await.map_err(|e| invalid(obj, e))?;
        }
        Ok(())
    }

    pub(crate) async fn validate<T: Resource>(&self, ctx: &Context, obj: &T) -> ClientResult<()> {
        for hook in lookup::<T, dyn Validator<T>>(&self.validators)? {
            hook.validate(ctx, obj).await.map_err(|e| invalid(obj, e))?;
        }
        Ok(())
    }

    pub(crate) async fn validate_update<T: Resource>(
        &self,
        ctx: &Context,
        obj: &T,
        old: &T,
    ) -> ClientResult<()> {
        for hook in lookup::<T, dyn Validator<T>>(&self.validators)? {
            hook.validate_update(ctx, obj, old)
                .await
                .map_err(|e| invalid(obj, e))?;
        }
        Ok(())
    }

    pub(crate) async fn validate_delete<T: Resource>(&self, ctx: &Context, obj: &T) -> ClientResult<()> {
        for hook in lookup::<T, dyn Validator<T>>(&self.validators)? {
            hook.validate_delete(ctx, obj).await.map_err(|e| invalid(obj, e))?;
        }
        Ok(())
    }
}

fn insert<T: Resource>(hooks: &Hooks, hook: Arc<dyn Any + Send + Sync>) -> ClientResult<()> {
    hooks
        .write()
        .map_err(|e| ClientError::Internal(format!("admission table poisoned: {e}")))?
        .entry(TypeId::of::<T>())
        .or_default()
        .push(hook);
    Ok(())
}

/// Snapshot the hooks for `T` so no lock is held while they run.
fn lookup<T: Resource, H: ?Sized + 'static>(hooks: &Hooks) -> ClientResult<Vec<Arc<H>>> {
    let hooks = hooks
        .read()
        .map_err(|e| ClientError::Internal(format!("admission table poisoned: {e}")))?;
    Ok(hooks
        .get(&TypeId::of::<T>())
        .map(|list| {
            list.iter()
                .filter_map(|h| h.downcast_ref::<Arc<H>>().cloned())
                .collect()
        })
        .unwrap_or_default())
}

fn invalid<T: Resource>(obj: &T, errors: FieldErrors) -> ClientError {
    let meta = obj.meta();
    let name = if meta.name.is_empty() {
        meta.generate_name.clone()
    } else {
        meta.name.clone()
    };
    ClientError::Invalid {
        kind: T::type_identity().kind,
        name,
        errors,
    }
}
