//! Generic typed client for kstore.
//!
//! Composes a [`TypeRegistry`](kstore_registry::TypeRegistry), a
//! [`Storage`](kstore_storage::Storage) backend and pluggable admission hooks
//! into one typed API over every registered resource.
//!
//! # Architecture
//!
//! - **Create** runs defaulting, then validation, then a storage create.
//!   Nothing is written unless every stage passes.
//! - **Update** and **Patch** are read-modify-write cycles on top of
//!   `guaranteed_update`, so concurrent writers never lose each other's
//!   changes. A caller-supplied resource version turns into a precondition.
//! - **Apply** patches are idempotent: re-applying an unchanged
//!   configuration reports [`PatchOutcome::Unchanged`] and writes nothing.
//! - **Status** writes go through [`StatusClient`] and touch only `status`.
//!
//! # Modules
//!
//! - [`client`]: [`Client`] and patch results
//! - [`admission`]: [`Defaulter`] / [`Validator`] hooks
//! - [`patch`]: JSON, merge, strategic merge and apply patch engines
//! - [`options`]: per-call options and [`ClientConfig`]
//! - [`status`]: the status sub-client
//! - [`watch`]: typed change feeds
//! - [`error`]: [`ClientError`] and helpers for CLI-style callers

pub mod admission;
pub mod client;
pub mod error;
pub mod options;
pub mod patch;
pub mod status;
pub mod watch;

pub use admission::{Admission, Defaulter, FnDefaulter, FnValidator, Validator};
pub use client::{Client, PatchOutcome, Patched};
pub use error::{ignore_not_found, ClientError, ClientResult};
pub use options::{
    ClientConfig, CreateOptions, DeleteOptions, GetOptions, ListOptions, PatchOptions,
    UpdateOptions, WatchOptions,
};
pub use patch::{Patch, PatchError};
pub use status::StatusClient;
pub use watch::{Event, TypedWatch};
