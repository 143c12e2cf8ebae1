//! Storage engine contract for kstore.
//!
//! This crate defines the versioned CRUD + watch abstraction every backend
//! implements, together with the pure key layout that maps
//! `(tenant, namespace, collection, name)` onto storage keys.
//!
//! # Key Types
//!
//! - [`Storage`]: the backend trait (create, get, list, delete, guaranteed update, watch)
//! - [`InMemoryStorage`]: in-memory backend with TTLs and watch history
//! - [`KeyScheme`]: key derivation for one (possibly tenant-scoped) key space
//! - [`Versioner`]: resource version encoding
//! - [`Context`]: cancellation and deadline carried by every call
//! - [`WatchStream`]: single-consumer change feed handle

pub mod context;
pub mod error;
pub mod keys;
pub mod memory;
pub mod traits;
pub mod types;
pub mod version;
pub mod watch;

pub use context::Context;
pub use error::{StorageError, StorageResult};
pub use keys::{validate_name, KeyConfig, KeyParts, KeyScheme, CLUSTER_SEGMENT};
pub use memory::{InMemoryStorage, MemoryStorageConfig};
pub use traits::{Storage, UpdateFn, ValidateDeleteFn};
pub use types::{
    GetOptions, ListOptions, ListResult, Preconditions, Proposal, UpdateOutcome, WatchEvent,
    WatchOptions,
};
pub use version::{DecimalVersioner, Versioner};
pub use watch::{watch_channel, WatchSender, WatchStream};
