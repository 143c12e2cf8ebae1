//! High-level entry point for kstore.
//!
//! [`Store`] wires a storage backend, a type registry, the generic client and
//! the event pipeline together from one [`StoreConfig`]. This is the main
//! entry point for applications embedding kstore.
//!
//! ```no_run
//! # async fn run() -> kstore_sdk::SdkResult<()> {
//! let mut config = kstore_sdk::StoreConfig::default();
//! config.apply_env();
//! kstore_sdk::init_logging(&config.log);
//! let store = kstore_sdk::Store::open(config)?;
//! // store.register::<MyType>(...)?; store.client().create(...)
//! store.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod store;

pub use config::{EventsConfig, LogConfig, StoreConfig};
pub use error::{SdkError, SdkResult};
pub use logging::init_logging;
pub use store::{default_registry, Store};

// Re-export key types
pub use kstore_client::{Client, ClientError, Patch, PatchOutcome};
pub use kstore_events::{Event, EventRecorder, EventType};
pub use kstore_registry::{ResourceDescriptor, TypeRegistry};
pub use kstore_storage::{Context, Storage};
pub use kstore_types::{CollectionIdentity, ObjectKey, ObjectMeta, Resource, TypeIdentity};
