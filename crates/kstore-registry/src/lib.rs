//! Type registry for kstore.
//!
//! Maps each resource kind to the collection it is stored and queried under,
//! and keeps per-collection metadata (names, short names, categories, print
//! columns) for command-line style lookups. The registry is an explicit
//! dependency: construct one, register resources, and hand it to the client.
//!
//! # Key Types
//!
//! - [`TypeRegistry`]: the registry itself, safe for concurrent use
//! - [`ResourceDescriptor`]: per-collection metadata
//! - [`Scheme`]: Rust type table producing zero values by type identity

pub mod descriptor;
pub mod error;
pub mod registry;
pub mod scheme;

pub use descriptor::{PrintColumn, ResourceDescriptor, Subresources};
pub use error::{RegistryError, RegistryResult};
pub use registry::{RegistryConfig, TypeRegistry};
pub use scheme::{Scheme, TypeInfo};
