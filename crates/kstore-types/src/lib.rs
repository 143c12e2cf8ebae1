//! Foundation types for kstore.
//!
//! This crate provides the identity, metadata, and query types shared by every
//! other kstore crate. It has no knowledge of storage or transport.
//!
//! # Key Types
//!
//! - [`TypeIdentity`]: Group/Version/Kind identifying a resource's schema
//! - [`CollectionIdentity`]: Group/Version/Collection identifying a queryable collection
//! - [`ObjectKey`]: namespace + name of a single object
//! - [`ObjectMeta`]: standard object metadata (resource version, labels, ...)
//! - [`Resource`]: trait every typed record implements
//! - [`ResourceList`]: typed list container with the [`ListItems`] accessor
//! - [`LabelSelector`] / [`FieldSelector`]: list query predicates
//! - [`FieldErrors`]: field-level validation failures
//! - [`ErrorKind`]: the error taxonomy every crate classifies into

pub mod error;
pub mod field;
pub mod identity;
pub mod meta;
pub mod resource;
pub mod selector;

pub use error::{ErrorKind, TypeError};
pub use field::{FieldError, FieldErrorKind, FieldErrors};
pub use identity::{CollectionIdentity, ObjectKey, TypeIdentity};
pub use meta::{ListMeta, ObjectMeta, ObjectReference};
pub use resource::{ListItems, Referent, Resource, ResourceList};
pub use selector::{FieldRequirement, FieldSelector, LabelSelector, Operator, Requirement};
