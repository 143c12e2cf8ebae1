//! Error types for registry operations.

use kstore_types::{CollectionIdentity, ErrorKind, TypeIdentity};
use thiserror::Error;

/// Errors that can occur while registering or resolving resources.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A required descriptor field is empty.
    #[error("resource descriptor for {collection} is missing required field `{field}`")]
    MissingField {
        collection: CollectionIdentity,
        field: &'static str,
    },

    /// The collection is already registered.
    #[error("collection already registered: {0}")]
    AlreadyRegistered(CollectionIdentity),

    /// The kind is already mapped to another collection.
    #[error("{type_identity} is already mapped to collection {existing}")]
    KindAlreadyMapped {
        type_identity: TypeIdentity,
        existing: CollectionIdentity,
    },

    /// A short name is already bound to a different collection.
    #[error("short name {short_name:?} is already used by {existing}")]
    ShortNameConflict {
        short_name: String,
        existing: CollectionIdentity,
    },

    /// A different Rust type is already registered for this type identity.
    #[error("{type_identity} is already registered as {existing}")]
    TypeConflict {
        type_identity: TypeIdentity,
        existing: &'static str,
    },

    /// The type identity does not match the collection it is registered under.
    #[error("{type_identity} does not belong to collection {collection}")]
    TypeMismatch {
        type_identity: TypeIdentity,
        collection: CollectionIdentity,
    },

    /// The collection is not registered.
    #[error("collection not registered: {0}")]
    CollectionNotFound(CollectionIdentity),

    /// No collection is mapped for the type identity.
    #[error("no collection registered for {0}")]
    KindNotFound(TypeIdentity),

    /// No scheme entry exists for the type identity.
    #[error("no type registered for {0}")]
    TypeNotFound(TypeIdentity),

    /// No collection answers to the given short name, plural, singular or kind.
    #[error("unknown resource name {0:?}")]
    NameNotFound(String),

    /// Zero-value construction failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal failure (lock poisoning).
    #[error("internal registry error: {0}")]
    Internal(String),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingField { .. } | Self::TypeMismatch { .. } => ErrorKind::Invalid,
            Self::AlreadyRegistered(_) => ErrorKind::AlreadyExists,
            Self::KindAlreadyMapped { .. }
            | Self::ShortNameConflict { .. }
            | Self::TypeConflict { .. } => ErrorKind::Conflict,
            Self::CollectionNotFound(_)
            | Self::KindNotFound(_)
            | Self::TypeNotFound(_)
            | Self::NameNotFound(_) => ErrorKind::NotFound,
            Self::Serialization(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    pub fn is_invalid(&self) -> bool {
        self.kind() == ErrorKind::Invalid
    }

    pub fn is_bad_request(&self) -> bool {
        self.kind() == ErrorKind::BadRequest
    }
}

/// Convenience type alias for registry operations.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
