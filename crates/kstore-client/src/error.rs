//! Error types for client operations.

use kstore_registry::RegistryError;
use kstore_storage::StorageError;
use kstore_types::{ErrorKind, FieldErrors, TypeError};
use thiserror::Error;

use crate::patch::PatchError;

/// Errors returned by [`Client`](crate::Client) operations.
///
/// Every variant maps onto an [`ErrorKind`]; callers branch on
/// [`ClientError::kind`] or the `is_*` predicates, never on the message.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The object does not exist.
    #[error("{collection} {name:?} not found")]
    NotFound { collection: String, name: String },

    /// An object with the same name already exists.
    #[error("{collection} {name:?} already exists")]
    AlreadyExists { collection: String, name: String },

    /// A caller-supplied precondition (UID or resource version) did not hold.
    #[error("operation on {collection} {name:?} conflicted: {reason}")]
    Conflict {
        collection: String,
        name: String,
        reason: String,
    },

    /// Defaulting or validation rejected the object.
    #[error("{kind} {name:?} is invalid: {errors}")]
    Invalid {
        kind: String,
        name: String,
        errors: FieldErrors,
    },

    /// The request was malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A watch asked for a resource version that is no longer retained.
    #[error("expired: {0}")]
    Expired(String),

    /// The call context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The call context's deadline elapsed.
    #[error("operation timed out")]
    Timeout,

    /// A storage failure, with the collection and name it happened on.
    #[error("storage error on {collection} {name:?}: {source}")]
    Storage {
        collection: String,
        name: String,
        #[source]
        source: StorageError,
    },

    /// The type is not registered, or registry state is inconsistent.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Encoding or decoding a typed object failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Client state is unusable, e.g. a poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Invalid { .. } => ErrorKind::Invalid,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::Expired(_) => ErrorKind::Expired,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Timeout => ErrorKind::Timeout,
            Self::Storage { source, .. } => source.kind(),
            Self::Registry(e) => match e {
                RegistryError::KindNotFound(_) | RegistryError::TypeNotFound(_) => {
                    ErrorKind::BadRequest
                }
                other => other.kind(),
            },
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

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind(), ErrorKind::Cancelled | ErrorKind::Timeout)
    }

    /// One `field: message` line per field error; empty for other kinds.
    pub fn field_messages(&self) -> Vec<String> {
        match self {
            Self::Invalid { errors, .. } => errors.iter().map(ToString::to_string).collect(),
            _ => Vec::new(),
        }
    }

    /// Re-surface a storage error with the collection and object name it
    /// concerns. Errors raised by client callbacks inside the storage call
    /// come back out unchanged.
    pub fn from_storage(err: StorageError, collection: &str, name: &str) -> Self {
        let collection = collection.to_string();
        let name = name.to_string();
        match err {
            StorageError::NotFound { .. } => Self::NotFound { collection, name },
            StorageError::AlreadyExists { .. } => Self::AlreadyExists { collection, name },
            StorageError::Conflict { reason, .. } => Self::Conflict {
                collection,
                name,
                reason,
            },
            StorageError::BadRequest(msg) => Self::BadRequest(msg),
            StorageError::Expired { .. } => Self::Expired(err.to_string()),
            StorageError::Cancelled => Self::Cancelled,
            StorageError::Timeout => Self::Timeout,
            StorageError::Aborted { kind, source } => match source.downcast::<ClientError>() {
                Ok(client_err) => *client_err,
                Err(source) => Self::Storage {
                    collection,
                    name,
                    source: StorageError::Aborted { kind, source },
                },
            },
            other => Self::Storage {
                collection,
                name,
                source: other,
            },
        }
    }

    /// Wrap this error so it can travel through a storage callback.
    pub(crate) fn into_storage(self) -> StorageError {
        let kind = self.kind();
        StorageError::aborted(kind, self)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<TypeError> for ClientError {
    fn from(e: TypeError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<PatchError> for ClientError {
    fn from(e: PatchError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<StorageError> for ClientError {
    fn from(e: StorageError) -> Self {
        Self::from_storage(e, "", "")
    }
}

/// Convenience type alias for client operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Turn `NotFound` into `Ok(None)`, for callers where absence is fine.
pub fn ignore_not_found<T>(result: ClientResult<T>) -> ClientResult<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kstore_types::FieldError;

    #[test]
    fn storage_errors_keep_their_kind() {
        let err = ClientError::from_storage(
            StorageError::NotFound { key: "/k".into() },
            "widgets",
            "a",
        );
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "widgets \"a\" not found");

        let err = ClientError::from_storage(StorageError::Internal("disk".into()), "widgets", "a");
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn callback_errors_roundtrip_through_storage() {
        let original = ClientError::Invalid {
            kind: "Widget".into(),
            name: "a".into(),
            errors: FieldError::required("spec.count", "").into(),
        };
        let back = ClientError::from_storage(original.into_storage(), "widgets", "a");
        assert!(back.is_invalid());
        assert_eq!(back.field_messages(), vec!["spec.count: Required value"]);
    }

    #[test]
    fn ignore_not_found_helper() {
        let missing: ClientResult<u8> = Err(ClientError::NotFound {
            collection: "w".into(),
            name: "a".into(),
        });
        assert_eq!(ignore_not_found(missing).unwrap(), None);
        assert_eq!(ignore_not_found(Ok(3u8)).unwrap(), Some(3));
        let other: ClientResult<u8> = Err(ClientError::BadRequest("x".into()));
        assert!(ignore_not_found(other).is_err());
    }
}
