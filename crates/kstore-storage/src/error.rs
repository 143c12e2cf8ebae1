//! Error types for storage operations.

use kstore_types::ErrorKind;
use thiserror::Error;

/// Errors returned by [`Storage`](crate::Storage) backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No live object exists at the key.
    #[error("key not found: {key}")]
    NotFound { key: String },

    /// A live object already occupies the key.
    #[error("key already exists: {key}")]
    AlreadyExists { key: String },

    /// A caller-supplied precondition did not hold.
    #[error("precondition failed for {key}: {reason}")]
    Conflict { key: String, reason: String },

    /// The request itself was malformed (bad key, bad version string, ...).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The requested resource version has been compacted out of history.
    #[error("resource version {requested} is too old (oldest retained: {oldest})")]
    Expired { requested: u64, oldest: u64 },

    /// The call context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The call context's deadline elapsed.
    #[error("operation timed out")]
    Timeout,

    /// A caller callback (`try_update` or a delete validator) rejected the
    /// operation. The original error is kept so callers can recover it.
    #[error("{source}")]
    Aborted {
        kind: ErrorKind,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Object encoding failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend failure not otherwise classified.
    #[error("internal storage error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Wrap a callback error, classifying it as `kind`.
    pub fn aborted(kind: ErrorKind, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Aborted {
            kind,
            source: Box::new(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::Expired { .. } => ErrorKind::Expired,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Timeout => ErrorKind::Timeout,
            Self::Aborted { kind, .. } => *kind,
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

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Convenience type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
