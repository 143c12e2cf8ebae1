use kstore_client::ClientError;
use kstore_types::ErrorKind;
use thiserror::Error;

/// Errors from event sinks and broadcaster lifecycle calls.
///
/// Recording an event never returns an error: a full queue or a shut-down
/// broadcaster only bumps the drop counter.
#[derive(Debug, Error)]
pub enum EventError {
    /// The broadcaster has been shut down and accepts no new destinations.
    #[error("event broadcaster is shut down")]
    ShutDown,

    /// An event with this name is already stored in the sink.
    #[error("event {0:?} already exists")]
    AlreadyExists(String),

    /// No event with this name is stored in the sink.
    #[error("event {0:?} not found")]
    NotFound(String),

    /// A client-backed sink failed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Broadcaster state is unusable, or no async runtime is available.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EventError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ShutDown => ErrorKind::BadRequest,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Client(e) => e.kind(),
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
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

    /// Whether a sink write failing with this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::Invalid | ErrorKind::BadRequest | ErrorKind::Cancelled
        )
    }
}

/// Convenience type alias for event operations.
pub type EventResult<T> = std::result::Result<T, EventError>;
