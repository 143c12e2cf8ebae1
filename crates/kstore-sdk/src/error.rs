use std::path::PathBuf;

use kstore_types::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    /// A config file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config text is not valid TOML for [`StoreConfig`](crate::StoreConfig).
    #[error("invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("storage error: {0}")]
    Storage(#[from] kstore_storage::StorageError),

    #[error("registry error: {0}")]
    Registry(#[from] kstore_registry::RegistryError),

    #[error("client error: {0}")]
    Client(#[from] kstore_client::ClientError),

    #[error("event error: {0}")]
    Event(#[from] kstore_events::EventError),
}

impl SdkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigRead { .. } | Self::ConfigParse(_) => ErrorKind::BadRequest,
            Self::Storage(e) => e.kind(),
            Self::Registry(e) => e.kind(),
            Self::Client(e) => e.kind(),
            Self::Event(e) => e.kind(),
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

pub type SdkResult<T> = Result<T, SdkError>;
