use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification shared by every kstore error type.
///
/// Callers branch on the kind returned by `kind()` on any crate's error enum,
/// never on the rendered message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The addressed object or mapping does not exist.
    NotFound,
    /// An object already occupies the key.
    AlreadyExists,
    /// A caller-supplied precondition (UID or resource version) did not hold.
    Conflict,
    /// Validation rejected the object.
    Invalid,
    /// The call itself was malformed.
    BadRequest,
    /// The requested resource version is no longer retained.
    Expired,
    /// The call context was cancelled.
    Cancelled,
    /// The call context's deadline elapsed.
    Timeout,
    /// Any backend failure not otherwise classified.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "NotFound",
            Self::AlreadyExists => "AlreadyExists",
            Self::Conflict => "Conflict",
            Self::Invalid => "Invalid",
            Self::BadRequest => "BadRequest",
            Self::Expired => "Expired",
            Self::Cancelled => "Cancelled",
            Self::Timeout => "Timeout",
            Self::Internal => "Internal",
        };
        write!(f, "{s}")
    }
}

/// Errors produced while parsing or building foundation types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid label selector {selector:?}: {reason}")]
    InvalidLabelSelector { selector: String, reason: String },

    #[error("invalid field selector {selector:?}: {reason}")]
    InvalidFieldSelector { selector: String, reason: String },

    #[error("invalid apiVersion {0:?}")]
    InvalidApiVersion(String),
}

impl TypeError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::BadRequest
    }
}
