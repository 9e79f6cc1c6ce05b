//! Error taxonomy for the SISTER client
//!
//! Caller misuse (`InvalidRequest`, `Configuration`) surfaces immediately.
//! Storage corruption never appears here: it is logged and repaired where it
//! is found.

use thiserror::Error;

use crate::cache::CacheError;

/// Errors returned by fetches and cache administration
#[derive(Debug, Error)]
pub enum Error {
    /// The logical path or its parameters are malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Required connection settings are missing or invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A credential could not be obtained, or was rejected twice
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        message: String,
        detail: Option<String>,
    },

    /// The remote side answered with a non-success, non-auth status
    #[error("Remote error: {message}")]
    Remote {
        message: String,
        detail: Option<String>,
    },

    /// A value could not be written to the local store
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Local cache storage failed
    #[error(transparent)]
    Cache(CacheError),
}

impl From<CacheError> for Error {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Serialization(msg) => Error::Serialization(msg),
            other => Error::Cache(other),
        }
    }
}

impl Error {
    /// Human-readable message, without the variant prefix
    pub fn message(&self) -> String {
        match self {
            Error::InvalidRequest(msg) | Error::Configuration(msg) | Error::Serialization(msg) => {
                msg.clone()
            }
            Error::AuthenticationFailed { message, .. } | Error::Remote { message, .. } => {
                message.clone()
            }
            Error::Cache(err) => err.to_string(),
        }
    }

    /// Optional detail string carried by remote and auth failures
    pub fn detail(&self) -> Option<&str> {
        match self {
            Error::AuthenticationFailed { detail, .. } | Error::Remote { detail, .. } => {
                detail.as_deref()
            }
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
