//! Error types for keyward-core

use crate::backend::{status, StorageStatus};
use thiserror::Error;

/// Errors returned by the secret store primitives and the scoped service.
///
/// The taxonomy is closed and every variant is recoverable: callers may retry,
/// fall back to re-authentication, or treat the failure as an absent value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretError {
    /// A record with the same service, account and item class already exists
    #[error("secret already exists")]
    Duplicate,

    /// No record matches the service, account and item class
    #[error("secret not found")]
    NotFound,

    /// The storage backend returned a payload of an unexpected shape
    #[error("storage returned data in an unexpected format")]
    InvalidFormat,

    /// Any other non-success status reported by the storage backend
    #[error("storage failure (status {code}): {}", .message.as_deref().unwrap_or("no message"))]
    StorageFailure {
        /// Raw backend status code
        code: i32,
        /// Backend-provided diagnostic message, if any
        message: Option<String>,
    },
}

impl SecretError {
    /// Classify a non-success status as a generic storage failure.
    ///
    /// Used wherever the primitive does not give `Duplicate` or `NotFound`
    /// a meaning of their own; the raw status is preserved either way.
    pub(crate) fn failure(status: StorageStatus) -> Self {
        Self::StorageFailure {
            code: status.code(),
            message: status.into_message(),
        }
    }

    /// Failure of the blocking task that hosted a storage call
    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::StorageFailure {
            code: status::INTERNAL_COMPONENT,
            message: Some(message.into()),
        }
    }

    /// Raw status code for `StorageFailure`, `None` for the other kinds
    #[must_use]
    pub fn status_code(&self) -> Option<i32> {
        match self {
            Self::StorageFailure { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result type for secret store operations
pub type Result<T> = std::result::Result<T, SecretError>;

/// Errors raised while selecting and opening a storage backend
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The requested backend is not compiled into this build
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    /// A configuration value could not be used
    #[error("invalid storage configuration: {0}")]
    Invalid(String),
}
