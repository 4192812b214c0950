//! Error types for the notifications domain.

use thiserror::Error;
use uuid::Uuid;

/// Result type for notification operations.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// Errors that can occur in the notifications domain.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Store read/write failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Delivery backend error.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Delivery call exceeded the configured timeout.
    #[error("Delivery timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Notification record not found.
    #[error("Notification not found: {0}")]
    NotFound(Uuid),

    /// Recipient could not be resolved.
    #[error("User not found: {0}")]
    UserNotFound(Uuid),

    /// Operation requested on a record in the wrong state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for NotificationError {
    fn from(err: sea_orm::DbErr) -> Self {
        NotificationError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for NotificationError {
    fn from(err: serde_json::Error) -> Self {
        NotificationError::Internal(format!("JSON serialization error: {}", err))
    }
}

impl From<reqwest::Error> for NotificationError {
    fn from(err: reqwest::Error) -> Self {
        NotificationError::Provider(err.to_string())
    }
}

impl From<std::io::Error> for NotificationError {
    fn from(err: std::io::Error) -> Self {
        NotificationError::Provider(format!("IO error: {}", err))
    }
}
