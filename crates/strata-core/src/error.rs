//! Error types module
//!
//! All orchestration errors are unified under [`AppError`]. The variants follow the
//! transfer error taxonomy: validation failures are surfaced synchronously to the caller,
//! backend failures reported through callbacks are turned into persisted task results and
//! never re-raised.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx` feature.

use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues like a saturated backend
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Self-description of an error: how it is classified, logged and retried.
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "SOURCE_NOT_FOUND")
    fn error_code(&self) -> &'static str;

    /// Whether the operation may succeed if retried later
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the caller
    fn suggested_action(&self) -> Option<&'static str>;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Source not accessible: {0}")]
    SourceNotAccessible(String),

    #[error("Source is a directory: {0}")]
    SourceIsDirectory(String),

    #[error("Destination not accessible: {0}")]
    DestinationNotAccessible(String),

    #[error("Destination conflict: {0}")]
    DestinationConflict(String),

    #[error("Backend authentication failed: {0}")]
    BackendAuthenticationFailed(String),

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Migration post-processing failed: {0}")]
    MigrationPostProcessingFailed(String),

    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidRequest(format!("UUID parsing error: {}", err))
    }
}

/// Static metadata for each variant: (error_code, recoverable, suggested_action, log_level).
fn app_error_static_metadata(
    err: &AppError,
) -> (&'static str, bool, Option<&'static str>, LogLevel) {
    match err {
        AppError::Database(_) => (
            "DATABASE_ERROR",
            true,
            Some("Retry after a short delay"),
            LogLevel::Error,
        ),
        AppError::InvalidRequest(_) => (
            "INVALID_REQUEST",
            false,
            Some("Check request parameters and try again"),
            LogLevel::Debug,
        ),
        AppError::SourceNotFound(_) => (
            "SOURCE_NOT_FOUND",
            false,
            Some("Verify the source location exists"),
            LogLevel::Debug,
        ),
        AppError::SourceNotAccessible(_) => (
            "SOURCE_NOT_ACCESSIBLE",
            false,
            Some("Grant the system account access to the source location"),
            LogLevel::Debug,
        ),
        AppError::SourceIsDirectory(_) => (
            "SOURCE_IS_DIRECTORY",
            false,
            Some("Provide a file, not a directory, as the source"),
            LogLevel::Debug,
        ),
        AppError::DestinationNotAccessible(_) => (
            "DESTINATION_NOT_ACCESSIBLE",
            false,
            Some("Grant the system account access to the destination location"),
            LogLevel::Debug,
        ),
        AppError::DestinationConflict(_) => (
            "DESTINATION_CONFLICT",
            false,
            Some("Choose a destination that does not already exist"),
            LogLevel::Debug,
        ),
        AppError::BackendAuthenticationFailed(_) => (
            "BACKEND_AUTHENTICATION_FAILED",
            false,
            Some("Verify the archive credentials"),
            LogLevel::Error,
        ),
        AppError::TransferFailed(_) => (
            "TRANSFER_FAILED",
            true,
            Some("Resubmit the request"),
            LogLevel::Error,
        ),
        AppError::MigrationPostProcessingFailed(_) => (
            "MIGRATION_POST_PROCESSING_FAILED",
            false,
            Some("Reconcile the object's archive copies manually"),
            LogLevel::Error,
        ),
        AppError::UnsupportedBackend(_) => (
            "UNSUPPORTED_BACKEND",
            false,
            Some("Use a destination type supported by this deployment"),
            LogLevel::Warn,
        ),
        AppError::Backend(_) => (
            "BACKEND_ERROR",
            true,
            Some("Retry after a short delay"),
            LogLevel::Error,
        ),
        AppError::NotFound(_) => (
            "NOT_FOUND",
            false,
            Some("Verify the resource ID exists"),
            LogLevel::Debug,
        ),
        AppError::Configuration(_) => (
            "CONFIGURATION_ERROR",
            false,
            Some("Check the archive configuration"),
            LogLevel::Error,
        ),
        AppError::Internal(_) | AppError::InternalWithSource { .. } => (
            "INTERNAL_ERROR",
            false,
            Some("Contact support if this error persists"),
            LogLevel::Error,
        ),
    }
}

impl ErrorMetadata for AppError {
    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).0
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).1
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).2
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_database() {
        #[cfg(feature = "sqlx")]
        let err = AppError::from(sqlx::Error::PoolClosed);
        #[cfg(not(feature = "sqlx"))]
        let err = AppError::Database("pool closed".to_string());
        assert_eq!(err.error_code(), "DATABASE_ERROR");
        assert!(err.is_recoverable());
        assert_eq!(err.log_level(), LogLevel::Error);
    }

    #[test]
    fn test_validation_errors_are_not_recoverable() {
        let errors = [
            AppError::InvalidRequest("both sources set".to_string()),
            AppError::SourceNotFound("/a".to_string()),
            AppError::SourceNotAccessible("/a".to_string()),
            AppError::SourceIsDirectory("/a".to_string()),
            AppError::DestinationConflict("/b".to_string()),
        ];
        for err in errors {
            assert!(!err.is_recoverable(), "{} should not be recoverable", err);
            assert_eq!(err.log_level(), LogLevel::Debug);
        }
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::SourceIsDirectory("x".to_string()).error_code(),
            "SOURCE_IS_DIRECTORY"
        );
        assert_eq!(
            AppError::BackendAuthenticationFailed("x".to_string()).error_code(),
            "BACKEND_AUTHENTICATION_FAILED"
        );
        assert_eq!(
            AppError::MigrationPostProcessingFailed("x".to_string()).error_code(),
            "MIGRATION_POST_PROCESSING_FAILED"
        );
    }

    #[test]
    fn test_error_metadata_suggested_actions() {
        let err = AppError::NotFound("task".to_string());
        assert_eq!(err.suggested_action(), Some("Verify the resource ID exists"));

        let err = AppError::InvalidRequest("test".to_string());
        assert_eq!(
            err.suggested_action(),
            Some("Check request parameters and try again")
        );
    }
}
