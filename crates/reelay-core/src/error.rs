//! Error types module
//!
//! All fallible operations in the orchestrator surface an `AppError`. Each variant
//! self-describes how it should be rendered over HTTP and logged through the
//! `ErrorMetadata` trait, so callers never have to special-case presentation.

use sqlx::Error as SqlxError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues
    Warn,
    /// Error level - for unexpected failures and tripped circuit breakers
    Error,
}

/// Metadata for error responses - defines how an error should be presented
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "DATABASE_ERROR")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the client
    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden in production
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    /// A concurrent writer already owns this external asset id.
    #[error("Duplicate external asset: {0}")]
    DuplicateExternalAsset(String),

    /// Circuit breaker for the find-or-create loop.
    #[error("Too many find-or-create attempts for external asset {external_asset_id} ({attempts} attempts)")]
    TooManyAttempts {
        external_asset_id: String,
        attempts: u32,
    },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

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

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::InvalidInput(format!("Validation error: {}", err))
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, suggested_action, sensitive, log_level).
fn app_error_static_metadata(
    err: &AppError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        AppError::Database(_) => (
            500,
            "DATABASE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::DuplicateExternalAsset(_) => (
            409,
            "DUPLICATE_EXTERNAL_ASSET",
            true,
            Some("Fetch the existing record for this asset"),
            false,
            LogLevel::Debug,
        ),
        AppError::TooManyAttempts { .. } => (
            409,
            "FIND_OR_CREATE_EXHAUSTED",
            true,
            Some("Retry the upload after a short delay"),
            false,
            LogLevel::Error,
        ),
        AppError::InvalidStateTransition { .. } => (
            409,
            "INVALID_STATE_TRANSITION",
            false,
            Some("Reload the record and check its current status"),
            false,
            LogLevel::Warn,
        ),
        AppError::Provider(_) => (
            502,
            "PROVIDER_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Warn,
        ),
        AppError::InvalidInput(_) => (
            400,
            "INVALID_INPUT",
            false,
            Some("Check request parameters and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::NotFound(_) => (
            404,
            "NOT_FOUND",
            false,
            Some("Verify the resource ID exists"),
            false,
            LogLevel::Debug,
        ),
        AppError::Unauthorized(_) => (
            401,
            "UNAUTHORIZED",
            false,
            Some("Check the signature or operator key"),
            false,
            LogLevel::Debug,
        ),
        AppError::Internal(_) | AppError::InternalWithSource { .. } => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
    }
}

impl AppError {
    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            AppError::Database(_) => "Database",
            AppError::DuplicateExternalAsset(_) => "DuplicateExternalAsset",
            AppError::TooManyAttempts { .. } => "TooManyAttempts",
            AppError::InvalidStateTransition { .. } => "InvalidStateTransition",
            AppError::Provider(_) => "Provider",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::NotFound(_) => "NotFound",
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::Internal(_) => "Internal",
            AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Database(_) => "Failed to access database".to_string(),
            AppError::DuplicateExternalAsset(ref id) => {
                format!("A record already exists for external asset {}", id)
            }
            AppError::TooManyAttempts {
                external_asset_id,
                attempts,
            } => format!(
                "Could not resolve a record for external asset {} after {} attempts",
                external_asset_id, attempts
            ),
            AppError::InvalidStateTransition { from, to } => {
                format!("Cannot move a video from {} to {}", from, to)
            }
            AppError::Provider(_) => "Processing provider unavailable".to_string(),
            AppError::InvalidInput(ref msg) => msg.clone(),
            AppError::NotFound(ref msg) => msg.clone(),
            AppError::Unauthorized(ref msg) => msg.clone(),
            AppError::Internal(_) => "Internal server error".to_string(),
            AppError::InternalWithSource { .. } => "Internal server error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_database() {
        let err = AppError::from(sqlx::Error::PoolClosed);
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "DATABASE_ERROR");
        assert!(err.is_recoverable());
        assert_eq!(err.client_message(), "Failed to access database");
        assert!(err.is_sensitive());
        assert_eq!(err.log_level(), LogLevel::Error);
    }

    #[test]
    fn test_too_many_attempts_is_loud_and_distinct_from_not_found() {
        let err = AppError::TooManyAttempts {
            external_asset_id: "asset-1".to_string(),
            attempts: 2,
        };
        assert_eq!(err.http_status_code(), 409);
        assert_eq!(err.error_code(), "FIND_OR_CREATE_EXHAUSTED");
        assert!(err.is_recoverable());
        assert_eq!(err.log_level(), LogLevel::Error);
        assert!(err.client_message().contains("asset-1"));
        assert!(err.client_message().contains('2'));

        let not_found = AppError::NotFound("asset-1".to_string());
        assert_ne!(err.error_code(), not_found.error_code());
    }

    #[test]
    fn test_provider_errors_hide_details() {
        let err = AppError::Provider("502 from upstream: secret body".to_string());
        assert_eq!(err.http_status_code(), 502);
        assert!(err.is_sensitive());
        assert!(!err.client_message().contains("secret"));
    }

    #[test]
    fn test_detailed_message_includes_source_chain() {
        let err = AppError::from(anyhow::anyhow!("root cause").context("outer"));
        let details = err.detailed_message();
        assert!(details.starts_with("Internal error with source"));
        assert!(details.contains("outer"));
    }
}
