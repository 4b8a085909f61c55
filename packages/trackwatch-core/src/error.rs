//! Centralized error types for the trackwatch core library.
//!
//! Defines structured error types using `thiserror` with stable,
//! machine-readable error codes for logging and diagnostics.

use thiserror::Error;

/// Trait for error types that provide a stable, machine-readable error code.
pub trait ErrorCode {
    /// Returns a machine-readable error code for logs and diagnostics.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for trackwatch.
#[derive(Debug, Error)]
pub enum TrackwatchError {
    /// Configuration failed validation or a required value was missing.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The RTSP decoder subprocess could not be started or exited unexpectedly.
    #[error("audio source error for stream {stream}: {message}")]
    AudioSource { stream: String, message: String },

    /// The embedded store encountered an error it could not recover from.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Requested stream name does not exist in the current configuration.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// Internal invariant violation; should not occur in normal operation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorCode for TrackwatchError {
    fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::AudioSource { .. } => "audio_source_error",
            Self::Store(_) => "store_error",
            Self::StreamNotFound(_) => "stream_not_found",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// Errors raised by a [`crate::recognizer::Recognizer`] implementation.
#[derive(Debug, Error)]
pub enum RecognizerError {
    /// The HTTP request to the provider failed outright.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider returned a non-success status code.
    #[error("provider returned status {0}")]
    HttpStatus(u16),

    /// The provider's response body could not be parsed.
    #[error("failed to parse provider response: {0}")]
    Parse(String),

    /// The call exceeded the configured recognize timeout.
    #[error("recognize call timed out")]
    Timeout,
}

impl ErrorCode for RecognizerError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "recognizer_http_failed",
            Self::HttpStatus(_) => "recognizer_http_status",
            Self::Parse(_) => "recognizer_parse_error",
            Self::Timeout => "recognizer_timeout",
        }
    }
}

/// Errors raised by the embedded store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying sqlx/database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration failed; schema version does not match what the binary expects.
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl ErrorCode for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "store_database_error",
            Self::Migration(_) => "store_migration_failed",
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type TrackwatchResult<T> = Result<T, TrackwatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_returns_correct_code() {
        let err = TrackwatchError::Configuration("missing STREAM_1_URL".into());
        assert_eq!(err.code(), "configuration_error");
    }

    #[test]
    fn store_not_found_returns_correct_code() {
        let err = TrackwatchError::StreamNotFound("kitchen".into());
        assert_eq!(err.code(), "stream_not_found");
    }
}
