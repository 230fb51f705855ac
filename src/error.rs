//! Error types for the Turnstile service.

use thiserror::Error;

/// Main error type for Turnstile startup and configuration.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors raised while reading configuration sources
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of a networked counter backend.
///
/// These never leave a store implementation: they are logged and turned into
/// an `Unavailable` outcome so the limiter fails open.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection refused, reset, or timed out
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Malformed or unexpected reply
    #[error("Backend protocol error: {0}")]
    BackendProtocolError(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        let unreachable = e.is_io_error()
            || e.is_timeout()
            || e.is_connection_refusal()
            || e.is_connection_dropped()
            || e.kind() == redis::ErrorKind::BusyLoadingError;
        if unreachable {
            StoreError::BackendUnavailable(e.to_string())
        } else {
            // Parse, type and server-side reply errors
            StoreError::BackendProtocolError(e.to_string())
        }
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
