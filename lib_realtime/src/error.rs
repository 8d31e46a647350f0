//! # Error Types
//!
//! A single error enum for the whole library. Transport failures are handled
//! inside the connection task and are never returned to callers; the variants
//! below surface configuration problems, persistence failures and calls made
//! on a manager that has already shut down.

use thiserror::Error;

/// Errors produced by `lib_realtime`.
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error occurred: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error occurred: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The server rejected the credential (HTTP 401/403 or an auth close frame).
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Credential refresh failed: {0}")]
    Refresh(String),

    #[error("Logger setup failed: {0}")]
    Logger(String),

    /// The manager was destroyed, or terminated after a ban.
    #[error("Connection manager is closed")]
    Closed,
}

impl RealtimeError {
    /// Returns true when the failure should trigger a credential refresh.
    pub fn is_auth(&self) -> bool {
        matches!(self, RealtimeError::Auth(_))
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, RealtimeError>;
