//! Error types for the Stratum protocol client.

use thiserror::Error;

/// Stratum protocol errors.
///
/// [`Fatal`](StratumError::Fatal) aborts the reconnect loop and takes the
/// process down; everything else either drops a single message or tears
/// down the current connection and re-enters the reconnect loop.
#[derive(Error, Debug)]
pub enum StratumError {
    /// Network I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error on the write path
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed message from the pool; drop it, connection stays up
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// TCP connect failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Pool refused our credentials
    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),

    /// Connection lost
    #[error("Connection lost")]
    Disconnected,

    /// Unrecoverable condition; the process must exit
    #[error("Fatal: {0}")]
    Fatal(String),
}

/// Convenient Result type for Stratum operations.
pub type StratumResult<T> = Result<T, StratumError>;
