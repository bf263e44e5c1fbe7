//! Crate-level error type.
//!
//! Stratum protocol failures carry their own enum inside the stratum
//! module; what remains here are the startup-time failures (bad
//! configuration, solver binary trouble) plus plain I/O, unified so they
//! propagate with `?` up to main.

use thiserror::Error;

/// Errors outside the Stratum protocol path.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from tokio or std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (bad URL, bad --use list, missing pool)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Solver subprocess errors
    #[error("Solver error: {0}")]
    Solver(String),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
