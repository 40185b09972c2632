//! Common error types for ChartScribe

use thiserror::Error;

/// Common result type for ChartScribe operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the ChartScribe crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Vision provider call failure, with the diagnostic fields the
    /// provider reported (HTTP status and machine-readable code when known)
    #[error("Provider error: {message}")]
    Provider {
        message: String,
        status: Option<u16>,
        code: Option<String>,
    },

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
