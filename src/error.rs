//! Error types for Hearth.

use thiserror::Error;

/// Common error type for Hearth.
#[derive(Error, Debug)]
pub enum HearthError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Moderation state could not be written to disk.
    ///
    /// Non-fatal: the in-memory state remains authoritative until restart.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// External service (AI completion endpoint) failure.
    #[error("external service error: {0}")]
    ExternalService(String),
}

/// Result type alias for Hearth operations.
pub type Result<T> = std::result::Result<T, HearthError>;
