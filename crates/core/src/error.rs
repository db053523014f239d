//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid upload ID: {0}")]
    InvalidUploadId(String),

    #[error("invalid upload record: {0}")]
    InvalidUpload(String),

    #[error("unknown hook event: {0}")]
    UnknownHookEvent(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
