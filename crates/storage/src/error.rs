//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload not found: {0}")]
    NotFound(String),

    #[error("upload already exists: {0}")]
    AlreadyExists(String),

    #[error("upload is locked: {0}")]
    Locked(String),

    #[error("offset mismatch: expected {expected}, got {actual}")]
    OffsetMismatch { expected: u64, actual: u64 },

    #[error("store size exceeded: {0}")]
    QuotaExceeded(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt upload record: {0}")]
    Corrupt(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Map an I/O error on `what`, translating `NotFound` into the typed variant.
    pub(crate) fn from_io(what: impl std::fmt::Display, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(what.to_string())
        } else {
            Self::Io(err)
        }
    }
}

impl From<hopper_core::Error> for StorageError {
    fn from(err: hopper_core::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
