//! Engine error types.

use hopper_storage::StorageError;
use thiserror::Error;

/// Errors returned by upload engine operations.
///
/// Every variant except `Config` is a per-request error: the engine stays
/// usable and durable state stays consistent.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("upload not found: {0}")]
    NotFound(String),

    #[error("offset mismatch: upload is at {expected}, request sent {actual}")]
    OffsetMismatch { expected: u64, actual: u64 },

    #[error("upload size exceeded: {attempted} bytes would exceed the declared size of {size}")]
    SizeExceeded { size: u64, attempted: u64 },

    #[error("maximum upload size exceeded: {size} bytes (max: {max})")]
    MaxSizeExceeded { size: u64, max: u64 },

    #[error("upload is locked: {0}")]
    LockConflict(String),

    #[error("extension not supported: {0}")]
    ExtensionUnsupported(&'static str),

    #[error("partial upload not complete: {0}")]
    PartialNotReady(String),

    #[error("invalid concatenation: {0}")]
    InvalidConcat(String),

    #[error("final upload cannot be modified: {0}")]
    ModifyFinal(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("store is full: {0}")]
    StoreFull(String),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => Self::NotFound(id),
            StorageError::Locked(id) => Self::LockConflict(id),
            StorageError::OffsetMismatch { expected, actual } => {
                Self::OffsetMismatch { expected, actual }
            }
            StorageError::QuotaExceeded(msg) => Self::StoreFull(msg),
            StorageError::Config(msg) => Self::Config(msg),
            other => Self::Storage(other),
        }
    }
}

impl From<hopper_core::Error> for EngineError {
    fn from(err: hopper_core::Error) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
