//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hopper_engine::EngineError;
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::PreconditionFailed(_) => "unsupported_version",
            Self::UnsupportedMediaType(_) => "unsupported_media_type",
            Self::Internal(_) => "internal_error",
            Self::Engine(e) => match e {
                EngineError::Config(_) => "config_error",
                EngineError::NotFound(_) => "not_found",
                EngineError::OffsetMismatch { .. } => "offset_mismatch",
                EngineError::SizeExceeded { .. } => "size_exceeded",
                EngineError::MaxSizeExceeded { .. } => "max_size_exceeded",
                EngineError::LockConflict(_) => "locked",
                EngineError::ExtensionUnsupported(_) => "extension_unsupported",
                EngineError::PartialNotReady(_) => "partial_not_ready",
                EngineError::InvalidConcat(_) => "invalid_concat",
                EngineError::ModifyFinal(_) => "modify_final",
                EngineError::Validation(_) => "invalid_request",
                EngineError::StoreFull(_) => "store_full",
                EngineError::Storage(_) => "storage_error",
                EngineError::Internal(_) => "internal_error",
            },
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Engine(e) => match e {
                EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                EngineError::OffsetMismatch { .. } => StatusCode::CONFLICT,
                EngineError::SizeExceeded { .. } | EngineError::MaxSizeExceeded { .. } => {
                    StatusCode::PAYLOAD_TOO_LARGE
                }
                EngineError::LockConflict(_) => StatusCode::LOCKED,
                EngineError::ExtensionUnsupported(_) => StatusCode::NOT_IMPLEMENTED,
                EngineError::PartialNotReady(_)
                | EngineError::InvalidConcat(_)
                | EngineError::Validation(_) => StatusCode::BAD_REQUEST,
                EngineError::ModifyFinal(_) => StatusCode::FORBIDDEN,
                EngineError::StoreFull(_) => StatusCode::INSUFFICIENT_STORAGE,
                EngineError::Config(_) | EngineError::Storage(_) | EngineError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        crate::metrics::record_error(self.code());
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }

        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_tus_statuses() {
        let cases = [
            (EngineError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                EngineError::OffsetMismatch {
                    expected: 1,
                    actual: 0,
                },
                StatusCode::CONFLICT,
            ),
            (
                EngineError::SizeExceeded {
                    size: 1,
                    attempted: 2,
                },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (EngineError::LockConflict("x".into()), StatusCode::LOCKED),
            (
                EngineError::ExtensionUnsupported("termination"),
                StatusCode::NOT_IMPLEMENTED,
            ),
            (EngineError::ModifyFinal("x".into()), StatusCode::FORBIDDEN),
            (
                EngineError::PartialNotReady("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                EngineError::Internal("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn precondition_failed_has_code() {
        let err = ApiError::PreconditionFailed("Tus-Resumable must be 1.0.0".into());
        assert_eq!(err.status_code(), StatusCode::PRECONDITION_FAILED);
        assert_eq!(err.code(), "unsupported_version");
    }
}
