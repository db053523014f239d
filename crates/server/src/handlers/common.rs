//! Shared handler helpers.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use hopper_core::UploadId;
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub backend: &'static str,
}

/// GET /health - Health check.
///
/// Unauthenticated and exempt from `Tus-Resumable` so load balancers can
/// probe it.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.engine.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        backend: state.engine.backend_name(),
    }))
}

/// Parse an upload ID from the URL. Malformed IDs cannot name an upload,
/// so they are reported as not found.
pub fn parse_upload_id(raw: &str) -> ApiResult<UploadId> {
    UploadId::parse(raw).map_err(|_| ApiError::NotFound(format!("upload {raw}")))
}
