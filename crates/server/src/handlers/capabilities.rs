//! Protocol discovery (`OPTIONS`).

use crate::state::AppState;
use crate::tus::{TUS_EXTENSION, TUS_MAX_SIZE, TUS_VERSION_HEADER};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use hopper_core::TUS_VERSION;

/// Extensions the dispatcher adds on top of the store's capabilities.
const DISPATCHER_EXTENSIONS: &[&str] = &["creation-with-upload"];

/// Comma separated tus extensions supported by this server.
pub fn supported_extensions(state: &AppState) -> String {
    let mut extensions = state.engine.capabilities().extensions();
    extensions.extend_from_slice(DISPATCHER_EXTENSIONS);
    extensions.join(",")
}

/// OPTIONS {base_path} and OPTIONS {base_path}{upload_id}
pub async fn options(State(state): State<AppState>) -> (StatusCode, HeaderMap) {
    let mut headers = HeaderMap::new();
    headers.insert(TUS_VERSION_HEADER, HeaderValue::from_static(TUS_VERSION));
    if let Ok(value) = HeaderValue::from_str(&supported_extensions(&state)) {
        headers.insert(TUS_EXTENSION, value);
    }
    if let Some(max) = state.engine.max_size() {
        headers.insert(TUS_MAX_SIZE, HeaderValue::from(max));
    }
    (StatusCode::NO_CONTENT, headers)
}
