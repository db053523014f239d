//! tus upload handlers.

use crate::error::{ApiError, ApiResult};
use crate::handlers::parse_upload_id;
use crate::metrics::{
    BYTES_RECEIVED, CHUNK_WRITE_DURATION, UPLOADS_CREATED, UPLOADS_FINISHED, UPLOADS_TERMINATED,
};
use crate::state::AppState;
use crate::tus::{
    Concat, UPLOAD_CONCAT, UPLOAD_DEFER_LENGTH, UPLOAD_LENGTH, UPLOAD_METADATA, UPLOAD_OFFSET,
    encode_concat, encode_metadata, is_offset_octet_stream, parse_concat, parse_metadata,
    parse_u64_header, parse_upload_length, upload_url,
};
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use hopper_core::{UploadId, UploadInfo};
use hopper_engine::NewUpload;

fn header_value(value: &str) -> ApiResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| ApiError::Internal(format!("invalid header value {value:?}: {e}")))
}

/// Write one chunk and record chunk metrics. Returns the new offset.
async fn accept_chunk(
    state: &AppState,
    id: UploadId,
    offset: u64,
    data: Bytes,
) -> ApiResult<u64> {
    let timer = CHUNK_WRITE_DURATION.start_timer();
    let new_offset = state.engine.write_chunk(id, offset, data).await?;
    timer.observe_duration();

    BYTES_RECEIVED.inc_by(new_offset - offset);
    Ok(new_offset)
}

/// POST {base_path} - Create an upload.
///
/// Supports deferred length, partial and final uploads, and a first chunk
/// in the request body (creation-with-upload).
pub async fn create_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let metadata = match headers.get(&UPLOAD_METADATA) {
        Some(raw) => parse_metadata(
            raw.to_str()
                .map_err(|_| ApiError::BadRequest("Upload-Metadata is not valid ASCII".into()))?,
        )?,
        None => Default::default(),
    };
    let concat = match headers.get(&UPLOAD_CONCAT) {
        Some(raw) => Some(parse_concat(raw.to_str().map_err(|_| {
            ApiError::BadRequest("Upload-Concat is not valid ASCII".into())
        })?)?),
        None => None,
    };

    let (info, offset) = match concat {
        Some(Concat::Final(partials)) => {
            let info = state.engine.create_final(partials, metadata).await?;
            UPLOADS_CREATED.inc();
            UPLOADS_FINISHED.inc();
            (info, None)
        }
        concat => {
            let new = NewUpload {
                length: parse_upload_length(&headers)?,
                metadata,
                is_partial: concat == Some(Concat::Partial),
            };
            let info = state.engine.create(new).await?;
            UPLOADS_CREATED.inc();
            if info.is_complete() {
                UPLOADS_FINISHED.inc();
            }

            let offset = if !body.is_empty() && is_offset_octet_stream(&headers) {
                let offset = accept_chunk(&state, info.id, 0, body).await?;
                if !info.size_is_deferred && offset == info.size {
                    UPLOADS_FINISHED.inc();
                }
                Some(offset)
            } else {
                None
            };
            (info, offset)
        }
    };

    let location = upload_url(
        &headers,
        state.base_path(),
        state.config.server.behind_proxy,
        info.id,
    );
    tracing::debug!(upload_id = %info.id, location = %location, "Created upload");

    let mut response_headers = HeaderMap::new();
    response_headers.insert(LOCATION, header_value(&location)?);
    if let Some(offset) = offset {
        response_headers.insert(UPLOAD_OFFSET, HeaderValue::from(offset));
    }
    Ok((StatusCode::CREATED, response_headers).into_response())
}

fn upload_headers(info: &UploadInfo, base_path: &str) -> ApiResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(UPLOAD_OFFSET, HeaderValue::from(info.offset));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if info.size_is_deferred {
        headers.insert(UPLOAD_DEFER_LENGTH, HeaderValue::from_static("1"));
    } else {
        headers.insert(UPLOAD_LENGTH, HeaderValue::from(info.size));
    }
    if !info.metadata.is_empty() {
        headers.insert(UPLOAD_METADATA, header_value(&encode_metadata(&info.metadata))?);
    }
    if let Some(concat) = encode_concat(info, base_path) {
        headers.insert(UPLOAD_CONCAT, header_value(&concat)?);
    }
    Ok(headers)
}

/// HEAD {base_path}{upload_id} - Report the resumption offset.
pub async fn head_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> ApiResult<(StatusCode, HeaderMap)> {
    let id = parse_upload_id(&upload_id)?;
    let info = state.engine.get_info(id).await?;
    Ok((StatusCode::OK, upload_headers(&info, state.base_path())?))
}

/// PATCH {base_path}{upload_id} - Append a chunk at `Upload-Offset`.
pub async fn patch_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, HeaderMap)> {
    if !is_offset_octet_stream(&headers) {
        return Err(ApiError::UnsupportedMediaType(format!(
            "Content-Type must be {}",
            crate::tus::OFFSET_OCTET_STREAM
        )));
    }
    let offset = parse_u64_header(&headers, &UPLOAD_OFFSET)?
        .ok_or_else(|| ApiError::BadRequest("Upload-Offset is required".to_string()))?;
    let id = parse_upload_id(&upload_id)?;

    let mut info = state.engine.get_info(id).await?;
    let was_complete = info.is_complete();

    if let Some(length) = parse_u64_header(&headers, &UPLOAD_LENGTH)? {
        if info.size_is_deferred {
            state.engine.declare_length(id, length).await?;
            info.size = length;
            info.size_is_deferred = false;
        } else if length != info.size {
            return Err(ApiError::BadRequest(format!(
                "Upload-Length is already {} and cannot change",
                info.size
            )));
        }
    }

    let new_offset = accept_chunk(&state, id, offset, body).await?;
    info.offset = new_offset;
    if !was_complete && info.is_complete() {
        UPLOADS_FINISHED.inc();
    }

    let mut response_headers = HeaderMap::new();
    response_headers.insert(UPLOAD_OFFSET, HeaderValue::from(new_offset));
    Ok((StatusCode::NO_CONTENT, response_headers))
}

/// DELETE {base_path}{upload_id} - Terminate an upload.
pub async fn delete_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_upload_id(&upload_id)?;
    if state.engine.terminate(id).await? {
        UPLOADS_TERMINATED.inc();
    }
    Ok(StatusCode::NO_CONTENT)
}

/// GET {base_path}{upload_id} - Stream the bytes received so far.
pub async fn get_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> ApiResult<Response> {
    let id = parse_upload_id(&upload_id)?;
    let info = state.engine.get_info(id).await?;
    let stream = state.engine.get_reader(id).await?;

    let content_type = info
        .metadata
        .get("filetype")
        .and_then(|t| HeaderValue::from_str(t).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));

    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, content_type)],
        Body::from_stream(stream),
    )
        .into_response())
}
