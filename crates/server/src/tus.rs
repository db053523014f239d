//! tus 1.0.0 wire format: header names and value codecs.

use crate::error::{ApiError, ApiResult};
use axum::extract::Request;
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hopper_core::{TUS_VERSION, UploadId};
use hopper_engine::{EngineError, UploadLength};
use std::collections::BTreeMap;

pub const TUS_RESUMABLE: HeaderName = HeaderName::from_static("tus-resumable");
pub const TUS_VERSION_HEADER: HeaderName = HeaderName::from_static("tus-version");
pub const TUS_EXTENSION: HeaderName = HeaderName::from_static("tus-extension");
pub const TUS_MAX_SIZE: HeaderName = HeaderName::from_static("tus-max-size");
pub const UPLOAD_OFFSET: HeaderName = HeaderName::from_static("upload-offset");
pub const UPLOAD_LENGTH: HeaderName = HeaderName::from_static("upload-length");
pub const UPLOAD_DEFER_LENGTH: HeaderName = HeaderName::from_static("upload-defer-length");
pub const UPLOAD_METADATA: HeaderName = HeaderName::from_static("upload-metadata");
pub const UPLOAD_CONCAT: HeaderName = HeaderName::from_static("upload-concat");

const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Content type every PATCH body must carry.
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// Reject requests without a supported `Tus-Resumable` header and stamp
/// the header on every response.
///
/// OPTIONS is exempt so clients can discover the supported versions.
pub async fn tus_resumable(req: Request, next: Next) -> Response {
    crate::metrics::record_request(req.method().as_str());
    let _open = crate::metrics::OpenConnection::open();

    if req.method() != Method::OPTIONS {
        let version = req.headers().get(&TUS_RESUMABLE);
        if version.is_none_or(|v| v.as_bytes() != TUS_VERSION.as_bytes()) {
            let mut response = ApiError::PreconditionFailed(format!(
                "Tus-Resumable must be {TUS_VERSION}"
            ))
            .into_response();
            let headers = response.headers_mut();
            headers.insert(TUS_VERSION_HEADER, HeaderValue::from_static(TUS_VERSION));
            headers.insert(TUS_RESUMABLE, HeaderValue::from_static(TUS_VERSION));
            return response;
        }
    }

    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert(TUS_RESUMABLE, HeaderValue::from_static(TUS_VERSION));
    response
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> ApiResult<Option<&'a str>> {
    headers
        .get(name)
        .map(|v| {
            v.to_str()
                .map(str::trim)
                .map_err(|_| ApiError::BadRequest(format!("{name} is not valid ASCII")))
        })
        .transpose()
}

/// Parse a non-negative integer header such as `Upload-Offset`.
pub fn parse_u64_header(headers: &HeaderMap, name: &HeaderName) -> ApiResult<Option<u64>> {
    header_str(headers, name)?
        .map(|v| {
            v.parse::<u64>()
                .map_err(|_| ApiError::BadRequest(format!("{name} must be a non-negative integer")))
        })
        .transpose()
}

/// Read `Upload-Length` / `Upload-Defer-Length` from a creation request.
pub fn parse_upload_length(headers: &HeaderMap) -> ApiResult<UploadLength> {
    let length = header_str(headers, &UPLOAD_LENGTH)?;
    let defer = header_str(headers, &UPLOAD_DEFER_LENGTH)?;

    match (length, defer) {
        (Some(_), Some(_)) => Err(ApiError::BadRequest(
            "Upload-Length and Upload-Defer-Length are mutually exclusive".to_string(),
        )),
        (Some(length), None) => {
            let size = length.parse::<i64>().map_err(|_| {
                ApiError::BadRequest("Upload-Length must be an integer".to_string())
            })?;
            Ok(UploadLength::from_declared(size, false)?)
        }
        (None, Some("1")) => Ok(UploadLength::from_declared(0, true)?),
        (None, Some(_)) => Err(ApiError::BadRequest(
            "Upload-Defer-Length must be 1".to_string(),
        )),
        (None, None) => Err(ApiError::BadRequest(
            "Upload-Length or Upload-Defer-Length is required".to_string(),
        )),
    }
}

/// Decode `Upload-Metadata`: comma separated `key base64(value)` pairs. A
/// key without a value maps to the empty string.
pub fn parse_metadata(raw: &str) -> ApiResult<BTreeMap<String, String>> {
    let mut metadata = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let mut parts = pair.split(' ').filter(|p| !p.is_empty());
        let key = parts.next().unwrap_or_default();
        let value = match (parts.next(), parts.next()) {
            (None, _) => String::new(),
            (Some(encoded), None) => {
                let bytes = STANDARD.decode(encoded).map_err(|e| {
                    ApiError::BadRequest(format!("Upload-Metadata value for {key:?}: {e}"))
                })?;
                String::from_utf8(bytes).map_err(|_| {
                    ApiError::BadRequest(format!("Upload-Metadata value for {key:?} is not UTF-8"))
                })?
            }
            (Some(_), Some(_)) => {
                return Err(ApiError::BadRequest(format!(
                    "Upload-Metadata pair {pair:?} has too many parts"
                )));
            }
        };
        if metadata.insert(key.to_string(), value).is_some() {
            return Err(ApiError::BadRequest(format!(
                "Upload-Metadata key {key:?} repeated"
            )));
        }
    }
    Ok(metadata)
}

pub fn encode_metadata(metadata: &BTreeMap<String, String>) -> String {
    metadata
        .iter()
        .map(|(key, value)| {
            if value.is_empty() {
                key.clone()
            } else {
                format!("{key} {}", STANDARD.encode(value))
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Value of an `Upload-Concat` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Concat {
    Partial,
    Final(Vec<UploadId>),
}

/// Parse `Upload-Concat`. Final uploads list partials as space separated
/// URLs or paths; the upload ID is the last path segment of each.
pub fn parse_concat(raw: &str) -> ApiResult<Concat> {
    let raw = raw.trim();
    if raw == "partial" {
        return Ok(Concat::Partial);
    }
    let Some(urls) = raw.strip_prefix("final;") else {
        return Err(ApiError::BadRequest(format!(
            "Upload-Concat must be \"partial\" or \"final;<urls>\": {raw:?}"
        )));
    };

    urls.split_whitespace()
        .map(|url| {
            let segment = url.trim_end_matches('/').rsplit('/').next().unwrap_or(url);
            UploadId::parse(segment).map_err(|_| {
                ApiError::Engine(EngineError::InvalidConcat(format!(
                    "not an upload URL: {url}"
                )))
            })
        })
        .collect::<ApiResult<Vec<_>>>()
        .map(Concat::Final)
}

pub fn encode_concat(info: &hopper_core::UploadInfo, base_path: &str) -> Option<String> {
    if info.is_partial {
        Some("partial".to_string())
    } else if info.is_final {
        let urls: Vec<_> = info
            .partial_uploads
            .iter()
            .map(|id| format!("{base_path}{id}"))
            .collect();
        Some(format!("final;{}", urls.join(" ")))
    } else {
        None
    }
}

/// Whether the request body is tus chunk data.
pub fn is_offset_octet_stream(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case(OFFSET_OCTET_STREAM))
}

/// Absolute URL of an upload for the `Location` header.
///
/// Falls back to a path when the request carries no host.
pub fn upload_url(headers: &HeaderMap, base_path: &str, behind_proxy: bool, id: UploadId) -> String {
    let host = forwarded(headers, &X_FORWARDED_HOST, behind_proxy)
        .or_else(|| headers.get(HOST).and_then(|v| v.to_str().ok()));
    let proto = forwarded(headers, &X_FORWARDED_PROTO, behind_proxy).unwrap_or("http");

    match host {
        Some(host) => format!("{proto}://{host}{base_path}{id}"),
        None => format!("{base_path}{id}"),
    }
}

/// First value of a proxy header, if proxy headers are trusted.
fn forwarded<'a>(headers: &'a HeaderMap, name: &HeaderName, trusted: bool) -> Option<&'a str> {
    if !trusted {
        return None;
    }
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
