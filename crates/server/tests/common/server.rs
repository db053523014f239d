//! Server test utilities.

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use bytes::Bytes;
use hopper_core::TUS_VERSION;
use hopper_core::config::AppConfig;
use hopper_server::{AppState, create_router};
use tempfile::TempDir;
use tower::ServiceExt;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

/// Response pieces tests look at.
#[allow(dead_code)]
pub struct TusResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[allow(dead_code)]
impl TusResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server over a cache store in a temp directory.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = AppConfig::for_testing(temp_dir.path().join("uploads"));
        modifier(&mut config);

        let store = hopper_storage::from_config(&config.storage)
            .await
            .expect("Failed to compose store");
        let state = AppState::new(config, store);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Path of the temporary storage directory.
    pub fn storage_dir(&self) -> std::path::PathBuf {
        self._temp_dir.path().join("uploads")
    }

    /// Send a request with `Tus-Resumable: 1.0.0` plus `headers`.
    pub async fn tus(
        &self,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: impl Into<Body>,
    ) -> TusResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("Tus-Resumable", TUS_VERSION)
            .header("Host", "uploads.test");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(builder.body(body.into()).unwrap()).await
    }

    /// Send an arbitrary request.
    pub async fn send(&self, request: Request<Body>) -> TusResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        TusResponse {
            status,
            headers,
            body,
        }
    }

    /// Create an upload of `size` bytes and return its path.
    pub async fn create(&self, size: u64) -> String {
        self.create_with(&[("Upload-Length", &size.to_string())]).await
    }

    /// Create an upload with extra headers and return its path.
    pub async fn create_with(&self, headers: &[(&str, &str)]) -> String {
        let response = self.tus("POST", "/files/", headers, Body::empty()).await;
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.json());
        let location = response.header("location").expect("Location header");
        location
            .strip_prefix("http://uploads.test")
            .unwrap_or(location)
            .to_string()
    }

    /// PATCH `data` at `offset`.
    pub async fn patch(&self, path: &str, offset: u64, data: impl Into<Body>) -> TusResponse {
        self.tus(
            "PATCH",
            path,
            &[
                ("Content-Type", "application/offset+octet-stream"),
                ("Upload-Offset", &offset.to_string()),
            ],
            data,
        )
        .await
    }
}
