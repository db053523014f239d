//! Configuration types shared across crates.

use crate::hook::HookEvent;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:1080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// URL path under which uploads are served. Must start and end with '/'.
    #[serde(default = "default_base_path")]
    pub base_path: String,
    /// Maximum upload size in bytes (0 = unlimited).
    #[serde(default)]
    pub max_size: u64,
    /// Maximum request body size for a single chunk.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    /// Enable the Prometheus endpoint (default: true).
    /// SECURITY: When enabled, restrict the endpoint to scraper IPs at the
    /// infrastructure level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Path of the Prometheus endpoint.
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
    /// Honour X-Forwarded-Host / X-Forwarded-Proto when building upload URLs.
    #[serde(default)]
    pub behind_proxy: bool,
}

fn default_bind() -> String {
    "127.0.0.1:1080".to_string()
}

fn default_base_path() -> String {
    "/files/".to_string()
}

fn default_max_chunk_size() -> u64 {
    crate::DEFAULT_MAX_CHUNK_SIZE
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            base_path: default_base_path(),
            max_size: 0,
            max_chunk_size: default_max_chunk_size(),
            metrics_enabled: default_metrics_enabled(),
            metrics_path: default_metrics_path(),
            behind_proxy: false,
        }
    }
}

impl ServerConfig {
    /// Maximum upload size, or `None` when unlimited.
    pub fn max_size(&self) -> Option<u64> {
        (self.max_size > 0).then_some(self.max_size)
    }

    /// Validate server configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if !self.base_path.starts_with('/') || !self.base_path.ends_with('/') {
            return Err(format!(
                "server.base_path must start and end with '/': {:?}",
                self.base_path
            ));
        }
        if !self.metrics_path.starts_with('/') {
            return Err(format!(
                "server.metrics_path must start with '/': {:?}",
                self.metrics_path
            ));
        }
        if self.max_chunk_size == 0 {
            return Err("server.max_chunk_size must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Storage backend selection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Upload bytes held in process memory, metadata and locks on disk.
    /// Only valid for single-process deployments.
    Cache {
        /// Directory for `.info` sidecars and `.lock` files.
        path: PathBuf,
    },
    /// Upload bytes and metadata on the local filesystem.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/uploads"),
        }
    }
}

/// Which locker the composed store uses.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LockerKind {
    /// The backend's own (file based) locker.
    #[default]
    Store,
    /// A process-local in-memory locker.
    Memory,
}

/// Storage configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend selection.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Optional byte budget across all uploads. When set, the oldest uploads
    /// are terminated to make room for new ones.
    #[serde(default)]
    pub store_size: Option<u64>,
    /// Locker selection.
    #[serde(default)]
    pub locker: LockerKind,
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        let path = match &self.backend {
            BackendConfig::Cache { path } | BackendConfig::Filesystem { path } => path,
        };
        if path.as_os_str().is_empty() {
            return Err("storage.backend.path must not be empty".to_string());
        }
        if self.store_size == Some(0) {
            return Err("storage.store_size must be greater than zero when set".to_string());
        }
        Ok(())
    }
}

/// Per-upload lock acquisition settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockingConfig {
    /// How long to keep retrying a busy lock before reporting a conflict
    /// (0 = fail immediately).
    #[serde(default)]
    pub acquire_timeout_ms: u64,
    /// Delay between lock attempts while retrying.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

fn default_retry_interval_ms() -> u64 {
    25
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 0,
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl LockingConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms.max(1))
    }
}

/// HTTP hook notification settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HooksConfig {
    /// Endpoint receiving hook POSTs. Hooks are disabled when unset.
    #[serde(default)]
    pub http_endpoint: Option<String>,
    /// Number of retries for a failed delivery.
    #[serde(default = "default_http_retry")]
    pub http_retry: u32,
    /// Seconds to wait between retries.
    #[serde(default = "default_http_backoff_secs")]
    pub http_backoff_secs: u64,
    /// Events to deliver (empty = all).
    #[serde(default)]
    pub enabled_events: Vec<HookEvent>,
}

fn default_http_retry() -> u32 {
    3
}

fn default_http_backoff_secs() -> u64 {
    1
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            http_endpoint: None,
            http_retry: default_http_retry(),
            http_backoff_secs: default_http_backoff_secs(),
            enabled_events: Vec::new(),
        }
    }
}

impl HooksConfig {
    pub fn http_backoff(&self) -> Duration {
        Duration::from_secs(self.http_backoff_secs)
    }

    /// Whether an event should be delivered.
    pub fn is_enabled(&self, event: HookEvent) -> bool {
        self.enabled_events.is_empty() || self.enabled_events.contains(&event)
    }

    /// Validate hook configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(endpoint) = &self.http_endpoint
            && !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
        {
            return Err(format!(
                "hooks.http_endpoint must be an http(s) URL: {endpoint:?}"
            ));
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Lock acquisition configuration.
    #[serde(default)]
    pub locking: LockingConfig,
    /// Hook configuration.
    #[serde(default)]
    pub hooks: HooksConfig,
}

impl AppConfig {
    /// Create a test configuration backed by the cache store at `path`.
    ///
    /// **For testing only.**
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                backend: BackendConfig::Cache { path: path.into() },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.storage.validate()?;
        self.hooks.validate()?;
        Ok(())
    }
}
