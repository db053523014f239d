//! Prometheus metrics for the Hopper server.
//!
//! # Security Note
//!
//! The metrics endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no upload IDs or metadata, only aggregate counts, but the
//! endpoint should still be network-restricted to scraper IPs.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("hopper_requests_total", "Total tus requests by HTTP method"),
        &["method"],
    )
    .expect("metric creation failed")
});

pub static ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("hopper_errors_total", "Total error responses by error code"),
        &["code"],
    )
    .expect("metric creation failed")
});

pub static BYTES_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_bytes_received_total",
        "Total upload bytes accepted",
    )
    .expect("metric creation failed")
});

pub static UPLOADS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("hopper_uploads_created_total", "Total uploads created")
        .expect("metric creation failed")
});

pub static UPLOADS_FINISHED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_uploads_finished_total",
        "Total uploads that received all their bytes",
    )
    .expect("metric creation failed")
});

pub static UPLOADS_TERMINATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_uploads_terminated_total",
        "Total uploads deleted by clients",
    )
    .expect("metric creation failed")
});

pub static HOOK_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "hopper_hook_errors_total",
            "Total failed hook deliveries by hook type",
        ),
        &["hooktype"],
    )
    .expect("metric creation failed")
});

pub static CHUNK_WRITE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "hopper_chunk_write_duration_seconds",
            "Time taken to accept a single chunk",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
    )
    .expect("metric creation failed")
});

pub static CONNECTIONS_OPEN: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "hopper_connections_open",
        "Current number of tus requests in flight",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Safe to call more than once.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(REQUESTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ERRORS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_RECEIVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_CREATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_FINISHED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_TERMINATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(HOOK_ERRORS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNK_WRITE_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CONNECTIONS_OPEN.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

pub fn record_request(method: &str) {
    REQUESTS.with_label_values(&[method]).inc();
}

pub fn record_error(code: &str) {
    ERRORS.with_label_values(&[code]).inc();
}

pub fn record_hook_error(hook_type: &str) {
    HOOK_ERRORS.with_label_values(&[hook_type]).inc();
}

/// Counts one open tus request for as long as it is alive.
///
/// Dropping the guard closes the count, so requests abandoned mid-flight
/// are released as well.
#[must_use]
pub struct OpenConnection(());

impl OpenConnection {
    pub fn open() -> Self {
        CONNECTIONS_OPEN.inc();
        Self(())
    }
}

impl Drop for OpenConnection {
    fn drop(&mut self) {
        CONNECTIONS_OPEN.dec();
    }
}
