//! tus 1.0.0 HTTP server for Hopper.
//!
//! This crate provides the protocol dispatcher over the upload engine:
//! - Creation, offset query, chunk append, termination and download
//! - Deferred length and concatenation extensions
//! - Prometheus metrics
//! - HTTP lifecycle hooks

pub mod error;
pub mod handlers;
pub mod hooks;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod tus;

pub use error::ApiError;
pub use hooks::HookNotifier;
pub use routes::create_router;
pub use state::AppState;
