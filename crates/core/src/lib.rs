//! Core domain types for the Hopper resumable upload server.
//!
//! This crate defines the data model shared by every other crate:
//! - Upload identifiers and the canonical upload record
//! - Lifecycle hook event names
//! - Application configuration

pub mod config;
pub mod error;
pub mod hook;
pub mod upload;

pub use error::{Error, Result};
pub use hook::HookEvent;
pub use upload::{UploadId, UploadInfo, UploadState};

/// tus protocol version implemented by the server.
pub const TUS_VERSION: &str = "1.0.0";

/// Default request body cap for a single chunk: 64 MiB
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024;
