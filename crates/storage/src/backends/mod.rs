//! Storage backends.

pub mod cache;
pub mod filesystem;
pub mod limited;
mod sidecar;
