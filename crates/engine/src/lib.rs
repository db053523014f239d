//! Upload session engine for Hopper.
//!
//! Sits between the protocol dispatcher and a [`ComposedStore`]: validates
//! requests against upload state, serializes mutations per upload through
//! the [`LockManager`], and publishes lifecycle events.
//!
//! [`ComposedStore`]: hopper_storage::ComposedStore

pub mod engine;
pub mod error;
pub mod events;
pub mod lock;

pub use engine::{EngineConfig, NewUpload, UploadEngine, UploadLength};
pub use error::{EngineError, EngineResult};
pub use events::{EventBus, UploadEvent};
pub use lock::{Lease, LockManager};
