pub mod fixtures;
pub mod mocks;

#[allow(unused_imports)]
pub use fixtures::{ALL_BACKENDS, BackendKind, open_engine, open_store, read_all, seeded_bytes};
#[allow(unused_imports)]
pub use mocks::{FailingConcatenator, WriteBehavior, WrappedCore};
