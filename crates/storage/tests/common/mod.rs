pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{ALL_BACKENDS, BackendKind, open_store, seeded_bytes};
