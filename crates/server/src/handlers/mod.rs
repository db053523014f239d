//! HTTP request handlers.

pub mod capabilities;
pub mod common;
pub mod uploads;

pub use capabilities::*;
pub use common::*;
pub use uploads::*;
