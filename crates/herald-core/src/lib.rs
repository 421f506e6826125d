//! `herald-core`: configuration, shared error type and identifiers used by
//! every other Herald crate.

pub mod config;
pub mod error;
pub mod types;

pub use error::{HeraldError, Result};
pub use types::TaskId;
