//! Model configuration domain: provider tags, config payloads, persistence.

pub mod manager;
pub mod types;

pub use manager::*;
pub use types::*;
