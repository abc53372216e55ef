//! Cloud provider module.
//!
//! Defines the provider trait the planner and executor operate against, plus
//! the two backends: the JSON-over-HTTP client used against a real provider
//! API, and the in-memory backend used for tests and offline runs.

mod api;
mod http;
mod memory;

pub use api::{Attributes, CloudProvider};
pub use http::HttpProvider;
pub use memory::MemoryProvider;
