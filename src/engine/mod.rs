//! Execution engine module.
//!
//! Applies a planned change set against the provider: bounded concurrency
//! across independent dependency branches, retries with exponential backoff,
//! per-operation timeouts, skip propagation on failure, and cooperative
//! cancellation.

mod executor;
mod report;
mod retry;

pub use executor::{ApplyEngine, CancelToken};
pub use report::{ApplyReport, EntryResult, Outcome, SkipReason};
pub use retry::RetryPolicy;
