//! State management module for the Stratus convergence engine.
//!
//! This module provides persistent state storage for tracking converged
//! resources: the materialized record table, the append-only journal of
//! record transitions, and run locking.

mod store;
mod local;
mod lock;
mod types;

pub use store::StateStore;
pub use local::LocalStateStore;
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
pub use types::{
    JournalEntry, ResourceRecord, ResourceStatus, StateOperation, StateSnapshot, STATE_VERSION,
};
