//! Planning module for convergence runs.
//!
//! This module computes attribute-level diffs between desired, recorded,
//! and observed state, and assembles them into an ordered change set for
//! the executor. Change sets are computed fresh each run and never
//! persisted.

mod diff;
mod changeset;

pub use diff::{Action, AttributeDelta, DiffEngine, ResourceDiff};
pub use changeset::{ChangeEntry, ChangeSet, Planner};
