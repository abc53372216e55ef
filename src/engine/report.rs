//! Apply run reporting types.
//!
//! A run never panics out halfway: every entry ends in exactly one outcome,
//! and the report aggregates them. A partial apply (some entries failed or
//! were skipped) is a valid terminal result surfaced to the caller, not an
//! error.

use serde::Serialize;

use crate::config::ResourceKind;
use crate::planner::Action;

/// Why an entry was skipped without being attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum SkipReason {
    /// A dependency failed or was itself skipped.
    DependencyFailed(String),
    /// The run was cancelled before the entry started.
    Cancelled,
}

/// Terminal outcome of a single entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum Outcome {
    /// The operation completed and state was committed.
    Applied,
    /// No action was needed.
    Unchanged,
    /// The operation failed terminally.
    Failed {
        /// Why it failed.
        error: String,
    },
    /// The entry was never attempted.
    Skipped {
        /// Why it was skipped.
        #[serde(flatten)]
        reason: SkipReason,
    },
}

/// Result of a single change set entry.
#[derive(Debug, Clone, Serialize)]
pub struct EntryResult {
    /// Logical id of the resource.
    pub logical_id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// The action that was planned.
    pub action: Action,
    /// How the entry ended.
    pub outcome: Outcome,
    /// Remote operation attempts made (0 for skipped entries).
    pub attempts: u32,
    /// Wall time spent on the entry in milliseconds.
    pub duration_ms: u64,
}

/// Aggregated result of an apply or destroy run.
#[derive(Debug, Default, Serialize)]
pub struct ApplyReport {
    /// Per-entry results in completion order.
    pub results: Vec<EntryResult>,
    /// Number of applied entries.
    pub applied: usize,
    /// Number of unchanged entries.
    pub unchanged: usize,
    /// Number of failed entries.
    pub failed: usize,
    /// Number of skipped entries.
    pub skipped: usize,
    /// Whether the run was cancelled.
    pub cancelled: bool,
}

impl ApplyReport {
    /// Records an entry result and updates the tallies.
    pub fn record(&mut self, result: EntryResult) {
        match &result.outcome {
            Outcome::Applied => self.applied += 1,
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::Failed { .. } => self.failed += 1,
            Outcome::Skipped { .. } => self.skipped += 1,
        }
        self.results.push(result);
    }

    /// Returns true when every entry either applied or was unchanged.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    /// Returns true when some entries applied but others failed or were
    /// skipped.
    #[must_use]
    pub const fn is_partial(&self) -> bool {
        !self.is_success() && self.applied > 0
    }

    /// Looks up the result for a logical id.
    #[must_use]
    pub fn result_for(&self, logical_id: &str) -> Option<&EntryResult> {
        self.results.iter().find(|r| r.logical_id == logical_id)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Applied => write!(f, "applied"),
            Self::Unchanged => write!(f, "unchanged"),
            Self::Failed { error } => write!(f, "failed: {error}"),
            Self::Skipped {
                reason: SkipReason::DependencyFailed(dep),
            } => write!(f, "skipped (dependency '{dep}' failed)"),
            Self::Skipped {
                reason: SkipReason::Cancelled,
            } => write!(f, "skipped (cancelled)"),
        }
    }
}
