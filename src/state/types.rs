//! State types for tracking converged resources.
//!
//! These types represent the recorded state of the stack: one record per
//! resource plus an append-only journal of record transitions. Records are
//! owned exclusively by the state store and mutated only after a confirmed
//! remote operation.

use crate::config::ResourceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// The materialized latest-state table for a stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// State format version.
    pub version: String,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Records keyed by logical id.
    pub resources: HashMap<String, ResourceRecord>,
    /// When the snapshot was last updated.
    pub last_updated: DateTime<Utc>,
}

/// The recorded state of a single resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRecord {
    /// Logical id from the stack file.
    pub logical_id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Remote id assigned by the provider, once created.
    pub remote_id: Option<String>,
    /// Declared attributes at last apply, references unresolved.
    pub declared: BTreeMap<String, Value>,
    /// Attributes actually sent to the provider, references resolved.
    pub last_applied: BTreeMap<String, Value>,
    /// Fingerprint of the declared attributes.
    pub attributes_hash: String,
    /// Explicit and implicit dependency ids at last apply.
    pub depends_on: Vec<String>,
    /// Current status.
    pub status: ResourceStatus,
    /// Optimistic concurrency token, bumped on every commit.
    pub version: u64,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
    /// When the remote resource was last observed via the provider.
    pub last_refreshed: Option<DateTime<Utc>>,
}

/// Resource lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    /// Record exists but no remote operation has confirmed yet.
    Pending,
    /// Remote resource was created.
    Created,
    /// Remote resource was updated in place.
    Updated,
    /// Remote resource was deleted.
    Deleted,
    /// The last operation on this resource failed.
    Failed,
}

/// A single entry in the append-only journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// When the transition was recorded.
    pub timestamp: DateTime<Utc>,
    /// Logical id of the affected resource.
    pub logical_id: String,
    /// Operation that caused the transition.
    pub operation: StateOperation,
    /// Record version after the transition.
    pub version: u64,
    /// Status after the transition.
    pub status: ResourceStatus,
    /// Whether the underlying remote operation succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of state transitions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StateOperation {
    /// Resource created.
    Create,
    /// Resource updated in place.
    Update,
    /// Resource replaced (delete then create).
    Replace,
    /// Resource deleted.
    Delete,
    /// Record refreshed from the provider.
    Refresh,
}

impl StateSnapshot {
    /// Creates a new empty snapshot.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            project: project.to_string(),
            environment: environment.to_string(),
            resources: HashMap::new(),
            last_updated: Utc::now(),
        }
    }

    /// Gets a record by logical id.
    #[must_use]
    pub fn get(&self, logical_id: &str) -> Option<&ResourceRecord> {
        self.resources.get(logical_id)
    }

    /// Adds or replaces a record.
    pub fn set(&mut self, record: ResourceRecord) {
        self.resources.insert(record.logical_id.clone(), record);
        self.last_updated = Utc::now();
    }

    /// Removes a record by logical id.
    pub fn remove(&mut self, logical_id: &str) -> Option<ResourceRecord> {
        let result = self.resources.remove(logical_id);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Returns all logical ids with live (non-deleted) records.
    #[must_use]
    pub fn live_ids(&self) -> Vec<&str> {
        self.resources
            .values()
            .filter(|r| r.status != ResourceStatus::Deleted)
            .map(|r| r.logical_id.as_str())
            .collect()
    }
}

impl ResourceRecord {
    /// Creates a new pending record for a resource about to be created.
    #[must_use]
    pub fn new(logical_id: &str, kind: ResourceKind, attributes_hash: &str) -> Self {
        let now = Utc::now();
        Self {
            logical_id: logical_id.to_string(),
            kind,
            remote_id: None,
            declared: BTreeMap::new(),
            last_applied: BTreeMap::new(),
            attributes_hash: attributes_hash.to_string(),
            depends_on: Vec::new(),
            status: ResourceStatus::Pending,
            version: 0,
            created_at: now,
            updated_at: now,
            last_refreshed: None,
        }
    }

    /// Updates the status and bumps the updated timestamp.
    pub fn set_status(&mut self, status: ResourceStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Marks the record as freshly observed via the provider.
    pub fn mark_refreshed(&mut self) {
        self.last_refreshed = Some(Utc::now());
    }

    /// Returns true when the last provider observation is within the grace
    /// window and can be trusted without a remote read.
    #[must_use]
    pub fn is_fresh(&self, grace_secs: u64) -> bool {
        self.last_refreshed.is_some_and(|at| {
            let age = Utc::now().signed_duration_since(at);
            age.num_seconds() >= 0 && age.num_seconds() as u64 <= grace_secs
        })
    }

    /// Returns true when the record still tracks a remote resource.
    ///
    /// A failed update or delete keeps its remote id, so the resource is
    /// still out there and must be planned against; only a record without a
    /// remote id (or one already deleted) is untracked.
    #[must_use]
    pub const fn is_tracked(&self) -> bool {
        self.remote_id.is_some() && !matches!(self.status, ResourceStatus::Deleted)
    }
}

impl JournalEntry {
    /// Creates a successful journal entry for a record transition.
    #[must_use]
    pub fn success(operation: StateOperation, record: &ResourceRecord) -> Self {
        Self {
            timestamp: Utc::now(),
            logical_id: record.logical_id.clone(),
            operation,
            version: record.version,
            status: record.status,
            success: true,
            error: None,
        }
    }

    /// Creates a failed journal entry.
    #[must_use]
    pub fn failure(operation: StateOperation, record: &ResourceRecord, error: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            logical_id: record.logical_id.clone(),
            operation,
            version: record.version,
            status: record.status,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Pending => "pending",
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Failed => "failed",
        };
        write!(f, "{status}")
    }
}

impl std::fmt::Display for StateOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Refresh => "refresh",
        };
        write!(f, "{op}")
    }
}
