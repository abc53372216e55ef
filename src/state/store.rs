//! State store trait definition.
//!
//! This module defines the common interface for state storage backends.
//! A backend owns the materialized record table and the append-only journal;
//! record mutation goes through [`StateStore::commit`], an atomic per-record
//! read-modify-write guarded by an optimistic version token.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::{JournalEntry, ResourceRecord, StateSnapshot};
use crate::error::Result;

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the full state snapshot.
    ///
    /// Returns `None` if no state exists yet.
    async fn load(&self) -> Result<Option<StateSnapshot>>;

    /// Initializes an empty snapshot for the project, if none exists.
    async fn init(&self, project: &str, environment: &str) -> Result<StateSnapshot>;

    /// Loads a single record by logical id.
    async fn get(&self, logical_id: &str) -> Result<Option<ResourceRecord>>;

    /// Commits a record transition atomically.
    ///
    /// `expected_version` is the version the caller read; the store rejects
    /// the commit with `StateError::VersionConflict` when the stored version
    /// differs. On success the record's version is bumped and the journal
    /// entry is appended in the same write.
    async fn commit(
        &self,
        record: ResourceRecord,
        expected_version: u64,
        entry: JournalEntry,
    ) -> Result<ResourceRecord>;

    /// Removes a record, appending the journal entry in the same write.
    async fn remove(
        &self,
        logical_id: &str,
        expected_version: u64,
        entry: JournalEntry,
    ) -> Result<()>;

    /// Reads the journal, most recent entries last.
    async fn journal(&self, limit: usize) -> Result<Vec<JournalEntry>>;

    /// Deletes all state for the stack.
    async fn delete_all(&self) -> Result<()>;

    /// Checks if state exists.
    async fn exists(&self) -> Result<bool>;

    /// Acquires the run lock.
    ///
    /// Returns lock information if successful.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases the run lock.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if the state is locked.
    async fn is_locked(&self) -> Result<bool>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn load(&self) -> Result<Option<StateSnapshot>> {
        (**self).load().await
    }

    async fn init(&self, project: &str, environment: &str) -> Result<StateSnapshot> {
        (**self).init(project, environment).await
    }

    async fn get(&self, logical_id: &str) -> Result<Option<ResourceRecord>> {
        (**self).get(logical_id).await
    }

    async fn commit(
        &self,
        record: ResourceRecord,
        expected_version: u64,
        entry: JournalEntry,
    ) -> Result<ResourceRecord> {
        (**self).commit(record, expected_version, entry).await
    }

    async fn remove(
        &self,
        logical_id: &str,
        expected_version: u64,
        entry: JournalEntry,
    ) -> Result<()> {
        (**self).remove(logical_id, expected_version, entry).await
    }

    async fn journal(&self, limit: usize) -> Result<Vec<JournalEntry>> {
        (**self).journal(limit).await
    }

    async fn delete_all(&self) -> Result<()> {
        (**self).delete_all().await
    }

    async fn exists(&self) -> Result<bool> {
        (**self).exists().await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        (**self).acquire_lock(holder).await
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        (**self).release_lock(lock_id).await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        (**self).get_lock_info().await
    }

    async fn is_locked(&self) -> Result<bool> {
        (**self).is_locked().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
