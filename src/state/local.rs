//! Local file-based state storage backend.
//!
//! State lives under `.stratus/`: a materialized `state.json` table plus an
//! append-only `journal.jsonl` of record transitions. All writes go through
//! an in-process mutex and land via temp-file + rename, so a crashed run
//! never leaves a half-written table behind.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, StateError, StratusError};

use super::lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
use super::store::StateStore;
use super::types::{JournalEntry, ResourceRecord, StateSnapshot};

/// Default state directory name.
const STATE_DIR: &str = ".stratus";

/// Materialized state table file name.
const STATE_FILE: &str = "state.json";

/// Append-only journal file name.
const JOURNAL_FILE: &str = "journal.jsonl";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Path to the materialized state table.
    state_path: PathBuf,
    /// Path to the journal.
    journal_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_guard: Mutex<()>,
}

impl LocalStateStore {
    /// Creates a new local state store rooted in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| StratusError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a new local state store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let state_path = base_dir.join(STATE_FILE);
        let journal_path = base_dir.join(JOURNAL_FILE);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            state_path,
            journal_path,
            lock_path,
            write_guard: Mutex::new(()),
        }
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir)
                .await
                .map_err(|e| StateError::write(format!("Failed to create state directory: {e}")))?;
        }
        Ok(())
    }

    /// Reads the snapshot from disk without taking the write guard.
    async fn read_snapshot(&self) -> Result<Option<StateSnapshot>> {
        if !self.state_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.state_path)
            .await
            .map_err(|e| StateError::corrupted(format!("Failed to read state file: {e}")))?;

        let snapshot: StateSnapshot = serde_json::from_str(&content)
            .map_err(|e| StateError::corrupted(format!("Failed to parse state file: {e}")))?;

        Ok(Some(snapshot))
    }

    /// Writes the snapshot via temp-file + rename.
    async fn write_snapshot(&self, snapshot: &StateSnapshot) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(snapshot)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        let temp_path = self.state_path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::write(format!("Failed to create temp state file: {e}")))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::write(format!("Failed to write state file: {e}")))?;

        file.sync_all()
            .await
            .map_err(|e| StateError::write(format!("Failed to sync state file: {e}")))?;

        fs::rename(&temp_path, &self.state_path)
            .await
            .map_err(|e| StateError::write(format!("Failed to rename state file: {e}")))?;

        Ok(())
    }

    /// Appends a single journal entry as a JSON line.
    async fn append_journal(&self, entry: &JournalEntry) -> Result<()> {
        self.ensure_dir().await?;

        let mut line = serde_json::to_string(entry)
            .map_err(|e| StateError::serialization(format!("Failed to serialize journal entry: {e}")))?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.journal_path)
            .await
            .map_err(|e| StateError::write(format!("Failed to open journal: {e}")))?;

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StateError::write(format!("Failed to append journal entry: {e}")))?;

        file.sync_all()
            .await
            .map_err(|e| StateError::write(format!("Failed to sync journal: {e}")))?;

        Ok(())
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.lock_path)
            .await
            .map_err(|e| StateError::corrupted(format!("Failed to read lock file: {e}")))?;

        let lock_info: LockInfo = serde_json::from_str(&content)
            .map_err(|e| StateError::corrupted(format!("Failed to parse lock file: {e}")))?;

        Ok(Some(lock_info))
    }

    /// Writes the lock file.
    async fn write_lock_file(&self, lock_info: &LockInfo) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        let mut file = fs::File::create(&self.lock_path).await.map_err(|e| {
            StratusError::State(StateError::LockFailed {
                message: format!("Failed to create lock file: {e}"),
            })
        })?;

        file.write_all(content.as_bytes()).await.map_err(|e| {
            StratusError::State(StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })
        })?;

        file.sync_all().await.map_err(|e| {
            StratusError::State(StateError::LockFailed {
                message: format!("Failed to sync lock file: {e}"),
            })
        })?;

        Ok(())
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self) -> Result<()> {
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path).await.map_err(|e| {
                StratusError::State(StateError::LockFailed {
                    message: format!("Failed to delete lock file: {e}"),
                })
            })?;
        }
        Ok(())
    }

    /// Checks a record's stored version against the caller's expectation.
    fn check_version(
        snapshot: &StateSnapshot,
        logical_id: &str,
        expected_version: u64,
    ) -> Result<()> {
        let found = snapshot.get(logical_id).map_or(0, |r| r.version);
        if found != expected_version {
            return Err(StateError::VersionConflict {
                logical_id: logical_id.to_string(),
                expected: expected_version,
                found,
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<StateSnapshot>> {
        if !self.state_path.exists() {
            debug!("State file does not exist: {}", self.state_path.display());
            return Ok(None);
        }

        debug!("Loading state from: {}", self.state_path.display());
        self.read_snapshot().await
    }

    async fn init(&self, project: &str, environment: &str) -> Result<StateSnapshot> {
        let _guard = self.write_guard.lock().await;

        if let Some(existing) = self.read_snapshot().await? {
            return Ok(existing);
        }

        let snapshot = StateSnapshot::new(project, environment);
        self.write_snapshot(&snapshot).await?;
        info!("Initialized state for {project}/{environment}");
        Ok(snapshot)
    }

    async fn get(&self, logical_id: &str) -> Result<Option<ResourceRecord>> {
        Ok(self
            .read_snapshot()
            .await?
            .and_then(|s| s.get(logical_id).cloned()))
    }

    async fn commit(
        &self,
        record: ResourceRecord,
        expected_version: u64,
        entry: JournalEntry,
    ) -> Result<ResourceRecord> {
        let _guard = self.write_guard.lock().await;

        let mut snapshot = self
            .read_snapshot()
            .await?
            .ok_or_else(|| StateError::corrupted("State not initialized"))?;

        Self::check_version(&snapshot, &record.logical_id, expected_version)?;

        let mut committed = record;
        committed.version = expected_version + 1;
        committed.updated_at = chrono::Utc::now();

        let mut journal_entry = entry;
        journal_entry.version = committed.version;

        snapshot.set(committed.clone());
        self.write_snapshot(&snapshot).await?;
        self.append_journal(&journal_entry).await?;

        debug!(
            "Committed '{}' at version {}",
            committed.logical_id, committed.version
        );
        Ok(committed)
    }

    async fn remove(
        &self,
        logical_id: &str,
        expected_version: u64,
        entry: JournalEntry,
    ) -> Result<()> {
        let _guard = self.write_guard.lock().await;

        let Some(mut snapshot) = self.read_snapshot().await? else {
            return Ok(());
        };

        if snapshot.get(logical_id).is_none() {
            return Ok(());
        }

        Self::check_version(&snapshot, logical_id, expected_version)?;

        snapshot.remove(logical_id);
        self.write_snapshot(&snapshot).await?;
        self.append_journal(&entry).await?;

        debug!("Removed record '{logical_id}'");
        Ok(())
    }

    async fn journal(&self, limit: usize) -> Result<Vec<JournalEntry>> {
        if !self.journal_path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.journal_path)
            .await
            .map_err(|e| StateError::corrupted(format!("Failed to read journal: {e}")))?;

        let mut entries = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let entry: JournalEntry = serde_json::from_str(line)
                .map_err(|e| StateError::corrupted(format!("Failed to parse journal entry: {e}")))?;
            entries.push(entry);
        }

        if limit > 0 && entries.len() > limit {
            entries.drain(..entries.len() - limit);
        }
        Ok(entries)
    }

    async fn delete_all(&self) -> Result<()> {
        let _guard = self.write_guard.lock().await;

        for path in [&self.state_path, &self.journal_path] {
            if path.exists() {
                info!("Deleting state file: {}", path.display());
                fs::remove_file(path)
                    .await
                    .map_err(|e| StateError::write(format!("Failed to delete state file: {e}")))?;
            }
        }

        self.delete_lock_file().await?;

        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.state_path.exists())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let _guard = self.write_guard.lock().await;

        // Check for existing lock
        if let Some(existing) = self.read_lock_file().await? {
            if !existing.is_expired() {
                return Err(StratusError::State(StateError::LockedByOther {
                    holder: existing.holder.clone(),
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            // Lock is expired, we can take it
            debug!("Expired lock found, taking over");
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let lock_info = LockInfo::new(&holder_id);
        self.write_lock_file(&lock_info).await?;

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        let _guard = self.write_guard.lock().await;

        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
                info!("Released state lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    async fn is_locked(&self) -> Result<bool> {
        if let Some(lock_info) = self.read_lock_file().await? {
            return Ok(!lock_info.is_expired());
        }
        Ok(false)
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceKind;
    use crate::state::types::{ResourceStatus, StateOperation};
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp_dir.path());
        (store, temp_dir)
    }

    fn test_record(logical_id: &str) -> ResourceRecord {
        let mut record = ResourceRecord::new(logical_id, ResourceKind::Network, "hash");
        record.remote_id = Some(format!("r-{logical_id}"));
        record.set_status(ResourceStatus::Created);
        record
    }

    #[tokio::test]
    async fn test_init_and_load() {
        let (store, _temp) = create_test_store();

        store.init("test-project", "dev").await.expect("init failed");

        let loaded = store
            .load()
            .await
            .expect("Failed to load state")
            .expect("State should exist");

        assert_eq!(loaded.project, "test-project");
        assert_eq!(loaded.environment, "dev");
        assert!(loaded.resources.is_empty());
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = create_test_store();

        let result = store.load().await.expect("Load should not fail");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_commit_bumps_version() {
        let (store, _temp) = create_test_store();
        store.init("p", "dev").await.expect("init failed");

        let record = test_record("net");
        let entry = JournalEntry::success(StateOperation::Create, &record);
        let committed = store.commit(record, 0, entry).await.expect("commit failed");

        assert_eq!(committed.version, 1);

        let fetched = store
            .get("net")
            .await
            .expect("get failed")
            .expect("record should exist");
        assert_eq!(fetched.version, 1);
        assert_eq!(fetched.remote_id.as_deref(), Some("r-net"));
    }

    #[tokio::test]
    async fn test_commit_rejects_stale_version() {
        let (store, _temp) = create_test_store();
        store.init("p", "dev").await.expect("init failed");

        let record = test_record("net");
        let entry = JournalEntry::success(StateOperation::Create, &record);
        store
            .commit(record.clone(), 0, entry.clone())
            .await
            .expect("first commit failed");

        // Second writer with the same expectation loses
        let err = store.commit(record, 0, entry).await.expect_err("should conflict");
        assert!(err.to_string().contains("Concurrent modification"));
    }

    #[tokio::test]
    async fn test_remove_record() {
        let (store, _temp) = create_test_store();
        store.init("p", "dev").await.expect("init failed");

        let record = test_record("net");
        let entry = JournalEntry::success(StateOperation::Create, &record);
        let committed = store.commit(record, 0, entry).await.expect("commit failed");

        let delete_entry = JournalEntry::success(StateOperation::Delete, &committed);
        store
            .remove("net", committed.version, delete_entry)
            .await
            .expect("remove failed");

        assert!(store.get("net").await.expect("get failed").is_none());
    }

    #[tokio::test]
    async fn test_journal_accumulates() {
        let (store, _temp) = create_test_store();
        store.init("p", "dev").await.expect("init failed");

        let record = test_record("a");
        let entry = JournalEntry::success(StateOperation::Create, &record);
        let committed = store.commit(record, 0, entry).await.expect("commit failed");

        let mut updated = committed.clone();
        updated.set_status(ResourceStatus::Updated);
        let entry = JournalEntry::success(StateOperation::Update, &updated);
        store
            .commit(updated, committed.version, entry)
            .await
            .expect("second commit failed");

        let entries = store.journal(0).await.expect("journal read failed");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].operation, StateOperation::Create);
        assert_eq!(entries[1].operation, StateOperation::Update);
        assert_eq!(entries[1].version, 2);

        let limited = store.journal(1).await.expect("journal read failed");
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].operation, StateOperation::Update);
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store
            .acquire_lock("test-holder")
            .await
            .expect("Failed to acquire lock");

        assert!(store.is_locked().await.expect("is_locked failed"));

        store
            .release_lock(&lock.lock_id)
            .await
            .expect("Failed to release lock");

        assert!(!store.is_locked().await.expect("is_locked failed"));
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let (store, _temp) = create_test_store();

        let _lock1 = store
            .acquire_lock("holder-1")
            .await
            .expect("Failed to acquire first lock");

        let result = store.acquire_lock("holder-2").await;
        assert!(result.is_err());
    }
}
