//! Run locking.
//!
//! A convergence run holds the state lock for its full duration; a second
//! process attempting to plan or apply against the same stack fails fast
//! instead of corrupting state. Locks carry an expiry so a crashed run
//! cannot wedge the stack forever.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Seconds after which a lock may be taken over by another run.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// A held (or abandoned) state lock, as persisted in the lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique lock identifier, required to release the lock.
    pub lock_id: String,
    /// Identity of the run holding the lock.
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When another run may take the lock over.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a lock held by `holder` with the default expiry.
    #[must_use]
    pub fn new(holder: &str) -> Self {
        Self::with_expiry(holder, LOCK_EXPIRY_SECS)
    }

    /// Creates a lock with a custom expiry in seconds.
    #[must_use]
    pub fn with_expiry(holder: &str, expiry_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(expiry_secs),
        }
    }

    /// True once the expiry has passed and the lock may be taken over.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Pushes the expiry out by the default window.
    pub fn refresh(&mut self) {
        self.expires_at = Utc::now() + chrono::Duration::seconds(LOCK_EXPIRY_SECS);
    }

    /// Seconds until the lock expires, zero if it already has.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }

    /// Seconds since the lock was acquired.
    #[must_use]
    pub fn age_secs(&self) -> i64 {
        (Utc::now() - self.acquired_at).num_seconds().max(0)
    }
}

/// Builds a holder identity for the current process.
///
/// Combines hostname, pid, and a random suffix so lock files are traceable
/// to the machine and process that took them.
#[must_use]
pub fn generate_holder_id() -> String {
    let host = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());
    let suffix = &Uuid::new_v4().to_string()[..8];
    format!("{host}-{}-{suffix}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_lock_is_held() {
        let lock = LockInfo::new("runner-1");
        assert_eq!(lock.holder, "runner-1");
        assert!(!lock.is_expired());
        assert!(lock.remaining_secs() > 0);
        assert!(!lock.lock_id.is_empty());
    }

    #[test]
    fn test_zero_expiry_lock_can_be_taken_over() {
        let stale = LockInfo::with_expiry("crashed-run", -1);
        assert!(stale.is_expired());
        assert_eq!(stale.remaining_secs(), 0);
    }

    #[test]
    fn test_refresh_extends_expiry() {
        let mut lock = LockInfo::with_expiry("runner-1", 1);
        let before = lock.expires_at;
        lock.refresh();
        assert!(lock.expires_at > before);
    }

    #[test]
    fn test_holder_ids_are_distinct_and_traceable() {
        let a = generate_holder_id();
        let b = generate_holder_id();
        assert_ne!(a, b);
        assert!(a.contains(&std::process::id().to_string()));
    }
}
