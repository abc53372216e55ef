//! In-process provider backend.
//!
//! Holds resources in a map behind a mutex. Used by the test suite and by
//! offline experimentation; supports injecting failures and latency to
//! exercise the engine's retry and partial-failure paths.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::config::ResourceKind;
use crate::error::{ProviderError, Result, StratusError};

use super::api::{Attributes, CloudProvider};

/// A stored remote resource.
#[derive(Debug, Clone)]
struct StoredResource {
    kind: ResourceKind,
    attributes: Attributes,
    tags: BTreeMap<String, String>,
}

/// In-memory provider backend.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    /// Resources keyed by remote id.
    resources: Mutex<HashMap<String, StoredResource>>,
    /// Errors to return before succeeding, oldest first.
    injected_failures: Mutex<VecDeque<ProviderError>>,
    /// Artificial latency per operation, in milliseconds.
    latency_ms: AtomicU64,
    /// Monotonic id counter.
    next_id: AtomicU64,
    /// Number of operations attempted, including failed ones.
    operations: AtomicU64,
}

impl MemoryProvider {
    /// Creates a new empty in-memory provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an error to be returned by the next operation.
    pub fn inject_failure(&self, error: ProviderError) {
        if let Ok(mut failures) = self.injected_failures.lock() {
            failures.push_back(error);
        }
    }

    /// Sets artificial latency applied to every operation.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis().min(u128::from(u64::MAX)) as u64, Ordering::Relaxed);
    }

    /// Returns the number of operations attempted so far.
    #[must_use]
    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    /// Returns the number of live resources.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.resources.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Returns the remote ids of all live resources.
    #[must_use]
    pub fn remote_ids(&self) -> Vec<String> {
        self.resources
            .lock()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Overwrites a resource's attributes directly, simulating out-of-band
    /// drift.
    pub fn drift(&self, remote_id: &str, attributes: Attributes) {
        if let Ok(mut resources) = self.resources.lock() {
            if let Some(resource) = resources.get_mut(remote_id) {
                resource.attributes = attributes;
            }
        }
    }

    /// Runs the pre-operation hooks: latency and injected failures.
    async fn before_op(&self) -> Result<()> {
        self.operations.fetch_add(1, Ordering::Relaxed);

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let failure = self
            .injected_failures
            .lock()
            .ok()
            .and_then(|mut f| f.pop_front());
        if let Some(error) = failure {
            debug!("Returning injected failure: {error}");
            return Err(error.into());
        }
        Ok(())
    }
}

#[async_trait]
impl CloudProvider for MemoryProvider {
    async fn create(&self, kind: ResourceKind, attributes: &Attributes) -> Result<String> {
        self.before_op().await?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let remote_id = format!("{kind}-{id:04}");

        self.resources
            .lock()
            .map_err(|_| StratusError::internal("Provider state poisoned"))?
            .insert(
                remote_id.clone(),
                StoredResource {
                    kind,
                    attributes: attributes.clone(),
                    tags: BTreeMap::new(),
                },
            );

        debug!("Created {kind} as {remote_id}");
        Ok(remote_id)
    }

    async fn read(&self, kind: ResourceKind, remote_id: &str) -> Result<Option<Attributes>> {
        self.before_op().await?;

        let resources = self
            .resources
            .lock()
            .map_err(|_| StratusError::internal("Provider state poisoned"))?;
        Ok(resources
            .get(remote_id)
            .filter(|r| r.kind == kind)
            .map(|r| r.attributes.clone()))
    }

    async fn update(
        &self,
        kind: ResourceKind,
        remote_id: &str,
        attributes: &Attributes,
    ) -> Result<()> {
        self.before_op().await?;

        let mut resources = self
            .resources
            .lock()
            .map_err(|_| StratusError::internal("Provider state poisoned"))?;
        let Some(resource) = resources.get_mut(remote_id).filter(|r| r.kind == kind) else {
            return Err(StratusError::Provider(ProviderError::NotFound {
                remote_id: remote_id.to_string(),
            }));
        };
        resource.attributes = attributes.clone();
        Ok(())
    }

    async fn delete(&self, kind: ResourceKind, remote_id: &str) -> Result<()> {
        self.before_op().await?;

        let mut resources = self
            .resources
            .lock()
            .map_err(|_| StratusError::internal("Provider state poisoned"))?;
        // Deleting an already-gone resource is a no-op
        resources.retain(|id, r| !(id == remote_id && r.kind == kind));
        Ok(())
    }

    async fn tag(
        &self,
        kind: ResourceKind,
        remote_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.before_op().await?;

        let mut resources = self
            .resources
            .lock()
            .map_err(|_| StratusError::internal("Provider state poisoned"))?;
        let Some(resource) = resources.get_mut(remote_id).filter(|r| r.kind == kind) else {
            return Err(StratusError::Provider(ProviderError::NotFound {
                remote_id: remote_id.to_string(),
            }));
        };
        resource.tags.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
