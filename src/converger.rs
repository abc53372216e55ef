//! Convergence orchestration.
//!
//! Ties the pieces together for a run: validate the stack, build the graph,
//! refresh stale records from the provider, plan the change set, and hand it
//! to the executor under the state lock. This is the layer the CLI calls.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{SpecValidator, StackConfig};
use crate::engine::{ApplyEngine, ApplyReport, CancelToken, RetryPolicy};
use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::planner::{ChangeSet, Planner};
use crate::provider::{Attributes, CloudProvider};
use crate::state::{
    generate_holder_id, JournalEntry, StateOperation, StateSnapshot, StateStore,
};

/// Orchestrates plan, apply, and destroy runs for a stack.
pub struct Converger {
    config: StackConfig,
    provider: Arc<dyn CloudProvider>,
    store: Arc<dyn StateStore>,
    cancel: CancelToken,
}

impl Converger {
    /// Creates a new converger.
    #[must_use]
    pub fn new(
        config: StackConfig,
        provider: Arc<dyn CloudProvider>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            config,
            provider,
            store,
            cancel: CancelToken::new(),
        }
    }

    /// Sets the cancellation token observed by apply and destroy runs.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The stack configuration this converger operates on.
    #[must_use]
    pub const fn config(&self) -> &StackConfig {
        &self.config
    }

    /// Validates the stack and builds the dependency graph.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for schema violations, dangling references,
    /// or dependency cycles.
    pub fn validate(&self) -> Result<DependencyGraph> {
        SpecValidator::validate(&self.config)?;
        DependencyGraph::build(&self.config)
    }

    /// Computes the change set for the current stack without executing it.
    ///
    /// Records older than the refresh grace window are re-read from the
    /// provider first, so drift and out-of-band deletions are planned
    /// against reality rather than a stale cache.
    ///
    /// # Errors
    ///
    /// Returns an error on validation failure or when state or provider
    /// reads fail.
    pub async fn plan(&self) -> Result<ChangeSet> {
        let graph = self.validate()?;
        let snapshot = self.load_or_init().await?;
        let observed = self.refresh(&snapshot).await?;

        Planner::new().plan(&self.config, &graph, &snapshot, &observed)
    }

    /// Plans and applies the stack under the state lock.
    ///
    /// # Errors
    ///
    /// Returns an error when the lock cannot be acquired or planning fails.
    /// Per-resource failures are reported in the [`ApplyReport`].
    pub async fn apply(&self) -> Result<(ChangeSet, ApplyReport)> {
        let lock = self.store.acquire_lock(&generate_holder_id()).await?;

        let outcome = async {
            let changeset = self.plan().await?;
            let report = self.execute(&changeset).await?;
            Ok::<_, crate::error::StratusError>((changeset, report))
        }
        .await;

        self.store.release_lock(&lock.lock_id).await?;
        outcome
    }

    /// Executes an already-planned change set under the state lock.
    ///
    /// # Errors
    ///
    /// Returns an error when the lock cannot be acquired.
    pub async fn apply_changeset(&self, changeset: &ChangeSet) -> Result<ApplyReport> {
        let lock = self.store.acquire_lock(&generate_holder_id()).await?;
        let outcome = self.execute(changeset).await;
        self.store.release_lock(&lock.lock_id).await?;
        outcome
    }

    /// Deletes every tracked resource in reverse dependency order.
    ///
    /// # Errors
    ///
    /// Returns an error when the lock cannot be acquired or state cannot be
    /// read.
    pub async fn destroy(&self) -> Result<(ChangeSet, ApplyReport)> {
        let lock = self.store.acquire_lock(&generate_holder_id()).await?;

        let outcome = async {
            let snapshot = self.load_or_init().await?;
            let changeset = Planner::plan_destroy(&snapshot);
            let report = self.execute(&changeset).await?;
            Ok::<_, crate::error::StratusError>((changeset, report))
        }
        .await;

        self.store.release_lock(&lock.lock_id).await?;
        outcome
    }

    /// Runs the engine over a change set.
    async fn execute(&self, changeset: &ChangeSet) -> Result<ApplyReport> {
        // The engine consumes entries; rebuild an owned change set
        let owned = ChangeSet {
            entries: changeset.entries.clone(),
            creates: changeset.creates,
            updates: changeset.updates,
            replaces: changeset.replaces,
            deletes: changeset.deletes,
            unchanged: changeset.unchanged,
        };

        let engine = ApplyEngine::new(Arc::clone(&self.provider), Arc::clone(&self.store))
            .with_policy(RetryPolicy::from_run_config(&self.config.run))
            .with_concurrency(self.config.run.concurrency)
            .with_labels(self.labels())
            .with_cancel_token(self.cancel.clone());

        engine.apply(owned).await
    }

    /// Labels stamped onto every created resource.
    fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(
            String::from("stratus:project"),
            self.config.project.name.clone(),
        );
        labels.insert(
            String::from("stratus:environment"),
            self.config.project.environment.clone(),
        );
        labels
    }

    /// Loads the snapshot, initializing an empty one on first use.
    async fn load_or_init(&self) -> Result<StateSnapshot> {
        if let Some(snapshot) = self.store.load().await? {
            return Ok(snapshot);
        }
        self.store
            .init(&self.config.project.name, &self.config.project.environment)
            .await
    }

    /// Re-reads stale records from the provider.
    ///
    /// Returns the observed attributes per logical id: `Some(attrs)` for a
    /// live remote resource, `None` when the provider reports it gone.
    /// Records refreshed within the grace window are trusted and not
    /// re-read.
    async fn refresh(
        &self,
        snapshot: &StateSnapshot,
    ) -> Result<HashMap<String, Option<Attributes>>> {
        let grace = self.config.run.refresh_grace_secs;
        let policy = RetryPolicy::from_run_config(&self.config.run);
        let mut observed = HashMap::new();

        for resource in &self.config.resources {
            let Some(record) = snapshot.get(&resource.id).filter(|r| r.is_tracked()) else {
                continue;
            };
            let Some(remote_id) = record.remote_id.as_deref() else {
                continue;
            };
            if record.is_fresh(grace) {
                debug!("Record '{}' is fresh, skipping remote read", resource.id);
                continue;
            }

            info!("Refreshing '{}' from provider", resource.id);
            // Reads get the same retry budget as mutations; a transient
            // outage during refresh must not abort the run
            let remote = policy
                .run("read", || {
                    let provider = Arc::clone(&self.provider);
                    let remote_id = remote_id.to_string();
                    let kind = record.kind;
                    async move { provider.read(kind, &remote_id).await }
                })
                .await?;

            // Persist the refresh so the grace window spans runs
            let mut refreshed = record.clone();
            refreshed.mark_refreshed();
            let journal = JournalEntry::success(StateOperation::Refresh, &refreshed);
            let _ = self
                .store
                .commit(refreshed, record.version, journal)
                .await?;

            observed.insert(resource.id.clone(), remote);
        }

        Ok(observed)
    }
}
