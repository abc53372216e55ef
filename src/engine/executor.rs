//! Concurrent change set executor.
//!
//! Entries run as tokio tasks, bounded by the configured worker limit.
//! An entry is scheduled only once every entry it is gated on has applied,
//! so independent graph branches proceed in parallel while chains stay
//! sequential. A failure marks the resource failed, skips its transitive
//! dependents, and leaves the other branches running; cancellation stops
//! scheduling immediately but lets in-flight operations finish.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{interpolate_attributes, ResourceKind, ResourceSpec};
use crate::error::{PlanError, Result, StateError, StratusError};
use crate::planner::{Action, ChangeEntry, ChangeSet};
use crate::provider::{Attributes, CloudProvider};
use crate::state::{JournalEntry, ResourceRecord, ResourceStatus, StateOperation, StateStore};

use super::report::{ApplyReport, EntryResult, Outcome, SkipReason};
use super::retry::RetryPolicy;

/// Cooperative cancellation signal for a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a fresh token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. In-flight operations finish; nothing new
    /// starts.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Scheduling state of a change set entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// What a finished task hands back to the scheduler.
struct TaskOutput {
    index: usize,
    attempts: u32,
    duration_ms: u64,
    result: Result<Option<String>>,
}

/// Static entry metadata the scheduler keeps after handing the entry to a
/// task.
struct EntryMeta {
    logical_id: String,
    kind: ResourceKind,
    action: Action,
    depends_on: Vec<usize>,
}

/// Concurrent executor for change sets.
pub struct ApplyEngine {
    provider: Arc<dyn CloudProvider>,
    store: Arc<dyn StateStore>,
    policy: RetryPolicy,
    concurrency: usize,
    labels: BTreeMap<String, String>,
    cancel: CancelToken,
}

impl ApplyEngine {
    /// Creates a new engine.
    #[must_use]
    pub fn new(provider: Arc<dyn CloudProvider>, store: Arc<dyn StateStore>) -> Self {
        Self {
            provider,
            store,
            policy: RetryPolicy::default(),
            concurrency: 4,
            labels: BTreeMap::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the worker limit.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets labels applied to every created resource.
    #[must_use]
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// Sets the cancellation token observed between scheduling steps.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Executes a change set and reports every entry's terminal outcome.
    ///
    /// # Errors
    ///
    /// Returns an error only for engine-level faults (state store
    /// inaccessible at startup). Per-resource failures are reported in the
    /// [`ApplyReport`], not raised.
    pub async fn apply(&self, changeset: ChangeSet) -> Result<ApplyReport> {
        let mut report = ApplyReport::default();
        if changeset.entries.is_empty() {
            return Ok(report);
        }

        info!(
            "Applying {} entries ({} actionable) with concurrency {}",
            changeset.entries.len(),
            changeset.total_changes(),
            self.concurrency
        );

        // Remote ids known before the run: anything already in state
        let mut resolved: HashMap<String, String> = changeset
            .entries
            .iter()
            .filter_map(|e| {
                e.record
                    .as_ref()
                    .and_then(|r| r.remote_id.clone())
                    .map(|id| (e.logical_id.clone(), id))
            })
            .collect();

        let meta: Vec<EntryMeta> = changeset
            .entries
            .iter()
            .map(|e| EntryMeta {
                logical_id: e.logical_id.clone(),
                kind: e.kind,
                action: e.action,
                depends_on: e.depends_on.clone(),
            })
            .collect();
        let mut entries: Vec<Option<ChangeEntry>> =
            changeset.entries.into_iter().map(Some).collect();

        let mut slots = vec![Slot::Pending; meta.len()];
        let mut join_set: JoinSet<TaskOutput> = JoinSet::new();

        loop {
            self.propagate_skips(&meta, &mut slots, &mut report);

            if self.cancel.is_cancelled() {
                self.skip_cancelled(&meta, &mut slots, &mut report);
            } else {
                self.schedule_ready(&meta, &mut slots, &mut entries, &resolved, &mut join_set);
            }

            let Some(joined) = join_set.join_next().await else {
                // Nothing is running. Scheduling just ran, so any entry
                // still pending here has no path to readiness.
                if slots.iter().any(|s| *s == Slot::Pending) {
                    error!("Scheduler stalled with pending entries; aborting run");
                }
                break;
            };

            let output = match joined {
                Ok(output) => output,
                Err(e) => {
                    error!("Executor task panicked: {e}");
                    continue;
                }
            };
            self.reap(output, &meta, &mut slots, &mut resolved, &mut report);
        }

        report.cancelled = self.cancel.is_cancelled();
        info!(
            "Run finished: {} applied, {} unchanged, {} failed, {} skipped",
            report.applied, report.unchanged, report.failed, report.skipped
        );
        Ok(report)
    }

    /// Marks entries whose gates failed or were skipped, repeating until no
    /// more propagation happens.
    fn propagate_skips(&self, meta: &[EntryMeta], slots: &mut [Slot], report: &mut ApplyReport) {
        loop {
            let mut changed = false;
            for i in 0..meta.len() {
                if slots[i] != Slot::Pending {
                    continue;
                }
                let blocked = meta[i]
                    .depends_on
                    .iter()
                    .find(|&&dep| matches!(slots[dep], Slot::Failed | Slot::Skipped));
                if let Some(&dep) = blocked {
                    slots[i] = Slot::Skipped;
                    warn!(
                        "Skipping '{}': dependency '{}' did not apply",
                        meta[i].logical_id, meta[dep].logical_id
                    );
                    report.record(EntryResult {
                        logical_id: meta[i].logical_id.clone(),
                        kind: meta[i].kind,
                        action: meta[i].action,
                        outcome: Outcome::Skipped {
                            reason: SkipReason::DependencyFailed(meta[dep].logical_id.clone()),
                        },
                        attempts: 0,
                        duration_ms: 0,
                    });
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Marks every unstarted entry skipped after cancellation.
    fn skip_cancelled(&self, meta: &[EntryMeta], slots: &mut [Slot], report: &mut ApplyReport) {
        for i in 0..meta.len() {
            if slots[i] == Slot::Pending {
                slots[i] = Slot::Skipped;
                report.record(EntryResult {
                    logical_id: meta[i].logical_id.clone(),
                    kind: meta[i].kind,
                    action: meta[i].action,
                    outcome: Outcome::Skipped {
                        reason: SkipReason::Cancelled,
                    },
                    attempts: 0,
                    duration_ms: 0,
                });
            }
        }
    }

    /// Spawns every ready entry up to the worker limit.
    fn schedule_ready(
        &self,
        meta: &[EntryMeta],
        slots: &mut [Slot],
        entries: &mut [Option<ChangeEntry>],
        resolved: &HashMap<String, String>,
        join_set: &mut JoinSet<TaskOutput>,
    ) {
        for i in 0..meta.len() {
            if join_set.len() >= self.concurrency {
                break;
            }
            if slots[i] != Slot::Pending {
                continue;
            }
            let ready = meta[i]
                .depends_on
                .iter()
                .all(|&dep| slots[dep] == Slot::Succeeded);
            if !ready {
                continue;
            }
            let Some(entry) = entries[i].take() else {
                continue;
            };

            slots[i] = Slot::Running;
            debug!("Starting {} of '{}'", entry.action, entry.logical_id);

            let provider = Arc::clone(&self.provider);
            let store = Arc::clone(&self.store);
            let policy = self.policy;
            let labels = self.labels.clone();
            let snapshot = resolved.clone();
            join_set.spawn(async move {
                let started = Instant::now();
                let attempts = Arc::new(AtomicU32::new(0));
                let result = execute_entry(
                    provider,
                    store,
                    policy,
                    entry,
                    snapshot,
                    labels,
                    Arc::clone(&attempts),
                )
                .await;
                TaskOutput {
                    index: i,
                    attempts: attempts.load(Ordering::SeqCst),
                    duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    result,
                }
            });
        }
    }

    /// Processes one finished task.
    fn reap(
        &self,
        output: TaskOutput,
        meta: &[EntryMeta],
        slots: &mut [Slot],
        resolved: &mut HashMap<String, String>,
        report: &mut ApplyReport,
    ) {
        let m = &meta[output.index];
        match output.result {
            Ok(remote_id) => {
                slots[output.index] = Slot::Succeeded;
                if let Some(id) = remote_id {
                    resolved.insert(m.logical_id.clone(), id);
                }
                let outcome = if m.action == Action::NoOp {
                    Outcome::Unchanged
                } else {
                    info!("Applied {} of '{}'", m.action, m.logical_id);
                    Outcome::Applied
                };
                report.record(EntryResult {
                    logical_id: m.logical_id.clone(),
                    kind: m.kind,
                    action: m.action,
                    outcome,
                    attempts: output.attempts,
                    duration_ms: output.duration_ms,
                });
            }
            Err(e) => {
                slots[output.index] = Slot::Failed;
                error!("Failed to {} '{}': {e}", m.action, m.logical_id);
                report.record(EntryResult {
                    logical_id: m.logical_id.clone(),
                    kind: m.kind,
                    action: m.action,
                    outcome: Outcome::Failed {
                        error: e.to_string(),
                    },
                    attempts: output.attempts,
                    duration_ms: output.duration_ms,
                });
            }
        }
    }
}

/// Executes a single entry to its terminal state. Returns the remote id to
/// publish for reference resolution, if any.
async fn execute_entry(
    provider: Arc<dyn CloudProvider>,
    store: Arc<dyn StateStore>,
    policy: RetryPolicy,
    entry: ChangeEntry,
    resolved: HashMap<String, String>,
    labels: BTreeMap<String, String>,
    attempts: Arc<AtomicU32>,
) -> Result<Option<String>> {
    let result = match entry.action {
        Action::NoOp => Ok(entry
            .record
            .as_ref()
            .and_then(|r| r.remote_id.clone())),
        Action::Create | Action::Replace => {
            create_or_replace(&provider, &store, policy, &entry, &resolved, &labels, &attempts)
                .await
                .map(Some)
        }
        Action::Update => update(&provider, &store, policy, &entry, &resolved, &attempts).await,
        Action::Delete => delete(&provider, &store, policy, &entry, &attempts).await.map(|()| None),
    };

    if let Err(e) = &result {
        mark_failed(&store, &entry, e).await;
    }
    result
}

/// Resolves references in a spec's attributes against known remote ids.
fn resolve_attributes(
    spec: &ResourceSpec,
    resolved: &HashMap<String, String>,
) -> Result<Attributes> {
    interpolate_attributes(&spec.attributes, &|id| resolved.get(id).cloned()).map_err(|reference| {
        StratusError::Plan(PlanError::UnresolvedReference {
            reference,
            resource: spec.id.clone(),
        })
    })
}

async fn create_or_replace(
    provider: &Arc<dyn CloudProvider>,
    store: &Arc<dyn StateStore>,
    policy: RetryPolicy,
    entry: &ChangeEntry,
    resolved: &HashMap<String, String>,
    labels: &BTreeMap<String, String>,
    attempts: &Arc<AtomicU32>,
) -> Result<String> {
    let spec = entry
        .spec
        .as_ref()
        .ok_or_else(|| StratusError::internal("Create entry without a spec"))?;
    let attributes = resolve_attributes(spec, resolved)?;

    // A replace removes the old remote resource before creating its
    // successor; the create is gated on the delete finishing.
    if entry.action == Action::Replace {
        if let Some(old_id) = entry.record.as_ref().and_then(|r| r.remote_id.clone()) {
            let kind = spec.kind;
            policy
                .run("delete", || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    let provider = Arc::clone(provider);
                    let old_id = old_id.clone();
                    async move { provider.delete(kind, &old_id).await }
                })
                .await?;
        }
    }

    let kind = spec.kind;
    let remote_id = policy
        .run("create", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            let provider = Arc::clone(provider);
            let attributes = attributes.clone();
            async move { provider.create(kind, &attributes).await }
        })
        .await?;

    if !labels.is_empty() {
        // Best-effort: a missing label never fails the resource
        if let Err(e) = provider.tag(kind, &remote_id, labels).await {
            warn!("Failed to tag '{}': {e}", spec.id);
        }
    }

    let hasher = crate::config::AttributeHasher::new();
    let mut record = entry
        .record
        .clone()
        .unwrap_or_else(|| ResourceRecord::new(&spec.id, spec.kind, ""));
    record.kind = spec.kind;
    record.remote_id = Some(remote_id.clone());
    record.declared = spec.attributes.clone();
    record.last_applied = attributes;
    record.attributes_hash = hasher.hash_attributes(&spec.attributes);
    record.depends_on = spec.referenced_ids();
    record.set_status(ResourceStatus::Created);
    record.mark_refreshed();

    let operation = if entry.action == Action::Replace {
        StateOperation::Replace
    } else {
        StateOperation::Create
    };
    let journal = JournalEntry::success(operation, &record);
    let expected = entry.record.as_ref().map_or(0, |r| r.version);
    commit_with_reload(store, record, expected, journal).await?;

    Ok(remote_id)
}

async fn update(
    provider: &Arc<dyn CloudProvider>,
    store: &Arc<dyn StateStore>,
    policy: RetryPolicy,
    entry: &ChangeEntry,
    resolved: &HashMap<String, String>,
    attempts: &Arc<AtomicU32>,
) -> Result<Option<String>> {
    let spec = entry
        .spec
        .as_ref()
        .ok_or_else(|| StratusError::internal("Update entry without a spec"))?;
    let record = entry
        .record
        .as_ref()
        .ok_or_else(|| StratusError::internal("Update entry without a record"))?;
    let remote_id = record
        .remote_id
        .clone()
        .ok_or_else(|| StratusError::internal("Update entry without a remote id"))?;

    let attributes = resolve_attributes(spec, resolved)?;

    let kind = spec.kind;
    policy
        .run("update", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            let provider = Arc::clone(provider);
            let remote_id = remote_id.clone();
            let attributes = attributes.clone();
            async move { provider.update(kind, &remote_id, &attributes).await }
        })
        .await?;

    let hasher = crate::config::AttributeHasher::new();
    let mut updated = record.clone();
    updated.declared = spec.attributes.clone();
    updated.last_applied = attributes;
    updated.attributes_hash = hasher.hash_attributes(&spec.attributes);
    updated.depends_on = spec.referenced_ids();
    updated.set_status(ResourceStatus::Updated);
    updated.mark_refreshed();

    let journal = JournalEntry::success(StateOperation::Update, &updated);
    commit_with_reload(store, updated, record.version, journal).await?;

    Ok(Some(remote_id))
}

async fn delete(
    provider: &Arc<dyn CloudProvider>,
    store: &Arc<dyn StateStore>,
    policy: RetryPolicy,
    entry: &ChangeEntry,
    attempts: &Arc<AtomicU32>,
) -> Result<()> {
    let record = entry
        .record
        .as_ref()
        .ok_or_else(|| StratusError::internal("Delete entry without a record"))?;

    if let Some(remote_id) = record.remote_id.clone() {
        let kind = record.kind;
        policy
            .run("delete", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                let provider = Arc::clone(provider);
                let remote_id = remote_id.clone();
                async move { provider.delete(kind, &remote_id).await }
            })
            .await?;
    }

    let mut deleted = record.clone();
    deleted.set_status(ResourceStatus::Deleted);
    let journal = JournalEntry::success(StateOperation::Delete, &deleted);
    remove_with_reload(store, &record.logical_id, record.version, journal).await
}

/// Commits a record, reloading the stored version and retrying once on an
/// optimistic concurrency conflict.
async fn commit_with_reload(
    store: &Arc<dyn StateStore>,
    record: ResourceRecord,
    expected: u64,
    journal: JournalEntry,
) -> Result<ResourceRecord> {
    match store.commit(record.clone(), expected, journal.clone()).await {
        Err(StratusError::State(StateError::VersionConflict { found, .. })) => {
            warn!(
                "Version conflict committing '{}', retrying against version {found}",
                record.logical_id
            );
            store.commit(record, found, journal).await
        }
        other => other,
    }
}

/// Removes a record, reloading the stored version and retrying once on an
/// optimistic concurrency conflict.
async fn remove_with_reload(
    store: &Arc<dyn StateStore>,
    logical_id: &str,
    expected: u64,
    journal: JournalEntry,
) -> Result<()> {
    match store.remove(logical_id, expected, journal.clone()).await {
        Err(StratusError::State(StateError::VersionConflict { found, .. })) => {
            warn!("Version conflict removing '{logical_id}', retrying against version {found}");
            store.remove(logical_id, found, journal).await
        }
        other => other,
    }
}

/// Best-effort failure bookkeeping: record the failed status and journal the
/// error so the next plan sees it.
async fn mark_failed(store: &Arc<dyn StateStore>, entry: &ChangeEntry, error: &StratusError) {
    let mut record = entry.record.clone().unwrap_or_else(|| {
        ResourceRecord::new(
            &entry.logical_id,
            entry.kind,
            entry.diff.new_hash.as_deref().unwrap_or(""),
        )
    });
    record.set_status(ResourceStatus::Failed);

    let operation = match entry.action {
        Action::Create => StateOperation::Create,
        Action::Update => StateOperation::Update,
        Action::Replace => StateOperation::Replace,
        Action::Delete | Action::NoOp => StateOperation::Delete,
    };
    let journal = JournalEntry::failure(operation, &record, &error.to_string());
    let expected = record.version;
    if let Err(e) = commit_with_reload(store, record, expected, journal).await {
        warn!("Failed to record failure for '{}': {e}", entry.logical_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProjectConfig, ProviderConfig, RunConfig, StackConfig, StateConfig};
    use crate::error::ProviderError;
    use crate::graph::DependencyGraph;
    use crate::planner::Planner;
    use crate::provider::MemoryProvider;
    use crate::state::{LocalStateStore, StateSnapshot};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn spec(
        kind: ResourceKind,
        id: &str,
        attrs: &[(&str, serde_json::Value)],
    ) -> ResourceSpec {
        ResourceSpec {
            kind,
            id: id.to_string(),
            attributes: attrs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
            depends_on: vec![],
        }
    }

    fn stack(resources: Vec<ResourceSpec>) -> StackConfig {
        StackConfig {
            project: ProjectConfig {
                name: String::from("test"),
                environment: String::from("dev"),
                region: None,
            },
            state: StateConfig::default(),
            provider: ProviderConfig::default(),
            run: RunConfig::default(),
            resources,
        }
    }

    fn three_tier() -> StackConfig {
        stack(vec![
            spec(ResourceKind::Network, "n1", &[("cidr", json!("10.0.0.0/16"))]),
            spec(
                ResourceKind::Subnet,
                "s1",
                &[("cidr", json!("10.0.1.0/24")), ("network", json!("${ref:n1}"))],
            ),
            spec(
                ResourceKind::Instance,
                "i1",
                &[
                    ("subnet", json!("${ref:s1}")),
                    ("machine_type", json!("m.small")),
                    ("image", json!("ubuntu-24.04")),
                ],
            ),
        ])
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            operation_timeout: Duration::from_secs(5),
        }
    }

    async fn engine_fixture() -> (Arc<MemoryProvider>, Arc<LocalStateStore>, ApplyEngine, TempDir) {
        let temp = TempDir::new().expect("temp dir");
        let provider = Arc::new(MemoryProvider::new());
        let store = Arc::new(LocalStateStore::with_base_dir(temp.path()));
        store.init("test", "dev").await.expect("init state");

        let engine = ApplyEngine::new(
            Arc::clone(&provider) as Arc<dyn CloudProvider>,
            Arc::clone(&store) as Arc<dyn StateStore>,
        )
        .with_policy(fast_policy());

        (provider, store, engine, temp)
    }

    async fn plan_for(
        config: &StackConfig,
        store: &Arc<LocalStateStore>,
    ) -> crate::planner::ChangeSet {
        let graph = DependencyGraph::build(config).expect("acyclic");
        let snapshot = store
            .load()
            .await
            .expect("load state")
            .unwrap_or_else(|| StateSnapshot::new("test", "dev"));
        Planner::new()
            .plan(config, &graph, &snapshot, &HashMap::new())
            .expect("plan")
    }

    #[tokio::test]
    async fn test_apply_creates_chain_and_resolves_references() {
        let (provider, store, engine, _temp) = engine_fixture().await;
        let config = three_tier();

        let changeset = plan_for(&config, &store).await;
        let report = engine.apply(changeset).await.expect("apply");

        assert!(report.is_success());
        assert_eq!(report.applied, 3);
        assert_eq!(provider.resource_count(), 3);

        // The subnet's network attribute was substituted with a remote id
        let subnet = store
            .get("s1")
            .await
            .expect("get")
            .expect("s1 committed");
        let network = store.get("n1").await.expect("get").expect("n1 committed");
        assert_eq!(
            subnet.last_applied.get("network").and_then(|v| v.as_str()),
            network.remote_id.as_deref()
        );
        // Declared attributes keep the symbolic form
        assert_eq!(
            subnet.declared.get("network"),
            Some(&json!("${ref:n1}"))
        );
    }

    #[tokio::test]
    async fn test_second_apply_is_noop() {
        let (provider, store, engine, _temp) = engine_fixture().await;
        let config = three_tier();

        let changeset = plan_for(&config, &store).await;
        engine.apply(changeset).await.expect("first apply");
        let ops_after_first = provider.operation_count();

        let changeset = plan_for(&config, &store).await;
        assert!(!changeset.has_changes());
        let report = engine.apply(changeset).await.expect("second apply");

        assert!(report.is_success());
        assert_eq!(report.applied, 0);
        assert_eq!(report.unchanged, 3);
        // No remote calls happened on the no-op run
        assert_eq!(provider.operation_count(), ops_after_first);
    }

    #[tokio::test]
    async fn test_failure_skips_transitive_dependents() {
        let (provider, store, engine, _temp) = engine_fixture().await;
        let config = three_tier();

        // n1's create fails terminally on every attempt
        provider.inject_failure(ProviderError::InvalidAttribute {
            message: String::from("bad cidr"),
        });

        let changeset = plan_for(&config, &store).await;
        let report = engine.apply(changeset).await.expect("apply");

        assert!(!report.is_success());
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 2);

        let n1 = report.result_for("n1").expect("n1 reported");
        assert!(matches!(n1.outcome, Outcome::Failed { .. }));
        let s1 = report.result_for("s1").expect("s1 reported");
        assert_eq!(
            s1.outcome,
            Outcome::Skipped {
                reason: SkipReason::DependencyFailed(String::from("n1"))
            }
        );
        let i1 = report.result_for("i1").expect("i1 reported");
        assert!(matches!(i1.outcome, Outcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn test_independent_branch_survives_failure() {
        let (provider, store, engine, _temp) = engine_fixture().await;
        // Two independent networks; the first fails
        let config = stack(vec![
            spec(ResourceKind::Network, "bad", &[("cidr", json!("10.0.0.0/16"))]),
            spec(ResourceKind::Network, "good", &[("cidr", json!("10.1.0.0/16"))]),
        ]);
        // Run sequentially so the injected failure lands on 'bad'
        let engine = engine.with_concurrency(1);

        provider.inject_failure(ProviderError::InvalidAttribute {
            message: String::from("rejected"),
        });

        let changeset = plan_for(&config, &store).await;
        let report = engine.apply(changeset).await.expect("apply");

        assert!(report.is_partial());
        assert_eq!(report.applied, 1);
        assert_eq!(report.failed, 1);
        assert!(store.get("good").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn test_transient_failure_retried_to_success() {
        let (provider, store, engine, _temp) = engine_fixture().await;
        let config = stack(vec![spec(
            ResourceKind::Network,
            "n1",
            &[("cidr", json!("10.0.0.0/16"))],
        )]);

        provider.inject_failure(ProviderError::unavailable("hiccup"));

        let changeset = plan_for(&config, &store).await;
        let report = engine.apply(changeset).await.expect("apply");

        assert!(report.is_success());
        let n1 = report.result_for("n1").expect("n1 reported");
        assert_eq!(n1.attempts, 2);
    }

    #[tokio::test]
    async fn test_cancellation_skips_unstarted_entries() {
        let (_provider, store, engine, _temp) = engine_fixture().await;
        let config = three_tier();

        let cancel = CancelToken::new();
        cancel.cancel();
        let engine = engine.with_cancel_token(cancel);

        let changeset = plan_for(&config, &store).await;
        let report = engine.apply(changeset).await.expect("apply");

        assert!(report.cancelled);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.applied, 0);
    }

    #[tokio::test]
    async fn test_destroy_deletes_in_reverse_order() {
        let (provider, store, engine, _temp) = engine_fixture().await;
        let config = three_tier();

        let changeset = plan_for(&config, &store).await;
        engine.apply(changeset).await.expect("apply");
        assert_eq!(provider.resource_count(), 3);

        let snapshot = store.load().await.expect("load").expect("state exists");
        let destroy = Planner::plan_destroy(&snapshot);
        let report = engine.apply(destroy).await.expect("destroy");

        assert!(report.is_success());
        assert_eq!(report.applied, 3);
        assert_eq!(provider.resource_count(), 0);
        assert!(store.get("i1").await.expect("get").is_none());
        assert!(store.get("n1").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_update_changes_remote_attributes() {
        let (provider, store, engine, _temp) = engine_fixture().await;
        let mut config = three_tier();

        let changeset = plan_for(&config, &store).await;
        engine.apply(changeset).await.expect("first apply");

        config.resources[2]
            .attributes
            .insert(String::from("machine_type"), json!("m.large"));
        let changeset = plan_for(&config, &store).await;
        assert_eq!(changeset.updates, 1);

        let report = engine.apply(changeset).await.expect("second apply");
        assert!(report.is_success());

        let record = store.get("i1").await.expect("get").expect("i1 exists");
        let remote = provider
            .read(ResourceKind::Instance, record.remote_id.as_deref().expect("remote id"))
            .await
            .expect("read")
            .expect("instance exists");
        assert_eq!(remote.get("machine_type"), Some(&json!("m.large")));
    }
}
