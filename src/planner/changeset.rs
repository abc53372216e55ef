//! Change set construction.
//!
//! The planner turns desired specs, state records, and observed remote
//! attributes into an ordered change set: deletes first in reverse
//! dependency order, then creates and updates in topological order. Each
//! entry carries the indices of the entries it is gated on, which is what
//! the executor uses to run independent branches concurrently.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::{ResourceKind, ResourceSpec, StackConfig};
use crate::error::{PlanError, Result};
use crate::graph::DependencyGraph;
use crate::provider::Attributes;
use crate::state::{ResourceRecord, StateSnapshot};

use super::diff::{Action, DiffEngine, ResourceDiff};

/// A single planned operation.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEntry {
    /// Logical id of the resource.
    pub logical_id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Action to take.
    pub action: Action,
    /// Attribute-level diff backing the action.
    pub diff: ResourceDiff,
    /// Desired spec; absent for deletes.
    pub spec: Option<ResourceSpec>,
    /// State record from the last apply; absent for fresh creates.
    pub record: Option<ResourceRecord>,
    /// Indices of entries that must reach a terminal state first.
    pub depends_on: Vec<usize>,
}

/// The complete ordered change set for one run.
#[derive(Debug, Default, Serialize)]
pub struct ChangeSet {
    /// Entries in execution order.
    pub entries: Vec<ChangeEntry>,
    /// Number of creates.
    pub creates: usize,
    /// Number of in-place updates.
    pub updates: usize,
    /// Number of replaces.
    pub replaces: usize,
    /// Number of deletes.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl ChangeSet {
    /// Returns true if any entry requires action.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.creates > 0 || self.updates > 0 || self.replaces > 0 || self.deletes > 0
    }

    /// Returns the total number of actionable entries.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.updates + self.replaces + self.deletes
    }

    /// Filters to entries that require action.
    #[must_use]
    pub fn actionable_entries(&self) -> Vec<&ChangeEntry> {
        self.entries
            .iter()
            .filter(|e| e.action != Action::NoOp)
            .collect()
    }

    fn tally(&mut self) {
        self.creates = self.count(Action::Create);
        self.updates = self.count(Action::Update);
        self.replaces = self.count(Action::Replace);
        self.deletes = self.count(Action::Delete);
        self.unchanged = self.count(Action::NoOp);
    }

    fn count(&self, action: Action) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }
}

/// Computes the change set for a run.
#[derive(Debug, Default)]
pub struct Planner {
    /// Per-resource diff engine.
    diff: DiffEngine,
}

impl Planner {
    /// Creates a new planner.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            diff: DiffEngine::new(),
        }
    }

    /// Plans the full change set for a stack.
    ///
    /// `observed` maps logical ids to the remote read result for resources
    /// that were refreshed this run: `Some(attrs)` for a live resource,
    /// `None` when the provider reported it gone.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry's dependency cannot be resolved to an
    /// entry index, which indicates a bug in graph construction.
    pub fn plan(
        &self,
        config: &StackConfig,
        graph: &DependencyGraph,
        snapshot: &StateSnapshot,
        observed: &HashMap<String, Option<Attributes>>,
    ) -> Result<ChangeSet> {
        let mut changeset = ChangeSet::default();

        // Records with no matching declaration are deleted first, dependents
        // before their dependencies.
        let removed = Self::removed_records(config, snapshot);
        let delete_order = Self::order_deletes(&removed);
        let mut entry_index: HashMap<String, usize> = HashMap::new();

        for record in &delete_order {
            let index = changeset.entries.len();
            let depends_on = Self::delete_gates(record, &delete_order, &entry_index);
            entry_index.insert(record.logical_id.clone(), index);
            changeset.entries.push(ChangeEntry {
                logical_id: record.logical_id.clone(),
                kind: record.kind,
                action: Action::Delete,
                diff: DiffEngine::diff_removed(record),
                spec: None,
                record: Some((*record).clone()),
                depends_on,
            });
        }

        // Declared resources in topological order
        for node in graph.topological_order() {
            let logical_id = graph.id_of(node);
            let Some(spec) = config.resource(logical_id) else {
                return Err(PlanError::DependencyResolutionFailed {
                    message: format!("Graph node '{logical_id}' has no declaration"),
                }
                .into());
            };

            let record = snapshot.get(logical_id);
            let remote = observed.get(logical_id).map(Option::as_ref);
            let diff = self.diff.diff_resource(spec, record, remote);

            let mut depends_on = Vec::new();
            for &dep in graph.dependencies_of(node) {
                let dep_id = graph.id_of(dep);
                let Some(&dep_index) = entry_index.get(dep_id) else {
                    return Err(PlanError::DependencyResolutionFailed {
                        message: format!("Dependency '{dep_id}' of '{logical_id}' not planned"),
                    }
                    .into());
                };
                depends_on.push(dep_index);
            }

            let index = changeset.entries.len();
            entry_index.insert(logical_id.to_string(), index);
            changeset.entries.push(ChangeEntry {
                logical_id: logical_id.to_string(),
                kind: spec.kind,
                action: diff.action,
                diff,
                spec: Some(spec.clone()),
                record: record.cloned(),
                depends_on,
            });
        }

        changeset.tally();
        info!(
            "Planned {} change(s): {} create, {} update, {} replace, {} delete",
            changeset.total_changes(),
            changeset.creates,
            changeset.updates,
            changeset.replaces,
            changeset.deletes
        );
        Ok(changeset)
    }

    /// Plans the destruction of every tracked resource, in reverse
    /// dependency order.
    #[must_use]
    pub fn plan_destroy(snapshot: &StateSnapshot) -> ChangeSet {
        let mut changeset = ChangeSet::default();

        let removed: Vec<&ResourceRecord> = snapshot
            .resources
            .values()
            .filter(|r| r.is_tracked())
            .collect();
        let delete_order = Self::order_deletes(&removed);
        let mut entry_index: HashMap<String, usize> = HashMap::new();

        for record in &delete_order {
            let index = changeset.entries.len();
            let depends_on = Self::delete_gates(record, &delete_order, &entry_index);
            entry_index.insert(record.logical_id.clone(), index);
            changeset.entries.push(ChangeEntry {
                logical_id: record.logical_id.clone(),
                kind: record.kind,
                action: Action::Delete,
                diff: DiffEngine::diff_removed(record),
                spec: None,
                record: Some((*record).clone()),
                depends_on,
            });
        }

        changeset.tally();
        debug!("Planned destruction of {} resource(s)", changeset.deletes);
        changeset
    }

    /// Collects tracked records with no matching declaration.
    fn removed_records<'a>(
        config: &StackConfig,
        snapshot: &'a StateSnapshot,
    ) -> Vec<&'a ResourceRecord> {
        snapshot
            .resources
            .values()
            .filter(|r| r.is_tracked() && config.resource(&r.logical_id).is_none())
            .collect()
    }

    /// Orders records for deletion: dependents before dependencies, ties by
    /// logical id for determinism.
    fn order_deletes<'a>(records: &[&'a ResourceRecord]) -> Vec<&'a ResourceRecord> {
        let index: HashMap<&str, usize> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.logical_id.as_str(), i))
            .collect();

        // dependents_left[i] counts records in the set that depend on i
        let mut dependents_left = vec![0usize; records.len()];
        for record in records {
            for dep in &record.depends_on {
                if let Some(&i) = index.get(dep.as_str()) {
                    dependents_left[i] += 1;
                }
            }
        }

        let mut ready: Vec<usize> = (0..records.len())
            .filter(|&i| dependents_left[i] == 0)
            .collect();
        // Descending so pop() yields the smallest id first
        ready.sort_by(|&a, &b| records[b].logical_id.cmp(&records[a].logical_id));

        let mut order = Vec::with_capacity(records.len());
        while let Some(i) = ready.pop() {
            order.push(records[i]);
            for dep in &records[i].depends_on {
                if let Some(&j) = index.get(dep.as_str()) {
                    dependents_left[j] -= 1;
                    if dependents_left[j] == 0 {
                        ready.push(j);
                        ready.sort_by(|&a, &b| {
                            records[b].logical_id.cmp(&records[a].logical_id)
                        });
                    }
                }
            }
        }

        // Recorded dependency cycles cannot happen for records written by
        // this engine; fall back to raw order if one slips in
        if order.len() != records.len() {
            for record in records {
                if !order.iter().any(|r| r.logical_id == record.logical_id) {
                    order.push(record);
                }
            }
        }
        order
    }

    /// A delete is gated on the deletes of its dependents.
    fn delete_gates(
        record: &ResourceRecord,
        delete_order: &[&ResourceRecord],
        entry_index: &HashMap<String, usize>,
    ) -> Vec<usize> {
        delete_order
            .iter()
            .filter(|other| other.depends_on.contains(&record.logical_id))
            .filter_map(|other| entry_index.get(&other.logical_id).copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AttributeHasher, ProjectConfig, ProviderConfig, RunConfig, StateConfig};
    use crate::state::ResourceStatus;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn spec(kind: ResourceKind, id: &str, attrs: &[(&str, serde_json::Value)], deps: &[&str]) -> ResourceSpec {
        ResourceSpec {
            kind,
            id: id.to_string(),
            attributes: attrs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
            depends_on: deps.iter().map(|d| (*d).to_string()).collect(),
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

    fn applied_record(spec: &ResourceSpec) -> ResourceRecord {
        let hasher = AttributeHasher::new();
        let mut record = ResourceRecord::new(
            &spec.id,
            spec.kind,
            &hasher.hash_attributes(&spec.attributes),
        );
        record.remote_id = Some(format!("r-{}", spec.id));
        record.declared = spec.attributes.clone();
        record.last_applied = spec.attributes.clone();
        record.depends_on = spec.referenced_ids();
        record.set_status(ResourceStatus::Created);
        record
    }

    fn three_tier() -> StackConfig {
        stack(vec![
            spec(ResourceKind::Network, "n1", &[("cidr", json!("10.0.0.0/16"))], &[]),
            spec(
                ResourceKind::Subnet,
                "s1",
                &[("cidr", json!("10.0.1.0/24")), ("network", json!("${ref:n1}"))],
                &[],
            ),
            spec(
                ResourceKind::Instance,
                "i1",
                &[
                    ("subnet", json!("${ref:s1}")),
                    ("machine_type", json!("m.small")),
                    ("image", json!("ubuntu-24.04")),
                ],
                &[],
            ),
        ])
    }

    #[test]
    fn test_empty_state_plans_creates_in_order() {
        let config = three_tier();
        let graph = DependencyGraph::build(&config).expect("acyclic");
        let snapshot = StateSnapshot::new("test", "dev");

        let planner = Planner::new();
        let changeset = planner
            .plan(&config, &graph, &snapshot, &HashMap::new())
            .expect("plan failed");

        let order: Vec<&str> = changeset.entries.iter().map(|e| e.logical_id.as_str()).collect();
        assert_eq!(order, vec!["n1", "s1", "i1"]);
        assert!(changeset.entries.iter().all(|e| e.action == Action::Create));
        assert_eq!(changeset.creates, 3);

        // i1 gated on s1, s1 gated on n1
        assert_eq!(changeset.entries[1].depends_on, vec![0]);
        assert_eq!(changeset.entries[2].depends_on, vec![1]);
    }

    #[test]
    fn test_second_run_plans_nothing() {
        let config = three_tier();
        let graph = DependencyGraph::build(&config).expect("acyclic");
        let mut snapshot = StateSnapshot::new("test", "dev");
        for resource in &config.resources {
            snapshot.set(applied_record(resource));
        }

        let planner = Planner::new();
        let changeset = planner
            .plan(&config, &graph, &snapshot, &HashMap::new())
            .expect("plan failed");

        assert!(!changeset.has_changes());
        assert_eq!(changeset.unchanged, 3);
    }

    #[test]
    fn test_removed_resources_deleted_in_reverse_order() {
        let full = three_tier();
        let mut snapshot = StateSnapshot::new("test", "dev");
        for resource in &full.resources {
            snapshot.set(applied_record(resource));
        }

        // Drop s1 and i1 from the declaration
        let trimmed = stack(vec![full.resources[0].clone()]);
        let graph = DependencyGraph::build(&trimmed).expect("acyclic");

        let planner = Planner::new();
        let changeset = planner
            .plan(&trimmed, &graph, &snapshot, &HashMap::new())
            .expect("plan failed");

        let deletes: Vec<&str> = changeset
            .entries
            .iter()
            .filter(|e| e.action == Action::Delete)
            .map(|e| e.logical_id.as_str())
            .collect();
        assert_eq!(deletes, vec!["i1", "s1"]);
        assert_eq!(changeset.deletes, 2);

        // s1's delete is gated on i1's delete
        let s1 = changeset
            .entries
            .iter()
            .position(|e| e.logical_id == "s1")
            .expect("s1 planned");
        let i1 = changeset
            .entries
            .iter()
            .position(|e| e.logical_id == "i1")
            .expect("i1 planned");
        assert_eq!(changeset.entries[s1].depends_on, vec![i1]);
    }

    #[test]
    fn test_destroy_plans_everything_in_reverse() {
        let config = three_tier();
        let mut snapshot = StateSnapshot::new("test", "dev");
        for resource in &config.resources {
            snapshot.set(applied_record(resource));
        }

        let changeset = Planner::plan_destroy(&snapshot);
        let order: Vec<&str> = changeset.entries.iter().map(|e| e.logical_id.as_str()).collect();
        assert_eq!(order, vec!["i1", "s1", "n1"]);
        assert_eq!(changeset.deletes, 3);
    }

    #[test]
    fn test_destroy_includes_failed_record_with_remote_id() {
        // A failed update keeps its remote id; destroy must still delete it.
        let config = three_tier();
        let mut snapshot = StateSnapshot::new("test", "dev");
        let mut record = applied_record(&config.resources[0]);
        record.set_status(ResourceStatus::Failed);
        snapshot.set(record);

        let changeset = Planner::plan_destroy(&snapshot);
        assert_eq!(changeset.deletes, 1);
        assert_eq!(changeset.entries[0].logical_id, "n1");
        assert_eq!(changeset.entries[0].action, Action::Delete);
    }

    #[test]
    fn test_undeclared_failed_record_plans_delete() {
        let config = three_tier();
        let mut snapshot = StateSnapshot::new("test", "dev");
        for resource in &config.resources {
            snapshot.set(applied_record(resource));
        }
        let mut extra = applied_record(&spec(
            ResourceKind::Database,
            "db",
            &[("engine", json!("postgres")), ("network", json!("${ref:n1}"))],
            &[],
        ));
        extra.set_status(ResourceStatus::Failed);
        snapshot.set(extra);

        let graph = DependencyGraph::build(&config).expect("acyclic");
        let planner = Planner::new();
        let changeset = planner
            .plan(&config, &graph, &snapshot, &HashMap::new())
            .expect("plan failed");

        assert_eq!(changeset.deletes, 1);
        let entry = changeset
            .entries
            .iter()
            .find(|e| e.logical_id == "db")
            .expect("db planned");
        assert_eq!(entry.action, Action::Delete);
    }

    #[test]
    fn test_changed_attribute_plans_update() {
        let mut config = three_tier();
        let mut snapshot = StateSnapshot::new("test", "dev");
        for resource in &config.resources {
            snapshot.set(applied_record(resource));
        }

        config.resources[2]
            .attributes
            .insert(String::from("machine_type"), json!("m.large"));
        let graph = DependencyGraph::build(&config).expect("acyclic");

        let planner = Planner::new();
        let changeset = planner
            .plan(&config, &graph, &snapshot, &HashMap::new())
            .expect("plan failed");

        assert_eq!(changeset.updates, 1);
        assert_eq!(changeset.unchanged, 2);
        let entry = changeset
            .entries
            .iter()
            .find(|e| e.logical_id == "i1")
            .expect("i1 planned");
        assert_eq!(entry.action, Action::Update);
    }
}
