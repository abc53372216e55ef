//! Diff engine for comparing desired vs recorded and observed state.
//!
//! Desired attributes are compared against the record of the last apply to
//! detect configuration changes, and the observed remote attributes are
//! compared against what was last applied to detect drift. A change to an
//! immutable attribute escalates the action to a replace.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

use crate::config::{AttributeHasher, KindSchema, ResourceSpec};
use crate::provider::Attributes;
use crate::state::ResourceRecord;

/// Engine for computing per-resource diffs.
#[derive(Debug, Default)]
pub struct DiffEngine {
    /// Attribute hasher for the fast no-change path.
    hasher: AttributeHasher,
}

/// The action the executor must take for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Resource must be created.
    Create,
    /// Resource must be updated in place.
    Update,
    /// Resource must be deleted and recreated.
    Replace,
    /// Resource must be deleted.
    Delete,
    /// Resource is unchanged; kept for reporting.
    NoOp,
}

/// A single attribute-level difference.
#[derive(Debug, Clone, Serialize)]
pub struct AttributeDelta {
    /// Attribute name.
    pub name: String,
    /// Value before the change, if any.
    pub old_value: Option<Value>,
    /// Value after the change, if any.
    pub new_value: Option<Value>,
    /// Whether this attribute is immutable for the kind.
    pub forces_replace: bool,
    /// Whether the change was observed remotely rather than declared.
    pub drift: bool,
}

/// Difference for a single resource.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceDiff {
    /// Logical id.
    pub logical_id: String,
    /// Classified action.
    pub action: Action,
    /// Attribute-level differences.
    pub deltas: Vec<AttributeDelta>,
    /// Fingerprint recorded at last apply, if any.
    pub old_hash: Option<String>,
    /// Fingerprint of the desired attributes, if the resource is declared.
    pub new_hash: Option<String>,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: AttributeHasher::new(),
        }
    }

    /// Computes the diff for a declared resource.
    ///
    /// `record` is the state record from the last apply, `observed` the
    /// remote attributes (`None` when no read happened, `Some(None)` when the
    /// provider reported the resource gone).
    #[must_use]
    pub fn diff_resource(
        &self,
        spec: &ResourceSpec,
        record: Option<&ResourceRecord>,
        observed: Option<Option<&Attributes>>,
    ) -> ResourceDiff {
        let new_hash = self.hasher.hash_attributes(&spec.attributes);

        // No record tracking a remote resource: create from scratch. A
        // failed record that kept its remote id still counts; replanning it
        // as a create would orphan the remote resource.
        let Some(record) = record.filter(|r| r.is_tracked()) else {
            debug!("Resource {} needs to be created", spec.id);
            return ResourceDiff {
                logical_id: spec.id.clone(),
                action: Action::Create,
                deltas: Self::creation_deltas(spec),
                old_hash: None,
                new_hash: Some(new_hash),
            };
        };

        // Remote resource vanished out of band: recreate
        if observed == Some(None) {
            debug!("Resource {} missing remotely, recreating", spec.id);
            return ResourceDiff {
                logical_id: spec.id.clone(),
                action: Action::Create,
                deltas: Self::creation_deltas(spec),
                old_hash: Some(record.attributes_hash.clone()),
                new_hash: Some(new_hash),
            };
        }

        let schema = KindSchema::for_kind(spec.kind);
        let immutable = schema.immutable_attributes();

        let mut deltas = Vec::new();

        // Declared changes: desired vs what was declared at last apply
        if !AttributeHasher::hashes_match(&record.attributes_hash, &new_hash) {
            let names: BTreeSet<&String> = spec
                .attributes
                .keys()
                .chain(record.declared.keys())
                .collect();
            for name in names {
                let old_value = record.declared.get(name.as_str());
                let new_value = spec.attributes.get(name.as_str());
                if old_value != new_value {
                    deltas.push(AttributeDelta {
                        name: name.clone(),
                        old_value: old_value.cloned(),
                        new_value: new_value.cloned(),
                        forces_replace: immutable.contains(name.as_str()),
                        drift: false,
                    });
                }
            }
        }

        // Drift: remote attributes vs what was last applied
        if let Some(Some(remote)) = observed {
            for (name, applied) in &record.last_applied {
                let seen = remote.get(name);
                if seen != Some(applied) && !deltas.iter().any(|d| &d.name == name) {
                    deltas.push(AttributeDelta {
                        name: name.clone(),
                        old_value: seen.cloned(),
                        new_value: Some(applied.clone()),
                        forces_replace: immutable.contains(name.as_str()),
                        drift: true,
                    });
                }
            }
        }

        let action = if deltas.is_empty() {
            Action::NoOp
        } else if deltas.iter().any(|d| d.forces_replace) {
            Action::Replace
        } else {
            Action::Update
        };

        if action != Action::NoOp {
            debug!("Resource {} needs {action}", spec.id);
        }

        ResourceDiff {
            logical_id: spec.id.clone(),
            action,
            deltas,
            old_hash: Some(record.attributes_hash.clone()),
            new_hash: Some(new_hash),
        }
    }

    /// Builds the diff for a record with no matching declaration.
    #[must_use]
    pub fn diff_removed(record: &ResourceRecord) -> ResourceDiff {
        debug!("Resource {} removed from stack, deleting", record.logical_id);
        ResourceDiff {
            logical_id: record.logical_id.clone(),
            action: Action::Delete,
            deltas: record
                .declared
                .iter()
                .map(|(name, value)| AttributeDelta {
                    name: name.clone(),
                    old_value: Some(value.clone()),
                    new_value: None,
                    forces_replace: false,
                    drift: false,
                })
                .collect(),
            old_hash: Some(record.attributes_hash.clone()),
            new_hash: None,
        }
    }

    fn creation_deltas(spec: &ResourceSpec) -> Vec<AttributeDelta> {
        spec.attributes
            .iter()
            .map(|(name, value)| AttributeDelta {
                name: name.clone(),
                old_value: None,
                new_value: Some(value.clone()),
                forces_replace: false,
                drift: false,
            })
            .collect()
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.logical_id, self.action)?;
        if !self.deltas.is_empty() {
            write!(f, " (")?;
            for (i, delta) in self.deltas.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", delta.name)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceKind;
    use crate::state::ResourceStatus;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn attrs(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn spec(kind: ResourceKind, id: &str, attributes: BTreeMap<String, Value>) -> ResourceSpec {
        ResourceSpec {
            kind,
            id: id.to_string(),
            attributes,
            depends_on: vec![],
        }
    }

    fn record_for(spec: &ResourceSpec) -> ResourceRecord {
        let hasher = AttributeHasher::new();
        let mut record = ResourceRecord::new(
            &spec.id,
            spec.kind,
            &hasher.hash_attributes(&spec.attributes),
        );
        record.remote_id = Some(format!("r-{}", spec.id));
        record.declared = spec.attributes.clone();
        record.last_applied = spec.attributes.clone();
        record.set_status(ResourceStatus::Created);
        record
    }

    #[test]
    fn test_missing_record_is_create() {
        let engine = DiffEngine::new();
        let desired = spec(ResourceKind::Network, "net", attrs(&[("cidr", json!("10.0.0.0/16"))]));

        let diff = engine.diff_resource(&desired, None, None);
        assert_eq!(diff.action, Action::Create);
        assert_eq!(diff.deltas.len(), 1);
    }

    #[test]
    fn test_identical_is_noop() {
        let engine = DiffEngine::new();
        let desired = spec(ResourceKind::Network, "net", attrs(&[("cidr", json!("10.0.0.0/16"))]));
        let record = record_for(&desired);

        let diff = engine.diff_resource(&desired, Some(&record), None);
        assert_eq!(diff.action, Action::NoOp);
        assert!(diff.deltas.is_empty());
    }

    #[test]
    fn test_mutable_change_is_update() {
        let engine = DiffEngine::new();
        let old = spec(
            ResourceKind::Instance,
            "web",
            attrs(&[
                ("subnet", json!("${ref:sub}")),
                ("machine_type", json!("m.small")),
                ("image", json!("ubuntu-24.04")),
            ]),
        );
        let record = record_for(&old);

        let mut desired = old;
        desired
            .attributes
            .insert(String::from("machine_type"), json!("m.large"));

        let diff = engine.diff_resource(&desired, Some(&record), None);
        assert_eq!(diff.action, Action::Update);
        assert_eq!(diff.deltas.len(), 1);
        assert_eq!(diff.deltas[0].name, "machine_type");
        assert!(!diff.deltas[0].forces_replace);
    }

    #[test]
    fn test_immutable_change_is_replace() {
        let engine = DiffEngine::new();
        let old = spec(
            ResourceKind::Subnet,
            "sub",
            attrs(&[("cidr", json!("10.0.1.0/24")), ("network", json!("${ref:net}"))]),
        );
        let record = record_for(&old);

        let mut desired = old;
        desired.attributes.insert(String::from("cidr"), json!("10.0.2.0/24"));

        let diff = engine.diff_resource(&desired, Some(&record), None);
        assert_eq!(diff.action, Action::Replace);
        assert!(diff.deltas.iter().any(|d| d.forces_replace));
    }

    #[test]
    fn test_failed_record_with_remote_id_is_update_not_create() {
        // An update that failed leaves a Failed record still holding the
        // remote id; the next run must retry in place, not create a second
        // remote resource.
        let engine = DiffEngine::new();
        let old = spec(
            ResourceKind::Instance,
            "web",
            attrs(&[
                ("subnet", json!("${ref:sub}")),
                ("machine_type", json!("m.small")),
                ("image", json!("ubuntu-24.04")),
            ]),
        );
        let mut record = record_for(&old);
        record.set_status(ResourceStatus::Failed);

        let mut desired = old;
        desired
            .attributes
            .insert(String::from("machine_type"), json!("m.large"));

        let diff = engine.diff_resource(&desired, Some(&record), None);
        assert_eq!(diff.action, Action::Update);
    }

    #[test]
    fn test_vanished_remote_is_create() {
        let engine = DiffEngine::new();
        let desired = spec(ResourceKind::Network, "net", attrs(&[("cidr", json!("10.0.0.0/16"))]));
        let record = record_for(&desired);

        let diff = engine.diff_resource(&desired, Some(&record), Some(None));
        assert_eq!(diff.action, Action::Create);
    }

    #[test]
    fn test_drift_is_update() {
        let engine = DiffEngine::new();
        let desired = spec(
            ResourceKind::Instance,
            "web",
            attrs(&[
                ("subnet", json!("s-1")),
                ("machine_type", json!("m.small")),
                ("image", json!("ubuntu-24.04")),
            ]),
        );
        let record = record_for(&desired);

        // Remote shows a different machine type than we applied
        let remote = attrs(&[
            ("subnet", json!("s-1")),
            ("machine_type", json!("m.xlarge")),
            ("image", json!("ubuntu-24.04")),
        ]);

        let diff = engine.diff_resource(&desired, Some(&record), Some(Some(&remote)));
        assert_eq!(diff.action, Action::Update);
        assert!(diff.deltas[0].drift);
        assert_eq!(diff.deltas[0].new_value, Some(json!("m.small")));
    }

    #[test]
    fn test_removed_record_is_delete() {
        let desired = spec(ResourceKind::Network, "net", attrs(&[("cidr", json!("10.0.0.0/16"))]));
        let record = record_for(&desired);

        let diff = DiffEngine::diff_removed(&record);
        assert_eq!(diff.action, Action::Delete);
        assert_eq!(diff.logical_id, "net");
    }
}
