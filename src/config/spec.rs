//! Stack specification types for the convergence engine.
//!
//! This module defines all the structs that map to the `stratus.stack.yaml`
//! file. These types are declarative and fully describe the desired state of
//! the infrastructure; they are immutable once planned for a given run.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// The root configuration structure for a Stratus stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Remote provider configuration.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Run-time tuning knobs (concurrency, retries, timeouts).
    #[serde(default)]
    pub run: RunConfig,
    /// Resources to converge, in declaration order.
    pub resources: Vec<ResourceSpec>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Provider region preference.
    #[serde(default)]
    pub region: Option<String>,
}

/// State backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: StateBackend,
    /// Local state directory (for the local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
}

/// Remote provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ProviderConfig {
    /// Provider backend type.
    #[serde(default)]
    pub backend: ProviderBackend,
    /// Base URL of the provider API (required for the http backend).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Per-request timeout in seconds for the HTTP client.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Provider backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderBackend {
    /// JSON-over-HTTP provider API.
    #[default]
    Http,
    /// In-process provider for tests and offline experimentation.
    Memory,
}

/// Run-time tuning for planning and execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunConfig {
    /// Maximum number of resources applied concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Maximum attempts per remote operation (including the first).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds, doubled on each retry.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Backoff ceiling in seconds.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Per-operation timeout in seconds.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,
    /// Grace window in seconds during which a cached provider read is trusted.
    #[serde(default = "default_refresh_grace")]
    pub refresh_grace_secs: u64,
}

/// Kinds of provisionable resources.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A virtual network.
    Network,
    /// A subnet within a network.
    Subnet,
    /// A firewall rule attached to a network.
    FirewallRule,
    /// A compute instance.
    Instance,
    /// A managed database.
    Database,
}

/// A single declared resource: kind, identity, desired attributes, and
/// references to other resources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceSpec {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Logical identifier, unique per kind within the stack.
    pub id: String,
    /// Desired attributes, validated against the per-kind schema.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    /// Explicit dependencies on other resources by logical id.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

// Default value functions

const fn default_concurrency() -> usize {
    4
}

const fn default_max_attempts() -> u32 {
    4
}

const fn default_base_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_secs() -> u64 {
    30
}

const fn default_operation_timeout() -> u64 {
    120
}

const fn default_refresh_grace() -> u64 {
    30
}

const fn default_request_timeout() -> u64 {
    30
}

fn default_environment() -> String {
    String::from("dev")
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_secs: default_max_backoff_secs(),
            operation_timeout_secs: default_operation_timeout(),
            refresh_grace_secs: default_refresh_grace(),
        }
    }
}

impl StackConfig {
    /// Returns the fully qualified project name including environment.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.project.name, self.project.environment)
    }

    /// Looks up a resource by logical id.
    #[must_use]
    pub fn resource(&self, logical_id: &str) -> Option<&ResourceSpec> {
        self.resources.iter().find(|r| r.id == logical_id)
    }

    /// Returns all logical ids in declaration order.
    #[must_use]
    pub fn logical_ids(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.id.as_str()).collect()
    }
}

impl ResourceSpec {
    /// Returns the resource address in `kind.logical_id` form.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}.{}", self.kind, self.id)
    }

    /// Returns all logical ids referenced by this resource: explicit
    /// `depends_on` entries plus implicit references embedded in attribute
    /// values.
    #[must_use]
    pub fn referenced_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.depends_on.clone();
        for value in self.attributes.values() {
            collect_refs(value, &mut ids);
        }
        // Full dedup preserving first-occurrence order; the same id can show
        // up in depends_on and again in a later attribute
        let mut seen = BTreeSet::new();
        ids.retain(|id| seen.insert(id.clone()));
        ids
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Subnet => "subnet",
            Self::FirewallRule => "firewall_rule",
            Self::Instance => "instance",
            Self::Database => "database",
        };
        write!(f, "{s}")
    }
}

/// Opening marker of a reference expression inside a string attribute.
const REF_OPEN: &str = "${ref:";

/// Extracts every `${ref:<logical_id>}` occurrence from a string.
fn refs_in_str(s: &str, out: &mut Vec<String>) {
    let mut rest = s;
    while let Some(start) = rest.find(REF_OPEN) {
        let tail = &rest[start + REF_OPEN.len()..];
        let Some(end) = tail.find('}') else { return };
        out.push(tail[..end].to_string());
        rest = &tail[end + 1..];
    }
}

/// Recursively collects reference targets from an attribute value.
fn collect_refs(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => refs_in_str(s, out),
        Value::Array(items) => {
            for item in items {
                collect_refs(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_refs(item, out);
            }
        }
        _ => {}
    }
}

/// Substitutes every `${ref:<logical_id>}` in a string with the value looked
/// up by `resolve`. Returns `Err` with the unresolved logical id on a miss.
fn interpolate_str(
    s: &str,
    resolve: &dyn Fn(&str) -> Option<String>,
) -> std::result::Result<String, String> {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find(REF_OPEN) {
        result.push_str(&rest[..start]);
        let tail = &rest[start + REF_OPEN.len()..];
        let Some(end) = tail.find('}') else {
            // Unterminated expression; keep the literal text.
            result.push_str(&rest[start..]);
            return Ok(result);
        };
        let target = &tail[..end];
        match resolve(target) {
            Some(remote_id) => result.push_str(&remote_id),
            None => return Err(target.to_string()),
        }
        rest = &tail[end + 1..];
    }
    result.push_str(rest);
    Ok(result)
}

/// Recursively substitutes references inside an attribute value.
///
/// # Errors
///
/// Returns the logical id of the first reference that cannot be resolved.
pub fn interpolate_value(
    value: &Value,
    resolve: &dyn Fn(&str) -> Option<String>,
) -> std::result::Result<Value, String> {
    match value {
        Value::String(s) => Ok(Value::String(interpolate_str(s, resolve)?)),
        Value::Array(items) => {
            let mut resolved = Vec::with_capacity(items.len());
            for item in items {
                resolved.push(interpolate_value(item, resolve)?);
            }
            Ok(Value::Array(resolved))
        }
        Value::Object(map) => {
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                resolved.insert(key.clone(), interpolate_value(item, resolve)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

/// Substitutes references in an entire attribute map.
///
/// # Errors
///
/// Returns the logical id of the first reference that cannot be resolved.
pub fn interpolate_attributes(
    attributes: &BTreeMap<String, Value>,
    resolve: &dyn Fn(&str) -> Option<String>,
) -> std::result::Result<BTreeMap<String, Value>, String> {
    let mut resolved = BTreeMap::new();
    for (name, value) in attributes {
        resolved.insert(name.clone(), interpolate_value(value, resolve)?);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec_with_attr(value: Value) -> ResourceSpec {
        let mut attributes = BTreeMap::new();
        attributes.insert(String::from("network"), value);
        ResourceSpec {
            kind: ResourceKind::Subnet,
            id: String::from("app-subnet"),
            attributes,
            depends_on: vec![],
        }
    }

    #[test]
    fn test_referenced_ids_from_attribute() {
        let spec = spec_with_attr(json!("${ref:core-net}"));
        assert_eq!(spec.referenced_ids(), vec![String::from("core-net")]);
    }

    #[test]
    fn test_referenced_ids_nested() {
        let spec = spec_with_attr(json!({ "parent": ["${ref:a}", "${ref:b}"] }));
        assert_eq!(spec.referenced_ids(), vec![String::from("a"), String::from("b")]);
    }

    #[test]
    fn test_depends_on_and_refs_combined() {
        let mut spec = spec_with_attr(json!("${ref:core-net}"));
        spec.depends_on.push(String::from("bastion"));
        let ids = spec.referenced_ids();
        assert!(ids.contains(&String::from("bastion")));
        assert!(ids.contains(&String::from("core-net")));
    }

    #[test]
    fn test_referenced_ids_dedup_non_adjacent() {
        // The same target via depends_on, a second attribute in between, then
        // an attribute reference again
        let mut spec = spec_with_attr(json!({
            "parent": "${ref:core-net}",
            "peer": "${ref:other}",
            "route_via": "${ref:core-net}"
        }));
        spec.depends_on.push(String::from("core-net"));

        let ids = spec.referenced_ids();
        assert_eq!(
            ids.iter().filter(|id| id.as_str() == "core-net").count(),
            1
        );
        assert!(ids.contains(&String::from("other")));
    }

    #[test]
    fn test_interpolate_full_string() {
        let resolve = |id: &str| (id == "core-net").then(|| String::from("net-123"));
        let value = json!("${ref:core-net}");
        let resolved = interpolate_value(&value, &resolve).expect("should resolve");
        assert_eq!(resolved, json!("net-123"));
    }

    #[test]
    fn test_interpolate_embedded() {
        let resolve = |id: &str| (id == "core-net").then(|| String::from("net-123"));
        let value = json!("vpc/${ref:core-net}/peering");
        let resolved = interpolate_value(&value, &resolve).expect("should resolve");
        assert_eq!(resolved, json!("vpc/net-123/peering"));
    }

    #[test]
    fn test_interpolate_unresolved() {
        let resolve = |_: &str| None;
        let value = json!("${ref:ghost}");
        let err = interpolate_value(&value, &resolve).expect_err("should fail");
        assert_eq!(err, "ghost");
    }

    #[test]
    fn test_kind_round_trip() {
        let yaml = "firewall_rule";
        let kind: ResourceKind = serde_yaml::from_str(yaml).expect("should parse");
        assert_eq!(kind, ResourceKind::FirewallRule);
        assert_eq!(kind.to_string(), "firewall_rule");
    }
}
