//! Per-kind attribute schemas and load-time stack validation.
//!
//! Every resource kind carries a schema describing which attributes exist,
//! their expected JSON types, which are required, and which are immutable.
//! Changing an immutable attribute on a live resource forces a replace
//! (delete then create). All violations are surfaced as [`ConfigError`]
//! before any remote call is issued.

use crate::config::spec::{ResourceKind, ResourceSpec, StackConfig};
use crate::error::{ConfigError, Result};
use serde_json::Value;
use std::collections::HashSet;

/// Expected JSON type of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    /// A JSON string.
    String,
    /// A JSON integer.
    Integer,
    /// A JSON boolean.
    Bool,
    /// A JSON array.
    List,
    /// A JSON object.
    Object,
}

impl AttrType {
    /// Returns true if `value` matches this type. Strings containing
    /// `${ref:…}` expressions are accepted for any type since they are
    /// substituted before being sent to the provider.
    #[must_use]
    pub fn matches(self, value: &Value) -> bool {
        if let Value::String(s) = value {
            if s.contains("${ref:") {
                return true;
            }
        }
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Bool => value.is_boolean(),
            Self::List => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    /// Human-readable type name for error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Bool => "boolean",
            Self::List => "list",
            Self::Object => "object",
        }
    }
}

/// Schema entry for a single attribute.
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    /// Attribute name.
    pub name: &'static str,
    /// Expected JSON type.
    pub attr_type: AttrType,
    /// Whether the attribute must be present.
    pub required: bool,
    /// Whether a change to this attribute forces a replace.
    pub immutable: bool,
    /// Allowed literal values, if restricted.
    pub allowed: &'static [&'static str],
}

impl AttributeSchema {
    const fn new(name: &'static str, attr_type: AttrType) -> Self {
        Self {
            name,
            attr_type,
            required: false,
            immutable: false,
            allowed: &[],
        }
    }

    const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    const fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    const fn one_of(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = allowed;
        self
    }
}

/// The full attribute schema for a resource kind.
#[derive(Debug, Clone)]
pub struct KindSchema {
    /// The kind this schema describes.
    pub kind: ResourceKind,
    /// All known attributes for the kind.
    pub attributes: Vec<AttributeSchema>,
}

impl KindSchema {
    /// Returns the schema for a resource kind.
    #[must_use]
    pub fn for_kind(kind: ResourceKind) -> Self {
        let attributes = match kind {
            ResourceKind::Network => vec![
                AttributeSchema::new("cidr", AttrType::String).required().immutable(),
                AttributeSchema::new("dns_enabled", AttrType::Bool),
                AttributeSchema::new("tags", AttrType::Object),
            ],
            ResourceKind::Subnet => vec![
                AttributeSchema::new("cidr", AttrType::String).required().immutable(),
                AttributeSchema::new("network", AttrType::String).required().immutable(),
                AttributeSchema::new("zone", AttrType::String).immutable(),
                AttributeSchema::new("tags", AttrType::Object),
            ],
            ResourceKind::FirewallRule => vec![
                AttributeSchema::new("network", AttrType::String).required().immutable(),
                AttributeSchema::new("direction", AttrType::String)
                    .required()
                    .one_of(&["ingress", "egress"]),
                AttributeSchema::new("protocol", AttrType::String)
                    .required()
                    .one_of(&["tcp", "udp", "icmp", "any"]),
                AttributeSchema::new("port_range", AttrType::String),
                AttributeSchema::new("source", AttrType::String),
                AttributeSchema::new("tags", AttrType::Object),
            ],
            ResourceKind::Instance => vec![
                AttributeSchema::new("subnet", AttrType::String).required().immutable(),
                AttributeSchema::new("machine_type", AttrType::String).required(),
                AttributeSchema::new("image", AttrType::String).required().immutable(),
                AttributeSchema::new("user_data", AttrType::String).immutable(),
                AttributeSchema::new("public_ip", AttrType::Bool),
                AttributeSchema::new("tags", AttrType::Object),
            ],
            ResourceKind::Database => vec![
                AttributeSchema::new("engine", AttrType::String)
                    .required()
                    .immutable()
                    .one_of(&["postgres", "mysql", "redis"]),
                AttributeSchema::new("network", AttrType::String).required().immutable(),
                AttributeSchema::new("version", AttrType::String),
                AttributeSchema::new("storage_gb", AttrType::Integer),
                AttributeSchema::new("tags", AttrType::Object),
            ],
        };
        Self { kind, attributes }
    }

    /// Looks up an attribute schema entry by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Returns the names of all immutable attributes for this kind.
    #[must_use]
    pub fn immutable_attributes(&self) -> HashSet<&'static str> {
        self.attributes
            .iter()
            .filter(|a| a.immutable)
            .map(|a| a.name)
            .collect()
    }
}

/// Validates a parsed stack against the per-kind schemas and referential
/// integrity rules.
pub struct SpecValidator;

impl SpecValidator {
    /// Runs all load-time checks on the stack.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` on the first violation found: duplicate
    /// resources, unknown or ill-typed attributes, missing required
    /// attributes, or references to undeclared resources.
    pub fn validate(config: &StackConfig) -> Result<()> {
        Self::check_duplicates(config)?;
        let known: HashSet<&str> = config.resources.iter().map(|r| r.id.as_str()).collect();
        for resource in &config.resources {
            Self::check_schema(resource)?;
            Self::check_references(resource, &known)?;
        }
        Ok(())
    }

    // Logical ids are the reference namespace for `depends_on` and
    // `${ref:...}`, so they must be unique across kinds, not just within one.
    fn check_duplicates(config: &StackConfig) -> Result<()> {
        let mut seen = HashSet::new();
        for resource in &config.resources {
            if !seen.insert(resource.id.as_str()) {
                return Err(ConfigError::DuplicateResource {
                    address: resource.address(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn check_schema(resource: &ResourceSpec) -> Result<()> {
        let schema = KindSchema::for_kind(resource.kind);
        for (name, value) in &resource.attributes {
            let Some(attr) = schema.attribute(name) else {
                return Err(ConfigError::schema(
                    format!("unknown attribute '{name}' for kind '{}'", resource.kind),
                    resource.address(),
                )
                .into());
            };
            if !attr.attr_type.matches(value) {
                return Err(ConfigError::schema(
                    format!(
                        "attribute '{name}' must be a {}, got {value}",
                        attr.attr_type.name()
                    ),
                    resource.address(),
                )
                .into());
            }
            if !attr.allowed.is_empty() {
                if let Value::String(s) = value {
                    if !s.contains("${ref:") && !attr.allowed.contains(&s.as_str()) {
                        return Err(ConfigError::schema(
                            format!(
                                "attribute '{name}' must be one of {:?}, got '{s}'",
                                attr.allowed
                            ),
                            resource.address(),
                        )
                        .into());
                    }
                }
            }
        }
        for attr in &schema.attributes {
            if attr.required && !resource.attributes.contains_key(attr.name) {
                return Err(ConfigError::schema(
                    format!("missing required attribute '{}'", attr.name),
                    resource.address(),
                )
                .into());
            }
        }
        Ok(())
    }

    fn check_references(resource: &ResourceSpec, known: &HashSet<&str>) -> Result<()> {
        for target in resource.referenced_ids() {
            if target == resource.id {
                return Err(ConfigError::DependencyCycle {
                    cycle: format!("{0} -> {0}", resource.id),
                }
                .into());
            }
            if !known.contains(target.as_str()) {
                return Err(ConfigError::DanglingReference {
                    from: resource.id.clone(),
                    to: target,
                }
                .into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::spec::{ProjectConfig, ProviderConfig, RunConfig, StateConfig};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn resource(kind: ResourceKind, id: &str, attrs: &[(&str, Value)]) -> ResourceSpec {
        let mut attributes = BTreeMap::new();
        for (name, value) in attrs {
            attributes.insert((*name).to_string(), value.clone());
        }
        ResourceSpec {
            kind,
            id: id.to_string(),
            attributes,
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

    #[test]
    fn test_valid_stack_passes() {
        let config = stack(vec![
            resource(ResourceKind::Network, "net", &[("cidr", json!("10.0.0.0/16"))]),
            resource(
                ResourceKind::Subnet,
                "sub",
                &[
                    ("cidr", json!("10.0.1.0/24")),
                    ("network", json!("${ref:net}")),
                ],
            ),
        ]);
        assert!(SpecValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_duplicate_resource_rejected() {
        let config = stack(vec![
            resource(ResourceKind::Network, "net", &[("cidr", json!("10.0.0.0/16"))]),
            resource(ResourceKind::Network, "net", &[("cidr", json!("10.1.0.0/16"))]),
        ]);
        let err = SpecValidator::validate(&config).expect_err("should reject duplicate");
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_duplicate_id_across_kinds_rejected() {
        // Downstream lookups key on the logical id alone, so a Network and a
        // Subnet sharing an id would shadow each other.
        let config = stack(vec![
            resource(ResourceKind::Network, "main", &[("cidr", json!("10.0.0.0/16"))]),
            resource(
                ResourceKind::Subnet,
                "main",
                &[
                    ("cidr", json!("10.0.1.0/24")),
                    ("network", json!("${ref:main}")),
                ],
            ),
        ]);
        let err = SpecValidator::validate(&config).expect_err("should reject duplicate id");
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_unknown_attribute_rejected() {
        let config = stack(vec![resource(
            ResourceKind::Network,
            "net",
            &[("cidr", json!("10.0.0.0/16")), ("color", json!("blue"))],
        )]);
        let err = SpecValidator::validate(&config).expect_err("should reject unknown attr");
        assert!(err.to_string().contains("color"));
    }

    #[test]
    fn test_missing_required_attribute_rejected() {
        let config = stack(vec![resource(ResourceKind::Network, "net", &[])]);
        let err = SpecValidator::validate(&config).expect_err("should reject missing cidr");
        assert!(err.to_string().contains("cidr"));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let config = stack(vec![resource(
            ResourceKind::Network,
            "net",
            &[("cidr", json!(42))],
        )]);
        let err = SpecValidator::validate(&config).expect_err("should reject integer cidr");
        assert!(err.to_string().contains("string"));
    }

    #[test]
    fn test_direction_enum_enforced() {
        let config = stack(vec![
        resource(ResourceKind::Network, "net", &[("cidr", json!("10.0.0.0/16"))]),
            resource(
                ResourceKind::FirewallRule,
                "fw",
                &[
                    ("network", json!("${ref:net}")),
                    ("direction", json!("sideways")),
                    ("protocol", json!("tcp")),
                ],
            ),
        ]);
        let err = SpecValidator::validate(&config).expect_err("should reject bad direction");
        assert!(err.to_string().contains("direction"));
    }

    #[test]
    fn test_dangling_reference_rejected() {
        let config = stack(vec![resource(
            ResourceKind::Subnet,
            "sub",
            &[("cidr", json!("10.0.1.0/24")), ("network", json!("${ref:ghost}"))],
        )]);
        let err = SpecValidator::validate(&config).expect_err("should reject dangling ref");
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_dangling_depends_on_rejected() {
        let mut spec = resource(ResourceKind::Network, "net", &[("cidr", json!("10.0.0.0/16"))]);
        spec.depends_on.push(String::from("missing"));
        let config = stack(vec![spec]);
        let err = SpecValidator::validate(&config).expect_err("should reject dangling dep");
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_self_reference_rejected() {
        let mut spec = resource(ResourceKind::Network, "net", &[("cidr", json!("10.0.0.0/16"))]);
        spec.depends_on.push(String::from("net"));
        let config = stack(vec![spec]);
        let err = SpecValidator::validate(&config).expect_err("should reject self dep");
        assert!(err.to_string().contains("net -> net"));
    }

    #[test]
    fn test_immutable_attribute_sets() {
        let schema = KindSchema::for_kind(ResourceKind::Database);
        let immutable = schema.immutable_attributes();
        assert!(immutable.contains("engine"));
        assert!(immutable.contains("network"));
        assert!(!immutable.contains("storage_gb"));
    }
}
