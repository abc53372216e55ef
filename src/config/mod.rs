//! Configuration module for the Stratus convergence engine.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `stratus.stack.yaml`
//! - Per-kind attribute schemas and load-time validation
//! - Reference extraction and substitution (`${ref:<logical_id>}`)
//! - Computing attribute fingerprints for change detection

mod spec;
mod parser;
mod schema;
mod hash;

pub use spec::{
    interpolate_attributes, interpolate_value, ProjectConfig, ProviderBackend, ProviderConfig,
    ResourceKind, ResourceSpec, RunConfig, StackConfig, StateBackend, StateConfig,
};
pub use parser::{find_stack_file, StackParser, DEFAULT_STACK_FILES};
pub use schema::{AttrType, AttributeSchema, KindSchema, SpecValidator};
pub use hash::AttributeHasher;
