//! Dependency graph module.
//!
//! Builds the resource dependency graph from explicit `depends_on` entries
//! and implicit attribute references, detects cycles, and produces the
//! deterministic orderings used by the planner and executor.

mod builder;

pub use builder::DependencyGraph;
