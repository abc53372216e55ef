// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![forbid(unsafe_code)]               // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are flagged
#![warn(unused_variables)]            // Unused variables are flagged
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Stratus
//!
//! A declarative, idempotent convergence engine for cloud resources.
//!
//! ## Overview
//!
//! Stratus converges a set of remote cloud resources to match a declarative
//! stack file, allowing you to:
//!
//! - Define networks, subnets, firewall rules, instances, and databases as
//!   code in a YAML stack file
//! - Reference resources from each other with `${ref:<logical_id>}` and let
//!   the engine order operations along the dependency graph
//! - Apply independent branches concurrently, with retries and timeouts on
//!   every remote operation
//! - Track converged state in a journaled local store with optimistic
//!   concurrency
//!
//! ## Architecture
//!
//! The system is built around **desired state convergence**:
//!
//! 1. **Desired state**: Declared in `stratus.stack.yaml`
//! 2. **Recorded state**: The last confirmed apply, stored under `.stratus/`
//! 3. **Observed state**: Read back from the provider when records go stale
//!
//! The planner diffs the three into a change set; the engine executes it in
//! dependency order.
//!
//! ## Modules
//!
//! - [`config`]: Stack parsing, schemas, and validation
//! - [`graph`]: Dependency graph construction and ordering
//! - [`state`]: State records, journal, and locking
//! - [`provider`]: Cloud provider clients (HTTP, in-memory)
//! - [`planner`]: Diff computation and change set construction
//! - [`engine`]: Concurrent change set execution
//! - [`converger`]: Run orchestration
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: my-stack
//!   environment: prod
//!
//! resources:
//!   - kind: network
//!     id: core
//!     attributes:
//!       cidr: "10.0.0.0/16"
//!   - kind: subnet
//!     id: workers
//!     attributes:
//!       cidr: "10.0.1.0/24"
//!       network: "${ref:core}"
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod converger;
pub mod engine;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{SpecValidator, StackConfig, StackParser};
pub use converger::Converger;
pub use engine::{ApplyEngine, ApplyReport, CancelToken};
pub use error::{Result, StratusError};
pub use graph::DependencyGraph;
pub use planner::{ChangeSet, Planner};
pub use provider::{CloudProvider, HttpProvider, MemoryProvider};
pub use state::{LocalStateStore, StateSnapshot, StateStore};
