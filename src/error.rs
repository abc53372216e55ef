//! Error types for the Stratus convergence engine.
//!
//! This module provides a comprehensive error hierarchy for all phases of a
//! convergence run: configuration loading, graph construction, state
//! management, remote provider operations, planning, and execution.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Stratus convergence engine.
#[derive(Debug, Error)]
pub enum StratusError {
    /// Configuration-related errors (fatal, pre-execution).
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Remote provider errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Execution errors.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
///
/// All of these are detected at load time, before any remote call is issued.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The stack file was not found.
    #[error("Stack file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The stack file could not be parsed.
    #[error("Failed to parse stack file: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Schema validation failed for a resource attribute.
    #[error("Schema validation failed: {message}")]
    SchemaError {
        /// Description of the schema violation.
        message: String,
        /// Resource address (`kind.logical_id`) that failed, if known.
        resource: Option<String>,
    },

    /// Two resources share the same `(kind, logical_id)`.
    #[error("Duplicate resource: {address}")]
    DuplicateResource {
        /// The duplicated resource address.
        address: String,
    },

    /// A `depends_on` entry or reference points at an unknown resource.
    #[error("Resource '{from}' references unknown resource '{to}'")]
    DanglingReference {
        /// Logical id of the referencing resource.
        from: String,
        /// The unknown logical id it points at.
        to: String,
    },

    /// The dependency graph contains a cycle.
    #[error("Dependency cycle detected: {cycle}")]
    DependencyCycle {
        /// The full cycle path, e.g. `a -> b -> c -> a`.
        cycle: String,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted or unreadable.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// A write-back failed.
    #[error("State write failed: {message}")]
    WriteFailed {
        /// Description of the failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// Optimistic concurrency token mismatch on a resource record.
    #[error(
        "Concurrent modification of '{logical_id}': expected version {expected}, found {found}"
    )]
    VersionConflict {
        /// Logical id of the contended record.
        logical_id: String,
        /// Version the writer expected.
        expected: u64,
        /// Version actually stored.
        found: u64,
    },
}

/// Remote provider errors, classified as transient (retried with backoff) or
/// terminal (fail the resource immediately).
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Authentication with the provider failed. Terminal.
    #[error("Provider authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// The caller lacks permission for the operation. Terminal.
    #[error("Permission denied: {message}")]
    PermissionDenied {
        /// Description of the denial.
        message: String,
    },

    /// The provider rejected an attribute value. Terminal.
    #[error("Invalid attribute value: {message}")]
    InvalidAttribute {
        /// Description of the rejection.
        message: String,
    },

    /// The provider is throttling requests. Transient.
    #[error("Provider throttled the request, retry after {retry_after_secs} seconds")]
    Throttled {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The operation timed out. Transient.
    #[error("Operation '{operation}' timed out after {timeout_secs} seconds")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout that elapsed.
        timeout_secs: u64,
    },

    /// The provider or network is temporarily unavailable. Transient.
    #[error("Provider unavailable: {message}")]
    Unavailable {
        /// Description of the outage.
        message: String,
    },

    /// The referenced remote resource does not exist.
    #[error("Remote resource not found: {remote_id}")]
    NotFound {
        /// The missing remote id.
        remote_id: String,
    },

    /// The provider returned a response we could not interpret.
    #[error("Invalid response from provider: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// A non-retryable API failure with an HTTP status.
    #[error("Provider API request failed: {status} - {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A change set entry references a resource missing from the graph.
    #[error("Failed to resolve dependencies: {message}")]
    DependencyResolutionFailed {
        /// Description of the dependency issue.
        message: String,
    },

    /// A reference could not be substituted at execution time.
    #[error("Unresolved reference '{reference}' in resource '{resource}'")]
    UnresolvedReference {
        /// The reference that could not be substituted.
        reference: String,
        /// The resource whose attributes contain it.
        resource: String,
    },
}

/// Execution errors.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// A resource exhausted its retry budget.
    #[error("Maximum retry attempts ({attempts}) exceeded for '{resource}'")]
    MaxRetriesExceeded {
        /// Number of attempts made.
        attempts: u32,
        /// Resource that failed.
        resource: String,
    },

    /// A resource operation failed terminally.
    #[error("Failed to {action} '{resource}': {reason}")]
    ResourceFailed {
        /// The action that failed (create/update/delete).
        action: String,
        /// The resource address.
        resource: String,
        /// Reason for failure.
        reason: String,
    },

    /// The run was aborted before completion.
    #[error("Apply aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for Stratus operations.
pub type Result<T> = std::result::Result<T, StratusError>;

impl StratusError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is transient and safe to retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(
                ProviderError::Throttled { .. }
                    | ProviderError::Timeout { .. }
                    | ProviderError::Unavailable { .. }
            )
        )
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Provider(ProviderError::Throttled { retry_after_secs }) => {
                Some(*retry_after_secs)
            }
            Self::Provider(ProviderError::Timeout { .. } | ProviderError::Unavailable { .. }) => {
                Some(5)
            }
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a schema error for a specific resource.
    #[must_use]
    pub fn schema(message: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::SchemaError {
            message: message.into(),
            resource: Some(resource.into()),
        }
    }

    /// Creates a schema error without a specific resource.
    #[must_use]
    pub fn schema_general(message: impl Into<String>) -> Self {
        Self::SchemaError {
            message: message.into(),
            resource: None,
        }
    }
}

impl StateError {
    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a write failure with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates an unavailable (transient) error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Returns true if the error is transient.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Throttled { .. } | Self::Timeout { .. } | Self::Unavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let err = StratusError::Provider(ProviderError::Throttled { retry_after_secs: 10 });
        assert!(err.is_retryable());
        assert_eq!(err.retry_delay_secs(), Some(10));

        let err = StratusError::Provider(ProviderError::PermissionDenied {
            message: String::from("no"),
        });
        assert!(!err.is_retryable());
        assert_eq!(err.retry_delay_secs(), None);
    }

    #[test]
    fn test_version_conflict_message() {
        let err = StateError::VersionConflict {
            logical_id: String::from("core-net"),
            expected: 3,
            found: 4,
        };
        let rendered = err.to_string();
        assert!(rendered.contains("core-net"));
        assert!(rendered.contains('3'));
    }
}
