//! Cloud provider trait definition.
//!
//! This module defines the common interface every provider backend
//! implements. All operations are safe to retry: the engine calls them again
//! after transient failures, so a backend must treat repeated creates of the
//! same payload and deletes of already-gone resources as benign.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::config::ResourceKind;
use crate::error::Result;

/// Attribute map exchanged with a provider.
pub type Attributes = BTreeMap<String, Value>;

/// Trait for cloud provider backends.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Creates a remote resource and returns its remote id.
    async fn create(&self, kind: ResourceKind, attributes: &Attributes) -> Result<String>;

    /// Reads the current attributes of a remote resource.
    ///
    /// Returns `None` when the resource does not exist remotely.
    async fn read(&self, kind: ResourceKind, remote_id: &str) -> Result<Option<Attributes>>;

    /// Updates a remote resource in place.
    async fn update(&self, kind: ResourceKind, remote_id: &str, attributes: &Attributes)
        -> Result<()>;

    /// Deletes a remote resource. Deleting an already-gone resource is not
    /// an error.
    async fn delete(&self, kind: ResourceKind, remote_id: &str) -> Result<()>;

    /// Applies tags to a remote resource.
    async fn tag(
        &self,
        kind: ResourceKind,
        remote_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
