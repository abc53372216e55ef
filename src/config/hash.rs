//! Attribute hashing for change detection.
//!
//! This module provides deterministic hashing of resource attribute maps to
//! detect changes between runs and enable idempotent operations. Object keys
//! are hashed in sorted order so the fingerprint is independent of the order
//! attributes appear in the stack file.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Hasher for computing attribute fingerprints.
#[derive(Debug, Default)]
pub struct AttributeHasher;

impl AttributeHasher {
    /// Creates a new attribute hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a deterministic hash of an attribute map.
    ///
    /// This hash changes when any attribute value changes.
    #[must_use]
    pub fn hash_attributes(&self, attributes: &BTreeMap<String, Value>) -> String {
        let mut hasher = Sha256::new();
        for (name, value) in attributes {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            Self::hash_value(&mut hasher, value);
        }
        hex::encode(hasher.finalize())
    }

    /// Feeds a single JSON value into the hasher in canonical form.
    fn hash_value(hasher: &mut Sha256, value: &Value) {
        match value {
            Value::Null => hasher.update(b"null"),
            Value::Bool(b) => hasher.update(if *b { [1u8] } else { [0u8] }),
            Value::Number(n) => hasher.update(n.to_string().as_bytes()),
            Value::String(s) => {
                hasher.update(b"s:");
                hasher.update(s.as_bytes());
            }
            Value::Array(items) => {
                hasher.update(b"[");
                for item in items {
                    Self::hash_value(hasher, item);
                    hasher.update([0u8]);
                }
                hasher.update(b"]");
            }
            Value::Object(map) => {
                // Sorted keys for determinism
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                hasher.update(b"{");
                for (key, item) in entries {
                    hasher.update(key.as_bytes());
                    hasher.update([0u8]);
                    Self::hash_value(hasher, item);
                }
                hasher.update(b"}");
            }
        }
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes for equality.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_hash_deterministic() {
        let hasher = AttributeHasher::new();
        let a = attrs(&[("cidr", json!("10.0.0.0/16")), ("dns_enabled", json!(true))]);

        assert_eq!(hasher.hash_attributes(&a), hasher.hash_attributes(&a));
    }

    #[test]
    fn test_different_values_different_hash() {
        let hasher = AttributeHasher::new();
        let a = attrs(&[("cidr", json!("10.0.0.0/16"))]);
        let b = attrs(&[("cidr", json!("10.1.0.0/16"))]);

        assert_ne!(hasher.hash_attributes(&a), hasher.hash_attributes(&b));
    }

    #[test]
    fn test_object_key_order_irrelevant() {
        let hasher = AttributeHasher::new();
        let a = attrs(&[("tags", json!({ "team": "infra", "env": "dev" }))]);
        let b = attrs(&[("tags", json!({ "env": "dev", "team": "infra" }))]);

        assert_eq!(hasher.hash_attributes(&a), hasher.hash_attributes(&b));
    }

    #[test]
    fn test_type_distinguished_from_rendering() {
        let hasher = AttributeHasher::new();
        let a = attrs(&[("storage_gb", json!(100))]);
        let b = attrs(&[("storage_gb", json!("100"))]);

        assert_ne!(hasher.hash_attributes(&a), hasher.hash_attributes(&b));
    }

    #[test]
    fn test_short_hash() {
        let hasher = AttributeHasher::new();
        let short = hasher.short_hash("abcdef1234567890abcdef1234567890");

        assert_eq!(short, "abcdef12");
        assert_eq!(short.len(), 8);
    }

    #[test]
    fn test_hashes_match() {
        assert!(AttributeHasher::hashes_match("abc123", "abc123"));
        assert!(!AttributeHasher::hashes_match("abc123", "abc124"));
        assert!(!AttributeHasher::hashes_match("abc123", "abc12"));
    }
}
