//! # Object Store Interface
//!
//! Abstraction over the remote object-storage dependency that breakwater
//! guards. Adapters implement this trait; nothing in the subsystem binds
//! to a concrete storage provider.

use crate::Timestamp;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;

// Bytes serialize as base64 strings, shared with the queue payload types
pub(crate) mod bytes_serde {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Compute SHA-256 checksum of data
///
/// Returns hex-encoded checksum string for integrity verification.
///
/// # Examples
///
/// ```
/// use breakwater_core::object_store::compute_checksum;
/// use bytes::Bytes;
///
/// let data = Bytes::from("probe payload");
/// let checksum = compute_checksum(&data);
/// assert_eq!(checksum.len(), 64); // SHA-256 hex is 64 characters
/// ```
pub fn compute_checksum(data: &Bytes) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    hex::encode(result)
}

/// Verify checksum matches expected value
pub fn verify_checksum(data: &Bytes, expected_checksum: &str) -> bool {
    compute_checksum(data) == expected_checksum
}

/// Validate an object key before handing it to an adapter
///
/// # Validation Rules
/// - Must be 1-1024 characters
/// - Must contain only printable ASCII (plus `/` separators)
/// - Must not contain `..`, leading `/`, or empty path segments
pub fn validate_key(key: &str) -> Result<(), ObjectStoreError> {
    if key.is_empty() {
        return Err(ObjectStoreError::InvalidKey {
            key: key.to_string(),
            reason: "key must not be empty".to_string(),
        });
    }

    if key.len() > 1024 {
        return Err(ObjectStoreError::InvalidKey {
            key: key.to_string(),
            reason: "key exceeds 1024 characters".to_string(),
        });
    }

    if !key.chars().all(|c| c.is_ascii_graphic()) {
        return Err(ObjectStoreError::InvalidKey {
            key: key.to_string(),
            reason: "key contains non-printable or non-ASCII characters".to_string(),
        });
    }

    // Path traversal and degenerate segments are rejected before any
    // adapter maps keys onto a filesystem or provider namespace.
    if key.starts_with('/') || key.split('/').any(|segment| segment.is_empty() || segment == "..") {
        return Err(ObjectStoreError::InvalidKey {
            key: key.to_string(),
            reason: "key must use non-empty segments without '..' or a leading slash".to_string(),
        });
    }

    Ok(())
}

// ============================================================================
// Core Trait
// ============================================================================

/// Interface for the guarded object-storage dependency
///
/// All calls made by the resilience subsystem, including synthetic health
/// probes and queued-operation replay, go through this trait (wrapped by
/// the dependency's circuit breaker).
///
/// # Examples
///
/// ```no_run
/// use breakwater_core::object_store::*;
/// use bytes::Bytes;
/// # async fn example(store: impl ObjectStore) -> Result<(), ObjectStoreError> {
/// let meta = store
///     .put("reports/2026/summary.json", Bytes::from("{}"), PutOptions::default())
///     .await?;
/// println!("stored {} bytes", meta.size_bytes);
///
/// let object = store.get("reports/2026/summary.json").await?;
/// assert_eq!(object.meta.checksum, meta.checksum);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an object under the given key
    ///
    /// Overwrites any existing object at the same key. Implementations
    /// must compute and record the payload checksum.
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        options: PutOptions,
    ) -> Result<ObjectMeta, ObjectStoreError>;

    /// Retrieve an object and its metadata
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::NotFound`] when no object exists at the
    /// key. Absent keys are a defined outcome, not an infrastructure
    /// failure; the read probe depends on this distinction.
    async fn get(&self, key: &str) -> Result<StoredObject, ObjectStoreError>;

    /// Delete the object at the given key
    ///
    /// Deleting an absent key succeeds; delete is idempotent.
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;

    /// List object metadata under a key prefix
    ///
    /// Results are ordered by key and truncated to `limit` entries.
    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<ObjectMeta>, ObjectStoreError>;

    /// Fetch object metadata without the payload
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::NotFound`] when no object exists at the key.
    async fn head(&self, key: &str) -> Result<ObjectMeta, ObjectStoreError>;
}

// ============================================================================
// Supporting Types
// ============================================================================

/// Options applied when storing an object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PutOptions {
    /// MIME content type recorded with the object
    pub content_type: Option<String>,

    /// User-defined metadata key/value pairs
    pub metadata: HashMap<String, String>,
}

impl PutOptions {
    /// Options carrying only a content type
    pub fn with_content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            metadata: HashMap::new(),
        }
    }
}

/// Metadata describing a stored object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object key within the store
    pub key: String,

    /// Payload size in bytes
    pub size_bytes: u64,

    /// MIME content type, when recorded
    pub content_type: Option<String>,

    /// SHA-256 checksum of the payload (hex-encoded)
    pub checksum: String,

    /// User-defined metadata
    pub metadata: HashMap<String, String>,

    /// When the object was stored
    pub created_at: Timestamp,
}

/// Complete object retrieved from storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    /// Object metadata
    pub meta: ObjectMeta,

    /// Raw payload bytes
    #[serde(with = "bytes_serde")]
    pub data: Bytes,
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during object-store operations
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    /// No object exists at the requested key
    #[error("Object not found: {key}")]
    NotFound { key: String },

    /// Key rejected before reaching the backend
    #[error("Invalid object key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// Storage backend unreachable or refusing requests
    #[error("Storage unavailable: {message}")]
    Unavailable { message: String },

    /// Operation exceeded its deadline
    #[error("Storage timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Underlying I/O failure
    #[error("Storage I/O error: {message}")]
    Io { message: String },

    /// Stored payload does not match its recorded checksum
    #[error("Checksum mismatch for {key}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        key: String,
        expected: String,
        actual: String,
    },
}

impl ObjectStoreError {
    /// Check if error is transient and worth retrying
    ///
    /// Transient errors are temporary conditions that may resolve:
    /// unavailability, timeouts, and I/O failures. Permanent errors
    /// (missing objects, invalid keys, corrupted payloads) will not
    /// succeed on retry and must not burn retry budget.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. } | Self::Timeout { .. } | Self::Io { .. }
        )
    }

    /// Check if error indicates data corruption
    pub fn is_corrupted(&self) -> bool {
        matches!(self, Self::ChecksumMismatch { .. })
    }

    /// Check if error means the key had no object
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
#[path = "object_store_tests.rs"]
mod tests;
