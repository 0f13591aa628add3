//! Error types for the keepsake registry

use std::fmt;
use thiserror::Error;

/// The storage medium an adapter writes to.
///
/// Declaration order is read priority: earlier kinds are consulted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Low-latency volatile cache (redis, or the in-memory stand-in)
    NetworkCache,
    /// Embedded relational store (sqlite)
    Relational,
    /// Object store (S3-compatible)
    ObjectStore,
    /// Filesystem fallback, always enabled
    Filesystem,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::NetworkCache,
        BackendKind::Relational,
        BackendKind::ObjectStore,
        BackendKind::Filesystem,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::NetworkCache => "network-cache",
            BackendKind::Relational => "relational",
            BackendKind::ObjectStore => "object-store",
            BackendKind::Filesystem => "filesystem",
        }
    }

    /// Whether a failure of this backend fails the whole operation
    pub fn is_mandatory(&self) -> bool {
        matches!(self, BackendKind::Filesystem)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    NotFound,
    Backend,
    InvalidKey,
    Timeout,
}

/// An adapter failed to perform a read or write it was asked to do
#[derive(Debug, Clone, Error)]
#[error("{backend} storage error: {message}")]
pub struct StorageError {
    pub backend: BackendKind,
    pub kind: StorageErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn backend(backend: BackendKind, message: impl Into<String>) -> Self {
        Self {
            backend,
            kind: StorageErrorKind::Backend,
            message: message.into(),
        }
    }

    pub fn not_found(backend: BackendKind, key: impl Into<String>) -> Self {
        Self {
            backend,
            kind: StorageErrorKind::NotFound,
            message: format!("Key not found: {}", key.into()),
        }
    }

    pub fn invalid_key(backend: BackendKind, message: impl Into<String>) -> Self {
        Self {
            backend,
            kind: StorageErrorKind::InvalidKey,
            message: message.into(),
        }
    }

    pub fn timeout(backend: BackendKind, operation: &str) -> Self {
        Self {
            backend,
            kind: StorageErrorKind::Timeout,
            message: format!("{} timed out", operation),
        }
    }
}

/// Registry-specific errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Integrity check failed for {key}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// True for integrity failures, which must never be degraded into a miss
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, RegistryError::IntegrityMismatch { .. })
    }
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_priority_order() {
        let mut kinds = vec![
            BackendKind::Filesystem,
            BackendKind::NetworkCache,
            BackendKind::ObjectStore,
            BackendKind::Relational,
        ];
        kinds.sort();
        assert_eq!(kinds, BackendKind::ALL.to_vec());
        assert!(BackendKind::Filesystem.is_mandatory());
        assert!(!BackendKind::Relational.is_mandatory());
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::backend(BackendKind::ObjectStore, "bucket missing");
        assert_eq!(err.to_string(), "object-store storage error: bucket missing");

        let err = StorageError::timeout(BackendKind::NetworkCache, "put_package");
        assert_eq!(err.kind, StorageErrorKind::Timeout);
        assert!(err.to_string().contains("put_package timed out"));
    }
}
