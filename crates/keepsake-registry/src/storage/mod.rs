//! Storage abstraction for registry data
//!
//! Every backend implements the same write/read/list/remove contract for the
//! three record kinds the registry persists: packages, secrets and cache
//! entries. Absence is `Ok(None)` / `Ok(false)`, never an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entities::{CacheEntry, RegistryPackage, VaultSecret};
use crate::error::{BackendKind, StorageError};

pub mod file_storage;
pub mod memory_storage;

pub use file_storage::FileStorage;
pub use memory_storage::MemoryStorage;

#[cfg(feature = "redis")]
pub mod redis_storage;
#[cfg(feature = "redis")]
pub use redis_storage::RedisStorage;

#[cfg(feature = "sqlite")]
pub mod sqlite_storage;
#[cfg(feature = "sqlite")]
pub use sqlite_storage::SqliteStorage;

#[cfg(feature = "s3")]
pub mod s3_storage;
#[cfg(feature = "s3")]
pub use s3_storage::S3Storage;

/// Result type for adapter calls
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A table or index in the relational backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaObject {
    /// "table" or "index"
    pub kind: String,
    pub name: String,
    /// Table an index belongs to
    pub table: String,
    /// Creation statement
    pub sql: Option<String>,
}

/// One concrete storage medium
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Which kind of medium this is; determines read priority
    fn kind(&self) -> BackendKind;

    /// Human-readable label for logs
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// Cheap liveness probe
    async fn health_check(&self) -> StorageResult<()>;

    // === Packages ===

    async fn put_package(&self, package: &RegistryPackage) -> StorageResult<()>;

    async fn get_package(&self, scope: &str, id: &str) -> StorageResult<Option<RegistryPackage>>;

    /// All packages, optionally restricted to one scope
    async fn list_packages(&self, scope: Option<&str>) -> StorageResult<Vec<RegistryPackage>>;

    async fn remove_package(&self, scope: &str, id: &str) -> StorageResult<bool>;

    // === Secrets ===

    async fn put_secret(&self, secret: &VaultSecret) -> StorageResult<()>;

    async fn get_secret(&self, name: &str) -> StorageResult<Option<VaultSecret>>;

    async fn list_secrets(&self, scope: Option<&str>) -> StorageResult<Vec<VaultSecret>>;

    async fn remove_secret(&self, name: &str) -> StorageResult<bool>;

    // === Cache entries ===

    async fn put_cache_entry(&self, entry: &CacheEntry) -> StorageResult<()>;

    async fn get_cache_entry(&self, key: &str) -> StorageResult<Option<CacheEntry>>;

    async fn list_cache_entries(&self) -> StorageResult<Vec<CacheEntry>>;

    async fn remove_cache_entry(&self, key: &str) -> StorageResult<bool>;

    // === Lifecycle ===

    /// Tables and indexes, for backends that have a schema
    async fn describe_schema(&self) -> StorageResult<Option<Vec<SchemaObject>>> {
        Ok(None)
    }

    /// Flush and release handles
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Keep only records in `scope` when a filter is given
pub(crate) fn in_scope(record_scope: &str, filter: Option<&str>) -> bool {
    filter.is_none_or(|scope| scope == record_scope)
}
