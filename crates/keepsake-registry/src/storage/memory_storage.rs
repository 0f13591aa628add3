//! In-memory storage backend
//!
//! Volatile, process-local stand-in for the network cache tier. Used for
//! testing and development when no redis server is available.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{StorageBackend, StorageResult, in_scope};
use crate::entities::{CacheEntry, RegistryPackage, VaultSecret};
use crate::error::{BackendKind, StorageError};

#[derive(Debug, Default)]
struct Tables {
    /// (scope, id) -> package
    packages: HashMap<(String, String), RegistryPackage>,
    secrets: HashMap<String, VaultSecret>,
    cache: HashMap<String, CacheEntry>,
}

/// In-memory storage implementation
#[derive(Debug)]
pub struct MemoryStorage {
    kind: BackendKind,
    tables: Mutex<Tables>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_kind(BackendKind::NetworkCache)
    }

    /// Memory storage that reports itself as another backend kind.
    ///
    /// Lets tests stand in for backends that need external services.
    pub fn with_kind(kind: BackendKind) -> Self {
        Self {
            kind,
            tables: Mutex::new(Tables::default()),
        }
    }

    fn tables(&self) -> StorageResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StorageError::backend(self.kind, "Lock poisoned"))
    }

    /// Number of stored packages (useful for testing)
    pub fn package_count(&self) -> usize {
        self.tables().map(|t| t.packages.len()).unwrap_or(0)
    }

    /// Overwrite a stored package without any checks (useful for testing)
    pub fn replace_package(&self, package: RegistryPackage) {
        if let Ok(mut tables) = self.tables() {
            tables
                .packages
                .insert((package.scope.clone(), package.id.clone()), package);
        }
    }

    /// Clear all data
    pub fn clear(&self) {
        if let Ok(mut tables) = self.tables() {
            *tables = Tables::default();
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn name(&self) -> &str {
        "memory"
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.tables().map(|_| ())
    }

    async fn put_package(&self, package: &RegistryPackage) -> StorageResult<()> {
        self.tables()?
            .packages
            .insert((package.scope.clone(), package.id.clone()), package.clone());
        Ok(())
    }

    async fn get_package(&self, scope: &str, id: &str) -> StorageResult<Option<RegistryPackage>> {
        Ok(self
            .tables()?
            .packages
            .get(&(scope.to_string(), id.to_string()))
            .cloned())
    }

    async fn list_packages(&self, scope: Option<&str>) -> StorageResult<Vec<RegistryPackage>> {
        Ok(self
            .tables()?
            .packages
            .values()
            .filter(|p| in_scope(&p.scope, scope))
            .cloned()
            .collect())
    }

    async fn remove_package(&self, scope: &str, id: &str) -> StorageResult<bool> {
        Ok(self
            .tables()?
            .packages
            .remove(&(scope.to_string(), id.to_string()))
            .is_some())
    }

    async fn put_secret(&self, secret: &VaultSecret) -> StorageResult<()> {
        self.tables()?
            .secrets
            .insert(secret.name.clone(), secret.clone());
        Ok(())
    }

    async fn get_secret(&self, name: &str) -> StorageResult<Option<VaultSecret>> {
        Ok(self.tables()?.secrets.get(name).cloned())
    }

    async fn list_secrets(&self, scope: Option<&str>) -> StorageResult<Vec<VaultSecret>> {
        Ok(self
            .tables()?
            .secrets
            .values()
            .filter(|s| in_scope(&s.scope, scope))
            .cloned()
            .collect())
    }

    async fn remove_secret(&self, name: &str) -> StorageResult<bool> {
        Ok(self.tables()?.secrets.remove(name).is_some())
    }

    async fn put_cache_entry(&self, entry: &CacheEntry) -> StorageResult<()> {
        self.tables()?
            .cache
            .insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn get_cache_entry(&self, key: &str) -> StorageResult<Option<CacheEntry>> {
        Ok(self.tables()?.cache.get(key).cloned())
    }

    async fn list_cache_entries(&self) -> StorageResult<Vec<CacheEntry>> {
        Ok(self.tables()?.cache.values().cloned().collect())
    }

    async fn remove_cache_entry(&self, key: &str) -> StorageResult<bool> {
        Ok(self.tables()?.cache.remove(key).is_some())
    }
}
