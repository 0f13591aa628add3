//! High-level registry interface for package and secret management
//!
//! The registry owns an ordered list of storage backends and the in-process
//! cache. Writes fan out to every backend concurrently; reads walk the
//! in-process cache, then persisted cache entries, then package records in
//! backend priority order, and backfill the faster tiers on a hit.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::address::ContentAddress;
use crate::cache::{CacheStats, TieredCache};
use crate::codec::Codec;
use crate::config::RegistryConfig;
use crate::entities::{CacheEntry, PackageDescriptor, PackageMetadata, RegistryPackage, ResolvedPackage};
use crate::error::{BackendKind, RegistryError, Result, StorageError};
use crate::export::{RegistryArchive, TransferSummary};
use crate::storage::{FileStorage, MemoryStorage, SchemaObject, StorageBackend, StorageResult};
use crate::vault::{CleanupReport, Vault};

/// One backend's answer in a fan-out
pub(crate) type Outcome<'b, T> = (&'b Arc<dyn StorageBackend>, StorageResult<T>);

/// Reject names that could escape a storage namespace or collide in a key
pub(crate) fn validate_segment(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(RegistryError::InvalidInput(format!("{} must not be empty", field)));
    }
    if value == "." || value == ".." {
        return Err(RegistryError::InvalidInput(format!("{} must not be '{}'", field, value)));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+' | '~')))
    {
        return Err(RegistryError::InvalidInput(format!(
            "{} '{}' contains invalid character '{}'",
            field, value, c
        )));
    }
    Ok(())
}

/// Availability of one backend kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStatus {
    pub kind: BackendKind,
    pub name: Option<String>,
    pub enabled: bool,
    pub available: bool,
}

/// Cache occupancy and effectiveness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSummary {
    pub entries: usize,
    pub bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

impl From<CacheStats> for CacheSummary {
    fn from(stats: CacheStats) -> Self {
        Self {
            entries: stats.entries,
            bytes: stats.bytes,
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            hit_rate: stats.hit_rate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_packages: usize,
    pub packages_by_scope: BTreeMap<String, usize>,
    pub total_secrets: usize,
    pub secrets_by_scope: BTreeMap<String, usize>,
    /// Sum of original package sizes
    pub total_size: u64,
    /// Sum of sizes as stored (after compression and encryption)
    pub total_stored_size: u64,
    pub cache: CacheSummary,
    pub backends: Vec<BackendStatus>,
}

/// Package and secret registry over a set of storage backends
pub struct Registry {
    config: RegistryConfig,
    /// Sorted by read priority
    backends: Vec<Arc<dyn StorageBackend>>,
    /// Kinds enabled in configuration, including any that failed to connect
    configured: Vec<BackendKind>,
    cache: TieredCache,
    codec: Codec,
    timeout: Option<Duration>,
}

#[cfg(feature = "redis")]
async fn connect_redis(config: &RegistryConfig) -> Result<Arc<dyn StorageBackend>> {
    let storage = crate::storage::RedisStorage::connect(&config.redis_url, config.cache_ttl()).await?;
    Ok(Arc::new(storage))
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(_config: &RegistryConfig) -> Result<Arc<dyn StorageBackend>> {
    Err(RegistryError::Config(
        "Redis is enabled but keepsake-registry was built without the `redis` feature".to_string(),
    ))
}

#[cfg(feature = "sqlite")]
async fn connect_sqlite(config: &RegistryConfig) -> Result<Arc<dyn StorageBackend>> {
    let storage = crate::storage::SqliteStorage::from_location(&config.sqlite_path).await?;
    Ok(Arc::new(storage))
}

#[cfg(not(feature = "sqlite"))]
async fn connect_sqlite(_config: &RegistryConfig) -> Result<Arc<dyn StorageBackend>> {
    Err(RegistryError::Config(
        "SQLite is enabled but keepsake-registry was built without the `sqlite` feature".to_string(),
    ))
}

#[cfg(feature = "s3")]
async fn connect_s3(config: &RegistryConfig) -> Result<Arc<dyn StorageBackend>> {
    use crate::storage::s3_storage::{S3Settings, S3Storage};

    let store = &config.object_store;
    let endpoint = store
        .endpoint
        .clone()
        .ok_or_else(|| RegistryError::Config("KEEPSAKE_S3_ENDPOINT is not set".to_string()))?;
    let settings = S3Settings {
        endpoint,
        bucket: store.bucket.clone(),
        region: Some(store.region.clone()),
        access_key: store.access_key.clone(),
        secret_key: store.secret_key.clone(),
    };
    Ok(Arc::new(S3Storage::connect(&settings).await?))
}

#[cfg(not(feature = "s3"))]
async fn connect_s3(_config: &RegistryConfig) -> Result<Arc<dyn StorageBackend>> {
    Err(RegistryError::Config(
        "S3 is enabled but keepsake-registry was built without the `s3` feature".to_string(),
    ))
}

impl Registry {
    /// Connect every backend enabled in `config`, plus the filesystem fallback.
    ///
    /// An optional backend that cannot be reached is logged and left out; the
    /// registry runs degraded without it.
    pub async fn open(config: RegistryConfig) -> Result<Self> {
        config.validate()?;

        let mut backends: Vec<Arc<dyn StorageBackend>> = Vec::new();
        let mut configured = Vec::new();

        let optional = [
            (config.enable_redis, BackendKind::NetworkCache),
            (config.enable_sqlite, BackendKind::Relational),
            (config.enable_s3, BackendKind::ObjectStore),
        ];
        for (enabled, kind) in optional {
            if !enabled {
                continue;
            }
            configured.push(kind);
            let connected = match kind {
                BackendKind::NetworkCache => connect_redis(&config).await,
                BackendKind::Relational => connect_sqlite(&config).await,
                _ => connect_s3(&config).await,
            };
            match connected {
                Ok(backend) => {
                    info!("Connected {} backend ({})", kind, backend.name());
                    backends.push(backend);
                }
                Err(e @ RegistryError::Config(_)) => return Err(e),
                Err(e) => warn!("{} backend unavailable, continuing without it: {}", kind, e),
            }
        }

        if config.enable_memory {
            configured.push(BackendKind::NetworkCache);
            backends.push(Arc::new(MemoryStorage::new()));
        }

        let filesystem =
            FileStorage::new(&config.registry_path, &config.vault_path, &config.cache_path).await?;
        backends.push(Arc::new(filesystem));

        let mut registry = Self::with_backends(config, backends)?;
        registry.configured.extend(configured);
        registry.configured.sort();
        registry.configured.dedup();
        Ok(registry)
    }

    /// Build a registry over explicitly constructed backends.
    ///
    /// At least one backend must be of the mandatory filesystem kind.
    pub fn with_backends(
        config: RegistryConfig,
        mut backends: Vec<Arc<dyn StorageBackend>>,
    ) -> Result<Self> {
        config.validate()?;
        if !backends.iter().any(|b| b.kind().is_mandatory()) {
            return Err(RegistryError::Config(
                "A filesystem backend is required".to_string(),
            ));
        }
        backends.sort_by_key(|b| b.kind());

        let configured = backends.iter().map(|b| b.kind()).collect();
        Ok(Self {
            cache: TieredCache::new(config.cache_ceiling, config.cache_ttl()),
            codec: config.codec()?,
            timeout: config.backend_timeout(),
            backends,
            configured,
            config,
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Backend kinds in read priority order
    pub fn backend_kinds(&self) -> Vec<BackendKind> {
        self.backends.iter().map(|b| b.kind()).collect()
    }

    /// Secret operations
    pub fn vault(&self) -> Vault<'_> {
        Vault::new(self)
    }

    pub(crate) fn backends(&self) -> &[Arc<dyn StorageBackend>] {
        &self.backends
    }

    pub(crate) fn cache(&self) -> &TieredCache {
        &self.cache
    }

    // === Backend plumbing ===

    /// Run one adapter call under the configured timeout
    pub(crate) async fn guarded<T>(
        &self,
        kind: BackendKind,
        op: &str,
        call: impl Future<Output = StorageResult<T>>,
    ) -> StorageResult<T> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| StorageError::timeout(kind, op))?,
            None => call.await,
        }
    }

    /// Issue the same call to every backend concurrently
    pub(crate) async fn fan_out<'s, T, F, Fut>(&'s self, op: &str, call: F) -> Vec<Outcome<'s, T>>
    where
        F: Fn(&'s Arc<dyn StorageBackend>) -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let call = &call;
        join_all(self.backends.iter().map(|backend| async move {
            let result = self.guarded(backend.kind(), op, call(backend)).await;
            (backend, result)
        }))
        .await
    }

    /// Collect successful results; a failed mandatory backend fails the operation
    pub(crate) fn settle<T>(&self, op: &str, outcomes: Vec<Outcome<'_, T>>) -> Result<Vec<T>> {
        let mut values = Vec::with_capacity(outcomes.len());
        let mut fatal = None;
        for (backend, result) in outcomes {
            match result {
                Ok(value) => values.push(value),
                Err(e) if backend.kind().is_mandatory() => {
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
                Err(e) => warn!("{} failed on {} backend: {}", op, backend.name(), e),
            }
        }
        match fatal {
            Some(e) => Err(e.into()),
            None => Ok(values),
        }
    }

    /// Like `settle`, but no failure is fatal
    pub(crate) fn settle_lossy<T>(&self, op: &str, outcomes: Vec<Outcome<'_, T>>) -> Vec<T> {
        outcomes
            .into_iter()
            .filter_map(|(backend, result)| match result {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("{} failed on {} backend: {}", op, backend.name(), e);
                    None
                }
            })
            .collect()
    }

    // === Cache tiers ===

    /// Insert into the in-process cache and, when `persist` is set, write the
    /// entry through to every backend. Evicted keys leave the persisted tier too.
    pub(crate) async fn remember(&self, entry: CacheEntry, persist: bool) {
        let key = entry.key.clone();
        let evicted = self.cache.insert(entry.clone());

        if persist && !evicted.contains(&key) {
            let outcomes = self
                .fan_out("put_cache_entry", |b| b.put_cache_entry(&entry))
                .await;
            self.settle_lossy("put_cache_entry", outcomes);
        }

        if !evicted.is_empty() {
            debug!("Evicted {} cache entries", evicted.len());
            self.forget_persisted(&evicted).await;
        }
    }

    /// Remove cache entries from every backend
    pub(crate) async fn forget_persisted(&self, keys: &[String]) {
        for key in keys {
            // Secret entries are never persisted
            if key.starts_with("vault:") {
                continue;
            }
            let outcomes = self
                .fan_out("remove_cache_entry", |b| b.remove_cache_entry(key))
                .await;
            self.settle_lossy("remove_cache_entry", outcomes);
        }
    }

    /// Drop a key from both cache tiers
    pub(crate) async fn invalidate(&self, key: &str) {
        self.cache.remove(key);
        self.forget_persisted(&[key.to_string()]).await;
    }

    async fn cache_package(&self, package: &RegistryPackage) -> Result<()> {
        let data = serde_json::to_vec(package)?;
        let entry = CacheEntry::new(package.cache_key(), data, self.cache.ttl());
        self.remember(entry, true).await;
        Ok(())
    }

    /// Verify a package and undo its content encoding
    fn open_package(&self, package: RegistryPackage) -> Result<ResolvedPackage> {
        package.verify_integrity()?;
        let content = self.codec.decode(&package.content, package.encoding())?;
        Ok(ResolvedPackage { package, content })
    }

    /// Look through persisted cache entries in priority order
    async fn persisted_cache_hit(&self, key: &str) -> Option<CacheEntry> {
        let now = OffsetDateTime::now_utc();
        for backend in &self.backends {
            match self
                .guarded(backend.kind(), "get_cache_entry", backend.get_cache_entry(key))
                .await
            {
                Ok(Some(entry)) if entry.is_expired_at(now) => {
                    debug!("Persisted cache entry {} on {} has expired", key, backend.name());
                }
                Ok(Some(entry)) if !entry.verify_integrity() => {
                    warn!("Skipping corrupt cache entry {} on {}", key, backend.name());
                }
                Ok(Some(entry)) => return Some(entry),
                Ok(None) => {}
                Err(e) => warn!("Cache lookup failed on {} backend: {}", backend.name(), e),
            }
        }
        None
    }

    // === Packages ===

    /// Publish a package, overwriting any earlier publish of the same version
    pub async fn publish_package(
        &self,
        scope: &str,
        name: &str,
        version: &str,
        content: &[u8],
        metadata: PackageMetadata,
    ) -> Result<RegistryPackage> {
        validate_segment("scope", scope)?;
        validate_segment("name", name)?;
        validate_segment("version", version)?;

        let (stored, encoding) = self.codec.encode(content)?;
        let package = RegistryPackage::new(
            scope,
            name,
            version,
            stored,
            content.len() as u64,
            encoding,
            metadata,
        );

        let outcomes = self
            .fan_out("put_package", |b| b.put_package(&package))
            .await;
        self.settle("put_package", outcomes)?;
        self.cache_package(&package).await?;

        info!(
            "Published {} ({} bytes, {} stored)",
            package.cache_key(),
            package.size,
            package.stored_size
        );
        Ok(package)
    }

    /// Find a package; `Ok(None)` when no backend has it.
    ///
    /// Content that fails its integrity check is an error, never a miss.
    pub async fn resolve_package(
        &self,
        scope: &str,
        name: &str,
        version: &str,
    ) -> Result<Option<ResolvedPackage>> {
        validate_segment("scope", scope)?;
        validate_segment("name", name)?;
        validate_segment("version", version)?;

        let key = ContentAddress::cache_key(scope, name, version);
        let cached = self.cached_package(&key).await;

        // Cached copies only name the package; content always comes from a backend
        let id = ContentAddress::package_identifier(scope, name, version);
        for (index, backend) in self.backends.iter().enumerate() {
            let found = self
                .guarded(backend.kind(), "get_package", backend.get_package(scope, &id))
                .await;
            match found {
                Ok(Some(package)) => {
                    debug!("Found {} on {} backend", key, backend.name());
                    let resolved = self.open_package(package)?;
                    self.backfill(&resolved.package, &self.backends[..index]).await;
                    let stale = cached
                        .as_ref()
                        .is_none_or(|c| c.integrity != resolved.package.integrity);
                    if stale {
                        self.cache_package(&resolved.package).await?;
                    }
                    return Ok(Some(resolved));
                }
                Ok(None) => {}
                Err(e) if backend.kind().is_mandatory() => return Err(e.into()),
                Err(e) => warn!("get_package failed on {} backend: {}", backend.name(), e),
            }
        }

        if cached.is_some() {
            debug!("Dropping cache entry {} with no backing package", key);
            self.invalidate(&key).await;
        }
        Ok(None)
    }

    /// The cached record for a key, from the in-process table or the persisted tier
    async fn cached_package(&self, key: &str) -> Option<RegistryPackage> {
        if let Some(entry) = self.cache.get(key) {
            match serde_json::from_slice::<RegistryPackage>(&entry.data) {
                Ok(package) => {
                    debug!("Cache hit for {}", key);
                    return Some(package);
                }
                Err(e) => {
                    warn!("Discarding unreadable cache entry {}: {}", key, e);
                    self.cache.remove(key);
                }
            }
        }

        let entry = self.persisted_cache_hit(key).await?;
        match serde_json::from_slice::<RegistryPackage>(&entry.data) {
            Ok(package) => {
                debug!("Persisted cache hit for {}", key);
                self.remember(entry, false).await;
                Some(package)
            }
            Err(e) => {
                warn!("Discarding unreadable persisted cache entry {}: {}", key, e);
                None
            }
        }
    }

    /// Like `resolve_package`, but absence is `PackageNotFound`
    pub async fn require_package(&self, scope: &str, name: &str, version: &str) -> Result<ResolvedPackage> {
        self.resolve_package(scope, name, version)
            .await?
            .ok_or_else(|| RegistryError::PackageNotFound(ContentAddress::cache_key(scope, name, version)))
    }

    /// Copy a package into faster backends that missed it
    async fn backfill(&self, package: &RegistryPackage, targets: &[Arc<dyn StorageBackend>]) {
        for backend in targets {
            if let Err(e) = self
                .guarded(backend.kind(), "put_package", backend.put_package(package))
                .await
            {
                warn!("Backfill of {} to {} failed: {}", package.cache_key(), backend.name(), e);
            }
        }
    }

    /// Remove a package from every backend and both cache tiers
    pub async fn delete_package(&self, scope: &str, name: &str, version: &str) -> Result<bool> {
        validate_segment("scope", scope)?;
        validate_segment("name", name)?;
        validate_segment("version", version)?;

        let id = ContentAddress::package_identifier(scope, name, version);
        let outcomes = self
            .fan_out("remove_package", |b| b.remove_package(scope, &id))
            .await;
        let removed = self.settle("remove_package", outcomes)?.into_iter().any(|r| r);

        let key = ContentAddress::cache_key(scope, name, version);
        self.invalidate(&key).await;
        if removed {
            info!("Deleted {}", key);
        }
        Ok(removed)
    }

    /// Every package across backends; the highest-priority copy wins
    async fn collect_packages(&self, scope: Option<&str>) -> Result<Vec<RegistryPackage>> {
        let outcomes = self
            .fan_out("list_packages", |b| b.list_packages(scope))
            .await;
        let mut seen = HashSet::new();
        let mut packages: Vec<RegistryPackage> = self
            .settle("list_packages", outcomes)?
            .into_iter()
            .flatten()
            .filter(|p| seen.insert((p.scope.clone(), p.id.clone())))
            .collect();
        packages.sort_by(|a, b| {
            (&a.scope, &a.name, &a.version).cmp(&(&b.scope, &b.name, &b.version))
        });
        Ok(packages)
    }

    /// Package descriptors, optionally restricted to one scope
    pub async fn list_packages(&self, scope: Option<&str>) -> Result<Vec<PackageDescriptor>> {
        if let Some(scope) = scope {
            validate_segment("scope", scope)?;
        }
        Ok(self
            .collect_packages(scope)
            .await?
            .iter()
            .map(RegistryPackage::descriptor)
            .collect())
    }

    // === Maintenance ===

    /// Counts, sizes, cache effectiveness and backend availability
    pub async fn stats(&self) -> Result<RegistryStats> {
        let packages = self.collect_packages(None).await?;
        let secrets = self.vault().list_secrets(None).await?;

        let mut packages_by_scope = BTreeMap::new();
        let mut total_size = 0;
        let mut total_stored_size = 0;
        for package in &packages {
            *packages_by_scope.entry(package.scope.clone()).or_insert(0) += 1;
            total_size += package.size;
            total_stored_size += package.stored_size;
        }

        let mut secrets_by_scope = BTreeMap::new();
        for secret in &secrets {
            *secrets_by_scope.entry(secret.scope.clone()).or_insert(0) += 1;
        }

        let health = self.fan_out("health_check", |b| b.health_check()).await;
        let backends = BackendKind::ALL
            .iter()
            .map(|&kind| {
                let matching: Vec<_> = health.iter().filter(|(b, _)| b.kind() == kind).collect();
                BackendStatus {
                    kind,
                    name: matching.first().map(|(b, _)| b.name().to_string()),
                    enabled: self.configured.contains(&kind),
                    available: matching.iter().any(|(_, r)| r.is_ok()),
                }
            })
            .collect();

        Ok(RegistryStats {
            total_packages: packages.len(),
            packages_by_scope,
            total_secrets: secrets.len(),
            secrets_by_scope,
            total_size,
            total_stored_size,
            cache: self.cache.stats().into(),
            backends,
        })
    }

    /// Empty both cache tiers; returns the number of distinct keys dropped
    pub async fn clear_cache(&self) -> Result<usize> {
        let mut keys: HashSet<String> = self.cache.keys().into_iter().collect();
        self.cache.clear();

        let outcomes = self.fan_out("list_cache_entries", |b| b.list_cache_entries()).await;
        let persisted: Vec<String> = self
            .settle_lossy("list_cache_entries", outcomes)
            .into_iter()
            .flatten()
            .map(|entry| entry.key)
            .collect();
        self.forget_persisted(&persisted).await;
        keys.extend(persisted);

        info!("Cleared {} cache entries", keys.len());
        Ok(keys.len())
    }

    /// Purge expired secrets and cache entries
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        self.vault().cleanup().await
    }

    /// Tables and indexes of the relational backend, if one is active
    pub async fn db_schema(&self) -> Result<Option<Vec<SchemaObject>>> {
        for backend in &self.backends {
            if backend.kind() != BackendKind::Relational {
                continue;
            }
            let schema = self
                .guarded(backend.kind(), "describe_schema", backend.describe_schema())
                .await?;
            if schema.is_some() {
                return Ok(schema);
            }
        }
        Ok(None)
    }

    // === Export / import ===

    /// Write every package and live secret to an archive file
    pub async fn export(&self, path: impl AsRef<Path>) -> Result<TransferSummary> {
        let packages = self.collect_packages(None).await?;
        // A corrupt package fails the export rather than the later import
        for package in &packages {
            package.verify_integrity()?;
        }
        let secrets = self.vault().list_secrets(None).await?;
        let archive = RegistryArchive::new(packages, secrets);
        archive.write_to(path.as_ref()).await?;

        let summary = archive.summary();
        info!(
            "Exported {} packages and {} secrets to {}",
            summary.packages,
            summary.secrets,
            path.as_ref().display()
        );
        Ok(summary)
    }

    /// Load an archive file. Nothing is written unless the whole archive is valid.
    pub async fn import(&self, path: impl AsRef<Path>) -> Result<TransferSummary> {
        let archive = RegistryArchive::read_from(path.as_ref()).await?;
        self.import_archive(&archive).await?;

        let summary = archive.summary();
        info!(
            "Imported {} packages and {} secrets from {}",
            summary.packages,
            summary.secrets,
            path.as_ref().display()
        );
        Ok(summary)
    }

    /// Apply a validated archive, removing newly created records if a
    /// mandatory write fails part way
    pub async fn import_archive(&self, archive: &RegistryArchive) -> Result<()> {
        archive.validate()?;

        let mut created_packages: Vec<&RegistryPackage> = Vec::new();
        let mut created_secrets: Vec<&str> = Vec::new();

        let applied = async {
            for package in &archive.packages {
                let existed = self.package_exists(&package.scope, &package.id).await?;
                let outcomes = self.fan_out("put_package", |b| b.put_package(package)).await;
                self.settle("put_package", outcomes)?;
                if !existed {
                    created_packages.push(package);
                }
                self.invalidate(&package.cache_key()).await;
            }

            let vault = self.vault();
            for secret in &archive.secrets {
                let existed = vault.exists(&secret.name).await?;
                vault.put(secret).await?;
                if !existed {
                    created_secrets.push(&secret.name);
                }
            }
            Ok::<(), RegistryError>(())
        }
        .await;

        if let Err(e) = applied {
            warn!(
                "Import failed, rolling back {} packages and {} secrets: {}",
                created_packages.len(),
                created_secrets.len(),
                e
            );
            for package in created_packages {
                let outcomes = self
                    .fan_out("remove_package", |b| b.remove_package(&package.scope, &package.id))
                    .await;
                self.settle_lossy("remove_package", outcomes);
            }
            let vault = self.vault();
            for name in created_secrets {
                if let Err(e) = vault.delete_secret(name).await {
                    warn!("Rollback of secret {} failed: {}", name, e);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Whether the mandatory backend already holds a package
    async fn package_exists(&self, scope: &str, id: &str) -> Result<bool> {
        for backend in self.backends.iter().filter(|b| b.kind().is_mandatory()) {
            let found = self
                .guarded(backend.kind(), "get_package", backend.get_package(scope, id))
                .await?;
            if found.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // === Lifecycle ===

    /// Flush and release every backend handle
    pub async fn close(self) -> Result<()> {
        let outcomes = self.fan_out("close", |b| b.close()).await;
        self.settle("close", outcomes)?;
        debug!("Registry closed");
        Ok(())
    }
}
