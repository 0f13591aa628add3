//! Secret storage on top of the registry backends
//!
//! Secrets follow the same backend cascade as packages but are never
//! compressed, and their cache entries stay in-process. An expired secret is
//! invisible to reads and listings even before `cleanup` removes it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::address::ContentAddress;
use crate::entities::{CacheEntry, SecretType, VaultSecret};
use crate::error::{RegistryError, Result};
use crate::registry::{Registry, validate_segment};

/// What a maintenance pass removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Names of expired secrets purged from at least one backend
    pub expired_secrets: Vec<String>,
    /// Distinct cache keys dropped from either cache tier
    pub expired_cache_entries: usize,
}

/// Secret operations of a registry
pub struct Vault<'a> {
    registry: &'a Registry,
}

impl<'a> Vault<'a> {
    pub(crate) fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Store or overwrite a secret. An overwrite keeps the original creation time.
    pub async fn store_secret(
        &self,
        name: &str,
        value: &str,
        secret_type: SecretType,
        scope: &str,
        expires_at: Option<OffsetDateTime>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<VaultSecret> {
        validate_segment("secret name", name)?;
        validate_segment("scope", scope)?;

        let mut secret = VaultSecret::new(name, value, secret_type, scope);
        if let Some(expires) = expires_at {
            if expires <= secret.created_at {
                return Err(RegistryError::InvalidInput(format!(
                    "Expiry of secret {} is in the past",
                    name
                )));
            }
            secret = secret.expiring_at(expires);
        }
        secret.metadata = metadata;

        if let Some(previous) = self.lookup(name).await? {
            secret.created_at = previous.created_at;
        }

        self.put(&secret).await?;
        info!("Stored secret {} ({}) in scope {}", name, secret_type, scope);
        Ok(secret)
    }

    /// Write a secret to every backend and the in-process cache
    pub(crate) async fn put(&self, secret: &VaultSecret) -> Result<()> {
        let outcomes = self
            .registry
            .fan_out("put_secret", |b| b.put_secret(secret))
            .await;
        self.registry.settle("put_secret", outcomes)?;
        self.remember(secret).await
    }

    async fn remember(&self, secret: &VaultSecret) -> Result<()> {
        let key = ContentAddress::secret_cache_key(&secret.name);
        let mut ttl = self.registry.cache().ttl();
        if let Some(expires) = secret.expires_at {
            let remaining = expires - OffsetDateTime::now_utc();
            match Duration::try_from(remaining) {
                Ok(remaining) if !remaining.is_zero() => ttl = ttl.min(remaining),
                _ => {
                    self.registry.cache().remove(&key);
                    return Ok(());
                }
            }
        }

        let entry = CacheEntry::new(key, serde_json::to_vec(secret)?, ttl);
        self.registry.remember(entry, false).await;
        Ok(())
    }

    /// First copy of a secret in priority order, expired or not
    async fn lookup(&self, name: &str) -> Result<Option<VaultSecret>> {
        for backend in self.registry.backends() {
            match self
                .registry
                .guarded(backend.kind(), "get_secret", backend.get_secret(name))
                .await
            {
                Ok(Some(secret)) => return Ok(Some(secret)),
                Ok(None) => {}
                Err(e) if backend.kind().is_mandatory() => return Err(e.into()),
                Err(e) => warn!("get_secret failed on {} backend: {}", backend.name(), e),
            }
        }
        Ok(None)
    }

    pub(crate) async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.lookup(name).await?.is_some())
    }

    /// Read a live secret; `Ok(None)` when absent or expired
    pub async fn get_secret(&self, name: &str) -> Result<Option<VaultSecret>> {
        validate_segment("secret name", name)?;

        let key = ContentAddress::secret_cache_key(name);
        let now = OffsetDateTime::now_utc();
        let cache = self.registry.cache();

        if let Some(entry) = cache.get(&key) {
            match serde_json::from_slice::<VaultSecret>(&entry.data) {
                Ok(secret) if secret.is_expired_at(now) => {
                    cache.remove(&key);
                    return Ok(None);
                }
                Ok(secret) => {
                    debug!("Cache hit for {}", key);
                    return Ok(Some(secret));
                }
                Err(e) => {
                    warn!("Discarding unreadable cache entry {}: {}", key, e);
                    cache.remove(&key);
                }
            }
        }

        let backends = self.registry.backends();
        for (index, backend) in backends.iter().enumerate() {
            let found = self
                .registry
                .guarded(backend.kind(), "get_secret", backend.get_secret(name))
                .await;
            match found {
                Ok(Some(secret)) if secret.is_expired_at(now) => {
                    debug!("Secret {} on {} has expired", name, backend.name());
                    return Ok(None);
                }
                Ok(Some(secret)) => {
                    for faster in &backends[..index] {
                        if let Err(e) = self
                            .registry
                            .guarded(faster.kind(), "put_secret", faster.put_secret(&secret))
                            .await
                        {
                            warn!("Backfill of secret {} to {} failed: {}", name, faster.name(), e);
                        }
                    }
                    self.remember(&secret).await?;
                    return Ok(Some(secret));
                }
                Ok(None) => {}
                Err(e) if backend.kind().is_mandatory() => return Err(e.into()),
                Err(e) => warn!("get_secret failed on {} backend: {}", backend.name(), e),
            }
        }

        Ok(None)
    }

    /// Like `get_secret`, but absence is `SecretNotFound`
    pub async fn require_secret(&self, name: &str) -> Result<VaultSecret> {
        self.get_secret(name)
            .await?
            .ok_or_else(|| RegistryError::SecretNotFound(name.to_string()))
    }

    /// Live secrets, optionally restricted to one scope, sorted by name
    pub async fn list_secrets(&self, scope: Option<&str>) -> Result<Vec<VaultSecret>> {
        if let Some(scope) = scope {
            validate_segment("scope", scope)?;
        }

        let outcomes = self
            .registry
            .fan_out("list_secrets", |b| b.list_secrets(scope))
            .await;
        let now = OffsetDateTime::now_utc();
        let mut seen = HashSet::new();
        let mut secrets: Vec<VaultSecret> = self
            .registry
            .settle("list_secrets", outcomes)?
            .into_iter()
            .flatten()
            .filter(|s| seen.insert(s.name.clone()))
            .filter(|s| !s.is_expired_at(now))
            .collect();
        secrets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(secrets)
    }

    /// Remove a secret from every backend and the cache
    pub async fn delete_secret(&self, name: &str) -> Result<bool> {
        validate_segment("secret name", name)?;

        let outcomes = self
            .registry
            .fan_out("remove_secret", |b| b.remove_secret(name))
            .await;
        let removed = self
            .registry
            .settle("remove_secret", outcomes)?
            .into_iter()
            .any(|r| r);
        self.registry
            .cache()
            .remove(&ContentAddress::secret_cache_key(name));

        if removed {
            info!("Deleted secret {}", name);
        }
        Ok(removed)
    }

    /// Purge expired secrets from every backend, then expired cache entries
    /// from both cache tiers
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        let now = OffsetDateTime::now_utc();
        let cache = self.registry.cache();

        let mut purged = BTreeSet::new();
        let listed = self
            .registry
            .fan_out("list_secrets", |b| b.list_secrets(None))
            .await;
        for (backend, result) in listed {
            let secrets = match result {
                Ok(secrets) => secrets,
                Err(e) if backend.kind().is_mandatory() => return Err(e.into()),
                Err(e) => {
                    warn!("list_secrets failed on {} backend: {}", backend.name(), e);
                    continue;
                }
            };
            for secret in secrets.into_iter().filter(|s| s.is_expired_at(now)) {
                match self
                    .registry
                    .guarded(backend.kind(), "remove_secret", backend.remove_secret(&secret.name))
                    .await
                {
                    Ok(_) => {
                        purged.insert(secret.name);
                    }
                    Err(e) if backend.kind().is_mandatory() => return Err(e.into()),
                    Err(e) => warn!("Failed to purge secret {} from {}: {}", secret.name, backend.name(), e),
                }
            }
        }

        let mut expired_keys = BTreeSet::new();
        for name in &purged {
            let key = ContentAddress::secret_cache_key(name);
            if cache.remove(&key).is_some() {
                expired_keys.insert(key);
            }
        }

        let listed = self
            .registry
            .fan_out("list_cache_entries", |b| b.list_cache_entries())
            .await;
        for (backend, result) in listed {
            let entries = match result {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("list_cache_entries failed on {} backend: {}", backend.name(), e);
                    continue;
                }
            };
            for entry in entries.into_iter().filter(|e| e.is_expired_at(now)) {
                match self
                    .registry
                    .guarded(backend.kind(), "remove_cache_entry", backend.remove_cache_entry(&entry.key))
                    .await
                {
                    Ok(_) => {
                        expired_keys.insert(entry.key);
                    }
                    Err(e) => warn!("Failed to purge cache entry {} from {}: {}", entry.key, backend.name(), e),
                }
            }
        }
        expired_keys.extend(cache.purge_expired_at(now));

        let report = CleanupReport {
            expired_secrets: purged.into_iter().collect(),
            expired_cache_entries: expired_keys.len(),
        };
        info!(
            "Cleanup removed {} expired secrets and {} expired cache entries",
            report.expired_secrets.len(),
            report.expired_cache_entries
        );
        Ok(report)
    }
}
