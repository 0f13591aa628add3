//! Redis storage backend
//!
//! The low-latency network cache tier. Everything written here carries an
//! expiry, so this backend is never the system of record.
//!
//! Key layout:
//! - `{prefix}:pkg:{scope}:{id}` package record (JSON)
//! - `{prefix}:secret:{name}` secret (JSON)
//! - `{prefix}:cache:{key}` cache entry (JSON)

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use time::OffsetDateTime;

use super::{StorageBackend, StorageResult, in_scope};
use crate::entities::{CacheEntry, RegistryPackage, VaultSecret};
use crate::error::{BackendKind, StorageError};

const SCAN_BATCH: usize = 200;

fn backend_err(context: impl std::fmt::Display, e: impl std::fmt::Display) -> StorageError {
    StorageError::backend(BackendKind::NetworkCache, format!("{}: {}", context, e))
}

/// Redis-backed storage implementation
pub struct RedisStorage {
    connection: MultiplexedConnection,
    prefix: String,
    ttl: Duration,
}

impl RedisStorage {
    /// Connect to redis.
    ///
    /// `ttl` bounds how long records without their own expiry are kept.
    pub async fn connect(url: &str, ttl: Duration) -> StorageResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| backend_err("Invalid redis connection string", e))?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| backend_err("Failed to connect to redis", e))?;

        Ok(Self {
            connection,
            prefix: "keepsake".to_string(),
            ttl,
        })
    }

    /// Use a different key prefix (for sharing one redis between registries)
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn package_key(&self, scope: &str, id: &str) -> String {
        format!("{}:pkg:{}:{}", self.prefix, scope, id)
    }

    fn secret_key(&self, name: &str) -> String {
        format!("{}:secret:{}", self.prefix, name)
    }

    fn cache_key(&self, key: &str) -> String {
        format!("{}:cache:{}", self.prefix, key)
    }

    async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Duration) -> StorageResult<()> {
        let payload = serde_json::to_vec(value).map_err(|e| backend_err("Failed to serialize", e))?;
        let millis = ttl.as_millis().clamp(1, u64::MAX as u128) as u64;
        let mut conn = self.connection.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(payload)
            .arg("PX")
            .arg(millis)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| backend_err(format!("Failed to set '{}'", key), e))
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        let mut conn = self.connection.clone();
        let payload: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_err(format!("Failed to get '{}'", key), e))?;

        match payload {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| backend_err(format!("Corrupt value at '{}'", key), e)),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_err(format!("Failed to delete '{}'", key), e))?;
        Ok(removed > 0)
    }

    /// All keys matching a glob pattern, using SCAN rather than KEYS
    async fn scan(&self, pattern: &str) -> StorageResult<Vec<String>> {
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| backend_err(format!("Failed to scan '{}'", pattern), e))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn load_all<T: DeserializeOwned>(&self, pattern: &str) -> StorageResult<Vec<T>> {
        let mut values = Vec::new();
        for key in self.scan(pattern).await? {
            // Keys can expire between SCAN and GET
            if let Some(value) = self.get_json(&key).await? {
                values.push(value);
            }
        }
        Ok(values)
    }
}

#[async_trait]
impl StorageBackend for RedisStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::NetworkCache
    }

    fn name(&self) -> &str {
        "redis"
    }

    async fn health_check(&self) -> StorageResult<()> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_err("PING failed", e))?;
        Ok(())
    }

    async fn put_package(&self, package: &RegistryPackage) -> StorageResult<()> {
        let key = self.package_key(&package.scope, &package.id);
        self.set_json(&key, package, self.ttl).await
    }

    async fn get_package(&self, scope: &str, id: &str) -> StorageResult<Option<RegistryPackage>> {
        self.get_json(&self.package_key(scope, id)).await
    }

    async fn list_packages(&self, scope: Option<&str>) -> StorageResult<Vec<RegistryPackage>> {
        let pattern = match scope {
            Some(scope) => format!("{}:pkg:{}:*", self.prefix, scope),
            None => format!("{}:pkg:*", self.prefix),
        };
        let packages: Vec<RegistryPackage> = self.load_all(&pattern).await?;
        Ok(packages
            .into_iter()
            .filter(|p| in_scope(&p.scope, scope))
            .collect())
    }

    async fn remove_package(&self, scope: &str, id: &str) -> StorageResult<bool> {
        self.delete(&self.package_key(scope, id)).await
    }

    async fn put_secret(&self, secret: &VaultSecret) -> StorageResult<()> {
        // Never outlive the secret itself
        let ttl = match secret.expires_at {
            Some(expires) => {
                let remaining = expires - OffsetDateTime::now_utc();
                if remaining <= time::Duration::ZERO {
                    self.delete(&self.secret_key(&secret.name)).await?;
                    return Ok(());
                }
                Duration::try_from(remaining).unwrap_or(self.ttl).min(self.ttl)
            }
            None => self.ttl,
        };
        self.set_json(&self.secret_key(&secret.name), secret, ttl).await
    }

    async fn get_secret(&self, name: &str) -> StorageResult<Option<VaultSecret>> {
        self.get_json(&self.secret_key(name)).await
    }

    async fn list_secrets(&self, scope: Option<&str>) -> StorageResult<Vec<VaultSecret>> {
        let secrets: Vec<VaultSecret> = self
            .load_all(&format!("{}:secret:*", self.prefix))
            .await?;
        Ok(secrets
            .into_iter()
            .filter(|s| in_scope(&s.scope, scope))
            .collect())
    }

    async fn remove_secret(&self, name: &str) -> StorageResult<bool> {
        self.delete(&self.secret_key(name)).await
    }

    async fn put_cache_entry(&self, entry: &CacheEntry) -> StorageResult<()> {
        self.set_json(&self.cache_key(&entry.key), entry, entry.ttl()).await
    }

    async fn get_cache_entry(&self, key: &str) -> StorageResult<Option<CacheEntry>> {
        self.get_json(&self.cache_key(key)).await
    }

    async fn list_cache_entries(&self) -> StorageResult<Vec<CacheEntry>> {
        self.load_all(&format!("{}:cache:*", self.prefix)).await
    }

    async fn remove_cache_entry(&self, key: &str) -> StorageResult<bool> {
        self.delete(&self.cache_key(key)).await
    }
}
