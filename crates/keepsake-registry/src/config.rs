//! Registry configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::CacheCeiling;
use crate::codec::{Codec, ContentKey};
use crate::error::{RegistryError, Result};

/// Object store connection settings
#[derive(Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    /// S3-compatible endpoint URL
    pub endpoint: Option<String>,
    pub bucket: String,
    pub region: String,
    pub access_key: Option<String>,
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            bucket: "keepsake".to_string(),
            region: "us-east-1".to_string(),
            access_key: None,
            secret_key: None,
        }
    }
}

impl std::fmt::Debug for ObjectStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreConfig")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Registry configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Filesystem root for package files
    pub registry_path: PathBuf,

    /// Filesystem root for persisted cache entries
    pub cache_path: PathBuf,

    /// Filesystem root for secrets
    pub vault_path: PathBuf,

    /// Network cache (redis) connection string
    pub redis_url: String,

    /// Relational store location, a `sqlite:` URL or a file path
    pub sqlite_path: String,

    pub object_store: ObjectStoreConfig,

    pub enable_redis: bool,
    pub enable_sqlite: bool,
    pub enable_s3: bool,
    /// Volatile in-process tier, used when no redis server is around
    pub enable_memory: bool,

    /// Upper bound on the in-process cache
    pub cache_ceiling: CacheCeiling,

    /// Lifetime of cache entries in seconds
    pub cache_ttl_seconds: u64,

    /// gzip package content before storing
    pub compression: bool,

    /// Seal package content with AES-256-GCM
    pub encryption: bool,

    #[serde(skip_serializing)]
    pub encryption_key: Option<String>,

    /// Per-adapter call timeout in milliseconds, 0 disables it
    pub backend_timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registry_path: PathBuf::from("./registry"),
            cache_path: PathBuf::from("./cache"),
            vault_path: PathBuf::from("./vault"),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            sqlite_path: "sqlite:./keepsake.db".to_string(),
            object_store: ObjectStoreConfig::default(),
            enable_redis: false,
            enable_sqlite: false,
            enable_s3: false,
            enable_memory: false,
            cache_ceiling: CacheCeiling::default(),
            cache_ttl_seconds: 3600,
            compression: true,
            encryption: false,
            encryption_key: None,
            backend_timeout_ms: 5000,
        }
    }
}

impl std::fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("registry_path", &self.registry_path)
            .field("cache_path", &self.cache_path)
            .field("vault_path", &self.vault_path)
            .field("redis_url", &self.redis_url)
            .field("sqlite_path", &self.sqlite_path)
            .field("object_store", &self.object_store)
            .field("enable_redis", &self.enable_redis)
            .field("enable_sqlite", &self.enable_sqlite)
            .field("enable_s3", &self.enable_s3)
            .field("enable_memory", &self.enable_memory)
            .field("cache_ceiling", &self.cache_ceiling)
            .field("cache_ttl_seconds", &self.cache_ttl_seconds)
            .field("compression", &self.compression)
            .field("encryption", &self.encryption)
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "[REDACTED]"))
            .field("backend_timeout_ms", &self.backend_timeout_ms)
            .finish()
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        _ => Err(RegistryError::Config(format!("Invalid {} value: {}", name, value))),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RegistryError::Config(format!("Invalid {} value: {}", name, value)))
}

impl RegistryConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from any variable source.
    ///
    /// Unset variables keep their defaults; set but unparsable ones are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(path) = var("KEEPSAKE_REGISTRY_PATH") {
            config.registry_path = PathBuf::from(path);
        }
        if let Some(path) = var("KEEPSAKE_CACHE_PATH") {
            config.cache_path = PathBuf::from(path);
        }
        if let Some(path) = var("KEEPSAKE_VAULT_PATH") {
            config.vault_path = PathBuf::from(path);
        }
        if let Some(url) = var("KEEPSAKE_REDIS_URL") {
            config.redis_url = url;
        }
        if let Some(path) = var("KEEPSAKE_SQLITE_PATH").or_else(|| var("DATABASE_URL")) {
            config.sqlite_path = path;
        }

        config.object_store.endpoint = var("KEEPSAKE_S3_ENDPOINT");
        if let Some(bucket) = var("KEEPSAKE_S3_BUCKET") {
            config.object_store.bucket = bucket;
        }
        if let Some(region) = var("KEEPSAKE_S3_REGION") {
            config.object_store.region = region;
        }
        config.object_store.access_key = var("S3_ACCESS_KEY_ID");
        config.object_store.secret_key = var("S3_SECRET_ACCESS_KEY");

        if let Some(v) = var("KEEPSAKE_ENABLE_REDIS") {
            config.enable_redis = parse_bool("KEEPSAKE_ENABLE_REDIS", &v)?;
        }
        if let Some(v) = var("KEEPSAKE_ENABLE_SQLITE") {
            config.enable_sqlite = parse_bool("KEEPSAKE_ENABLE_SQLITE", &v)?;
        }
        if let Some(v) = var("KEEPSAKE_ENABLE_S3") {
            config.enable_s3 = parse_bool("KEEPSAKE_ENABLE_S3", &v)?;
        }
        if let Some(v) = var("KEEPSAKE_ENABLE_MEMORY") {
            config.enable_memory = parse_bool("KEEPSAKE_ENABLE_MEMORY", &v)?;
        }

        // A byte ceiling wins over an entry ceiling
        if let Some(v) = var("KEEPSAKE_CACHE_MAX_BYTES") {
            config.cache_ceiling = CacheCeiling::Bytes(parse_number("KEEPSAKE_CACHE_MAX_BYTES", &v)?);
        } else if let Some(v) = var("KEEPSAKE_CACHE_MAX_ENTRIES") {
            config.cache_ceiling =
                CacheCeiling::Entries(parse_number("KEEPSAKE_CACHE_MAX_ENTRIES", &v)?);
        }
        if let Some(v) = var("KEEPSAKE_CACHE_TTL_SECONDS") {
            config.cache_ttl_seconds = parse_number("KEEPSAKE_CACHE_TTL_SECONDS", &v)?;
        }

        if let Some(v) = var("KEEPSAKE_COMPRESSION") {
            config.compression = parse_bool("KEEPSAKE_COMPRESSION", &v)?;
        }
        if let Some(v) = var("KEEPSAKE_ENCRYPTION") {
            config.encryption = parse_bool("KEEPSAKE_ENCRYPTION", &v)?;
        }
        config.encryption_key = var("KEEPSAKE_ENCRYPTION_KEY");

        if let Some(v) = var("KEEPSAKE_BACKEND_TIMEOUT_MS") {
            config.backend_timeout_ms = parse_number("KEEPSAKE_BACKEND_TIMEOUT_MS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Configuration rooted in one directory, with only the filesystem backend
    pub fn local(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            registry_path: base.join("registry"),
            cache_path: base.join("cache"),
            vault_path: base.join("vault"),
            sqlite_path: base.join("keepsake.db").to_string_lossy().into_owned(),
            ..Self::default()
        }
    }

    /// Check settings that would otherwise fail at first use
    pub fn validate(&self) -> Result<()> {
        match self.cache_ceiling {
            CacheCeiling::Entries(0) | CacheCeiling::Bytes(0) => {
                return Err(RegistryError::Config(
                    "Cache ceiling must be greater than zero".to_string(),
                ));
            }
            _ => {}
        }
        if self.cache_ttl_seconds == 0 {
            return Err(RegistryError::Config(
                "Cache TTL must be greater than zero".to_string(),
            ));
        }
        if self.encryption && self.encryption_key.is_none() {
            return Err(RegistryError::Config(
                "Encryption is enabled but KEEPSAKE_ENCRYPTION_KEY is not set".to_string(),
            ));
        }
        if self.enable_s3 && self.object_store.endpoint.is_none() {
            return Err(RegistryError::Config(
                "Object store is enabled but KEEPSAKE_S3_ENDPOINT is not set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn backend_timeout(&self) -> Option<Duration> {
        (self.backend_timeout_ms > 0).then(|| Duration::from_millis(self.backend_timeout_ms))
    }

    /// Content key derived from the configured key material, when encryption is on
    pub fn encryption_key(&self) -> Result<Option<ContentKey>> {
        if !self.encryption {
            return Ok(None);
        }
        self.encryption_key
            .as_ref()
            .map(|material| ContentKey::derive(material.as_bytes()))
            .transpose()
    }

    /// Content codec for package payloads
    pub fn codec(&self) -> Result<Codec> {
        Ok(Codec::new(self.compression, self.encryption_key()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = RegistryConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.registry_path, PathBuf::from("./registry"));
        assert_eq!(config.cache_ceiling, CacheCeiling::Entries(1000));
        assert_eq!(config.cache_ttl(), Duration::from_secs(3600));
        assert!(config.compression);
        assert!(!config.encryption);
        assert!(!config.enable_redis && !config.enable_sqlite && !config.enable_s3);
        assert_eq!(config.backend_timeout(), Some(Duration::from_millis(5000)));
    }

    #[test]
    fn test_overrides() {
        let config = RegistryConfig::from_lookup(lookup(&[
            ("KEEPSAKE_REGISTRY_PATH", "/data/registry"),
            ("KEEPSAKE_ENABLE_SQLITE", "true"),
            ("KEEPSAKE_ENABLE_MEMORY", "yes"),
            ("DATABASE_URL", "sqlite:/data/k.db"),
            ("KEEPSAKE_CACHE_MAX_ENTRIES", "10"),
            ("KEEPSAKE_COMPRESSION", "false"),
            ("KEEPSAKE_BACKEND_TIMEOUT_MS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.registry_path, PathBuf::from("/data/registry"));
        assert!(config.enable_sqlite);
        assert!(config.enable_memory);
        assert_eq!(config.sqlite_path, "sqlite:/data/k.db");
        assert_eq!(config.cache_ceiling, CacheCeiling::Entries(10));
        assert!(!config.compression);
        assert_eq!(config.backend_timeout(), None);
    }

    #[test]
    fn test_byte_ceiling_takes_precedence() {
        let config = RegistryConfig::from_lookup(lookup(&[
            ("KEEPSAKE_CACHE_MAX_ENTRIES", "10"),
            ("KEEPSAKE_CACHE_MAX_BYTES", "4096"),
        ]))
        .unwrap();
        assert_eq!(config.cache_ceiling, CacheCeiling::Bytes(4096));
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        for vars in [
            [("KEEPSAKE_CACHE_MAX_ENTRIES", "lots")],
            [("KEEPSAKE_CACHE_TTL_SECONDS", "0")],
            [("KEEPSAKE_ENABLE_REDIS", "maybe")],
            [("KEEPSAKE_ENCRYPTION", "true")],
            [("KEEPSAKE_ENABLE_S3", "true")],
        ] {
            let result = RegistryConfig::from_lookup(lookup(&vars));
            assert!(
                matches!(result, Err(RegistryError::Config(_))),
                "expected config error for {:?}",
                vars
            );
        }
    }

    #[test]
    fn test_encryption_key_only_when_enabled() {
        let config = RegistryConfig::from_lookup(lookup(&[
            ("KEEPSAKE_ENCRYPTION", "true"),
            ("KEEPSAKE_ENCRYPTION_KEY", "hunter2"),
        ]))
        .unwrap();
        assert!(config.encryption_key().unwrap().is_some());
        assert!(!format!("{:?}", config).contains("hunter2"));

        let disabled = RegistryConfig {
            encryption: false,
            ..config
        };
        assert!(disabled.encryption_key().unwrap().is_none());
    }
}
