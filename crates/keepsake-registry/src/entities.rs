//! Core data structures for the keepsake registry

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::address::ContentAddress;
use crate::codec::Encoding;
use crate::error::RegistryError;

/// Serialize binary payloads as base64 strings inside JSON documents
pub(crate) mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Free-form package metadata supplied by the publisher
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Dependency name -> version requirement
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,

    /// Entry point name -> path inside the package
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", alias = "entryPoints")]
    pub entry_points: BTreeMap<String, String>,

    /// Anything else the publisher attached
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PackageMetadata {
    pub fn with_description(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Default::default()
        }
    }
}

/// A published package version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryPackage {
    /// Derived from (scope, name, version)
    pub id: String,
    pub name: String,
    pub version: String,
    pub scope: String,

    /// Stored bytes, after compression/encryption
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,

    #[serde(default)]
    pub metadata: PackageMetadata,

    /// Digest over `content` exactly as stored
    pub integrity: String,

    /// Length of the content as published
    pub size: u64,

    /// Length of `content`
    pub stored_size: u64,

    pub compressed: bool,
    pub encrypted: bool,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl RegistryPackage {
    /// Build a package record from already-encoded content
    pub fn new(
        scope: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        stored: Vec<u8>,
        original_size: u64,
        encoding: Encoding,
        metadata: PackageMetadata,
    ) -> Self {
        let scope = scope.into();
        let name = name.into();
        let version = version.into();
        let now = OffsetDateTime::now_utc();
        Self {
            id: ContentAddress::package_identifier(&scope, &name, &version),
            integrity: ContentAddress::integrity_of(&stored),
            size: original_size,
            stored_size: stored.len() as u64,
            content: stored,
            name,
            version,
            scope,
            metadata,
            compressed: encoding.compressed,
            encrypted: encoding.encrypted,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn encoding(&self) -> Encoding {
        Encoding {
            compressed: self.compressed,
            encrypted: self.encrypted,
        }
    }

    pub fn cache_key(&self) -> String {
        ContentAddress::cache_key(&self.scope, &self.name, &self.version)
    }

    /// Check the stored bytes against the recorded digest
    pub fn verify_integrity(&self) -> Result<(), RegistryError> {
        let actual = ContentAddress::integrity_of(&self.content);
        if actual != self.integrity {
            return Err(RegistryError::IntegrityMismatch {
                key: self.cache_key(),
                expected: self.integrity.clone(),
                actual,
            });
        }
        Ok(())
    }

    /// Metadata-only view, used for sidecar files
    pub fn descriptor(&self) -> PackageDescriptor {
        PackageDescriptor {
            id: self.id.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            scope: self.scope.clone(),
            metadata: self.metadata.clone(),
            integrity: self.integrity.clone(),
            size: self.size,
            stored_size: self.stored_size,
            compressed: self.compressed,
            encrypted: self.encrypted,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Reassemble a package from its descriptor and content
    pub fn from_parts(descriptor: PackageDescriptor, content: Vec<u8>) -> Self {
        Self {
            id: descriptor.id,
            name: descriptor.name,
            version: descriptor.version,
            scope: descriptor.scope,
            content,
            metadata: descriptor.metadata,
            integrity: descriptor.integrity,
            size: descriptor.size,
            stored_size: descriptor.stored_size,
            compressed: descriptor.compressed,
            encrypted: descriptor.encrypted,
            created_at: descriptor.created_at,
            updated_at: descriptor.updated_at,
        }
    }
}

/// Everything about a package except its content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    pub id: String,
    pub name: String,
    pub version: String,
    pub scope: String,
    #[serde(default)]
    pub metadata: PackageMetadata,
    pub integrity: String,
    pub size: u64,
    pub stored_size: u64,
    pub compressed: bool,
    pub encrypted: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// A package returned by a resolve, with its content decoded
#[derive(Debug, Clone)]
pub struct ResolvedPackage {
    /// The record as stored
    pub package: RegistryPackage,
    /// Content exactly as it was published
    pub content: Vec<u8>,
}

/// Classification of a secret value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretType {
    Password,
    Token,
    Key,
    Certificate,
    ApiKey,
    Jwt,
    ConnectionString,
    Custom,
}

impl SecretType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretType::Password => "password",
            SecretType::Token => "token",
            SecretType::Key => "key",
            SecretType::Certificate => "certificate",
            SecretType::ApiKey => "api-key",
            SecretType::Jwt => "jwt",
            SecretType::ConnectionString => "connection-string",
            SecretType::Custom => "custom",
        }
    }
}

impl fmt::Display for SecretType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecretType {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "password" => Ok(SecretType::Password),
            "token" => Ok(SecretType::Token),
            "key" => Ok(SecretType::Key),
            "certificate" | "cert" => Ok(SecretType::Certificate),
            "api-key" | "apikey" => Ok(SecretType::ApiKey),
            "jwt" => Ok(SecretType::Jwt),
            "connection-string" => Ok(SecretType::ConnectionString),
            "custom" => Ok(SecretType::Custom),
            other => Err(RegistryError::InvalidInput(format!("Unknown secret type: {}", other))),
        }
    }
}

/// A named secret value held in the vault
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultSecret {
    /// Primary key
    pub name: String,

    /// Opaque value; any value-level encryption is the caller's concern
    pub value: String,

    #[serde(rename = "type")]
    pub secret_type: SecretType,

    pub scope: String,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,

    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl VaultSecret {
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        secret_type: SecretType,
        scope: impl Into<String>,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            name: name.into(),
            value: value.into(),
            secret_type,
            scope: scope.into(),
            created_at: now,
            updated_at: now,
            expires_at: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn expiring_at(mut self, expires_at: OffsetDateTime) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }
}

// Keep secret values out of logs
impl fmt::Debug for VaultSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSecret")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("secret_type", &self.secret_type)
            .field("scope", &self.scope)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A cached payload with TTL and access bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,

    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,

    /// Declared size of `data` in bytes
    pub size: u64,

    /// Digest over `data`
    pub integrity: String,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// Time to live, in milliseconds
    pub ttl_ms: u64,

    pub access_count: u64,

    #[serde(with = "time::serde::rfc3339")]
    pub last_accessed: OffsetDateTime,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, data: Vec<u8>, ttl: Duration) -> Self {
        Self::new_at(key, data, ttl, OffsetDateTime::now_utc())
    }

    pub fn new_at(key: impl Into<String>, data: Vec<u8>, ttl: Duration, now: OffsetDateTime) -> Self {
        Self {
            key: key.into(),
            size: data.len() as u64,
            integrity: ContentAddress::integrity_of(&data),
            data,
            created_at: now,
            ttl_ms: ttl.as_millis().min(u64::MAX as u128) as u64,
            access_count: 0,
            last_accessed: now,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// An entry is live while `now - created_at < ttl`
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        let age = now - self.created_at;
        age >= time::Duration::milliseconds(self.ttl_ms.min(i64::MAX as u64) as i64)
    }

    pub fn verify_integrity(&self) -> bool {
        ContentAddress::verify(&self.data, &self.integrity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_new_derives_identity_and_integrity() {
        let pkg = RegistryPackage::new(
            "acme",
            "widget",
            "1.0.0",
            b"hello".to_vec(),
            5,
            Encoding::default(),
            PackageMetadata::default(),
        );
        assert_eq!(pkg.id, ContentAddress::package_identifier("acme", "widget", "1.0.0"));
        assert_eq!(pkg.integrity, ContentAddress::integrity_of(b"hello"));
        assert_eq!(pkg.stored_size, 5);
        assert!(pkg.verify_integrity().is_ok());
    }

    #[test]
    fn test_package_tamper_detected() {
        let mut pkg = RegistryPackage::new(
            "acme",
            "widget",
            "1.0.0",
            b"hello".to_vec(),
            5,
            Encoding::default(),
            PackageMetadata::default(),
        );
        pkg.content[0] ^= 0xff;
        assert!(matches!(
            pkg.verify_integrity(),
            Err(RegistryError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn test_package_json_roundtrip_preserves_binary() {
        let pkg = RegistryPackage::new(
            "acme",
            "widget",
            "1.0.0",
            vec![0, 159, 146, 150, 255],
            5,
            Encoding::default(),
            PackageMetadata::with_description("binary blob"),
        );
        let json = serde_json::to_string(&pkg).unwrap();
        let back: RegistryPackage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pkg);
    }

    #[test]
    fn test_metadata_keeps_unknown_fields() {
        let metadata: PackageMetadata = serde_json::from_str(
            r#"{"description":"d","dependencies":{"core":"^1"},"entryPoints":{"main":"index.js"},"license":"MIT"}"#,
        )
        .unwrap();
        assert_eq!(metadata.dependencies.get("core").map(String::as_str), Some("^1"));
        assert_eq!(metadata.entry_points.get("main").map(String::as_str), Some("index.js"));
        assert_eq!(metadata.extra.get("license"), Some(&serde_json::json!("MIT")));
    }

    #[test]
    fn test_secret_type_parsing() {
        assert_eq!("api-key".parse::<SecretType>().unwrap(), SecretType::ApiKey);
        assert_eq!("API_KEY".parse::<SecretType>().unwrap(), SecretType::ApiKey);
        assert_eq!(
            "connection-string".parse::<SecretType>().unwrap(),
            SecretType::ConnectionString
        );
        assert!("nonsense".parse::<SecretType>().is_err());
        assert_eq!(SecretType::Jwt.to_string(), "jwt");
    }

    #[test]
    fn test_secret_expiry() {
        let now = OffsetDateTime::now_utc();
        let secret = VaultSecret::new("db", "hunter2", SecretType::Password, "default");
        assert!(!secret.is_expired_at(now));

        let expired = secret.clone().expiring_at(now - time::Duration::seconds(1));
        assert!(expired.is_expired_at(now));

        let later = secret.expiring_at(now + time::Duration::hours(1));
        assert!(!later.is_expired_at(now));
    }

    #[test]
    fn test_secret_debug_redacts_value() {
        let secret = VaultSecret::new("db", "hunter2", SecretType::Password, "default");
        let printed = format!("{:?}", secret);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("[REDACTED]"));
    }

    #[test]
    fn test_cache_entry_ttl() {
        let now = OffsetDateTime::now_utc();
        let entry = CacheEntry::new_at("k", b"data".to_vec(), Duration::from_secs(10), now);
        assert_eq!(entry.size, 4);
        assert!(entry.verify_integrity());
        assert!(!entry.is_expired_at(now + time::Duration::seconds(9)));
        assert!(entry.is_expired_at(now + time::Duration::seconds(10)));
    }
}
