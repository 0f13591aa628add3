//! S3-compatible storage implementation using MinIO client
//!
//! Works with AWS S3, MinIO, and any S3-compatible object storage. Package
//! content is kept as a raw object next to its descriptor so large payloads
//! are never base64-inflated.
//!
//! Key layout:
//! - `packages/{scope}/{id}.meta` package descriptor (JSON)
//! - `packages/{scope}/{id}.content` stored bytes
//! - `secrets/{name}.json`
//! - `cache/{sanitized-key}.json`

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use minio::s3::{
    client::Client,
    creds::StaticProvider,
    http::BaseUrl,
    segmented_bytes::SegmentedBytes,
    types::{S3Api, ToStream},
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::str::FromStr;
use tracing::warn;

use super::{StorageBackend, StorageResult, in_scope};
use crate::address::ContentAddress;
use crate::entities::{CacheEntry, PackageDescriptor, RegistryPackage, VaultSecret};
use crate::error::{BackendKind, StorageError};

fn backend_err(message: impl Into<String>) -> StorageError {
    StorageError::backend(BackendKind::ObjectStore, message)
}

fn is_not_found(e: &impl std::fmt::Display) -> bool {
    let msg = e.to_string();
    msg.contains("NoSuchKey") || msg.contains("404")
}

/// Connection settings for an S3-compatible endpoint
#[derive(Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub bucket: String,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

impl std::fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Settings")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// S3-compatible storage implementation using MinIO client
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    /// Create a new S3 storage instance
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client from settings and make sure the bucket exists
    pub async fn connect(settings: &S3Settings) -> StorageResult<Self> {
        let mut base_url = BaseUrl::from_str(&settings.endpoint)
            .map_err(|e| backend_err(format!("Invalid S3 endpoint: {}", e)))?;
        if let Some(region) = &settings.region {
            base_url.region = region.clone();
        }

        let provider = match (&settings.access_key, &settings.secret_key) {
            (Some(access), Some(secret)) => {
                Some(Box::new(StaticProvider::new(access, secret, None)) as Box<_>)
            }
            _ => None,
        };

        let client = Client::new(base_url, provider, None, None)
            .map_err(|e| backend_err(format!("Failed to create S3 client: {}", e)))?;

        let storage = Self::new(client, settings.bucket.clone());
        storage.ensure_bucket().await?;
        Ok(storage)
    }

    /// Ensure bucket exists (create if it doesn't)
    pub async fn ensure_bucket(&self) -> StorageResult<()> {
        let response = self
            .client
            .bucket_exists(&self.bucket)
            .send()
            .await
            .map_err(|e| backend_err(format!("Failed to check bucket '{}': {}", self.bucket, e)))?;

        if !response.exists {
            self.client
                .create_bucket(&self.bucket)
                .send()
                .await
                .map_err(|e| {
                    backend_err(format!("Failed to create bucket '{}': {}", self.bucket, e))
                })?;
        }
        Ok(())
    }

    /// Validate S3 key format
    fn validate_key(key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > 1024 {
            return Err(StorageError::invalid_key(
                BackendKind::ObjectStore,
                "Key must be between 1 and 1024 characters",
            ));
        }

        if key.starts_with('/') || key.ends_with('/') || key.split('/').any(|part| part == "..") {
            return Err(StorageError::invalid_key(
                BackendKind::ObjectStore,
                format!("Invalid object key: {}", key),
            ));
        }

        Ok(())
    }

    pub fn meta_key(scope: &str, id: &str) -> String {
        format!("packages/{}/{}.meta", scope, id)
    }

    pub fn content_key(scope: &str, id: &str) -> String {
        format!("packages/{}/{}.content", scope, id)
    }

    pub fn secret_key(name: &str) -> String {
        format!("secrets/{}.json", name)
    }

    pub fn cache_key(key: &str) -> String {
        format!("cache/{}.json", ContentAddress::sanitize_key(key))
    }

    /// Key prefix for listing packages, optionally within one scope
    pub fn packages_prefix(scope: Option<&str>) -> String {
        match scope {
            Some(scope) => format!("packages/{}/", scope),
            None => "packages/".to_string(),
        }
    }

    async fn put_object(&self, key: &str, data: Vec<u8>) -> StorageResult<()> {
        Self::validate_key(key)?;
        let bytes = SegmentedBytes::from(Bytes::from(data));
        self.client
            .put_object(&self.bucket, key, bytes)
            .send()
            .await
            .map_err(|e| backend_err(format!("Failed to put object '{}': {}", key, e)))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Self::validate_key(key)?;
        let response = match self.client.get_object(&self.bucket, key).send().await {
            Ok(response) => response,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(backend_err(format!("Failed to get object '{}': {}", key, e))),
        };

        let content = response
            .content
            .to_segmented_bytes()
            .await
            .map_err(|e| backend_err(format!("Failed to read object '{}': {}", key, e)))?;

        Ok(Some(content.to_bytes().to_vec()))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Self::validate_key(key)?;
        match self.client.stat_object(&self.bucket, key).send().await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(backend_err(format!(
                "Failed to check existence of object '{}': {}",
                key, e
            ))),
        }
    }

    /// Delete an object, reporting whether it existed
    async fn delete_object(&self, key: &str) -> StorageResult<bool> {
        if !self.exists(key).await? {
            return Ok(false);
        }
        self.client
            .delete_object(&self.bucket, key)
            .send()
            .await
            .map_err(|e| backend_err(format!("Failed to delete object '{}': {}", key, e)))?;
        Ok(true)
    }

    /// List object keys with a given prefix
    pub async fn list_keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut stream = self
            .client
            .list_objects(&self.bucket)
            .prefix(Some(prefix.to_string()))
            .recursive(true)
            .to_stream()
            .await;

        while let Some(result) = stream.next().await {
            let response = result.map_err(|e| {
                backend_err(format!("Failed to list objects with prefix '{}': {}", prefix, e))
            })?;
            keys.extend(response.contents.into_iter().map(|entry| entry.name));
        }

        keys.sort();
        Ok(keys)
    }

    async fn put_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> StorageResult<()> {
        let json = serde_json::to_vec(value)
            .map_err(|e| backend_err(format!("Failed to serialize '{}': {}", key, e)))?;
        self.put_object(key, json).await
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.get_object(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| backend_err(format!("Corrupt object '{}': {}", key, e))),
            None => Ok(None),
        }
    }

    async fn read_package(&self, meta_key: &str) -> StorageResult<Option<RegistryPackage>> {
        let Some(descriptor) = self.get_json::<PackageDescriptor>(meta_key).await? else {
            return Ok(None);
        };
        let content_key = Self::content_key(&descriptor.scope, &descriptor.id);
        let content = self
            .get_object(&content_key)
            .await?
            .ok_or_else(|| backend_err(format!("Content object missing for '{}'", meta_key)))?;
        Ok(Some(RegistryPackage::from_parts(descriptor, content)))
    }
}

#[async_trait]
impl StorageBackend for S3Storage {
    fn kind(&self) -> BackendKind {
        BackendKind::ObjectStore
    }

    fn name(&self) -> &str {
        "s3"
    }

    async fn health_check(&self) -> StorageResult<()> {
        let response = self
            .client
            .bucket_exists(&self.bucket)
            .send()
            .await
            .map_err(|e| backend_err(format!("Failed to reach bucket '{}': {}", self.bucket, e)))?;
        if response.exists {
            Ok(())
        } else {
            Err(backend_err(format!("Bucket '{}' does not exist", self.bucket)))
        }
    }

    async fn put_package(&self, package: &RegistryPackage) -> StorageResult<()> {
        self.put_object(
            &Self::content_key(&package.scope, &package.id),
            package.content.clone(),
        )
        .await?;
        self.put_json(&Self::meta_key(&package.scope, &package.id), &package.descriptor())
            .await
    }

    async fn get_package(&self, scope: &str, id: &str) -> StorageResult<Option<RegistryPackage>> {
        self.read_package(&Self::meta_key(scope, id)).await
    }

    async fn list_packages(&self, scope: Option<&str>) -> StorageResult<Vec<RegistryPackage>> {
        let mut packages = Vec::new();
        for key in self.list_keys(&Self::packages_prefix(scope)).await? {
            if !key.ends_with(".meta") {
                continue;
            }
            match self.read_package(&key).await {
                Ok(Some(package)) if in_scope(&package.scope, scope) => packages.push(package),
                Ok(_) => {}
                Err(e) => warn!(key, error = %e, "skipping unreadable package object"),
            }
        }
        Ok(packages)
    }

    async fn remove_package(&self, scope: &str, id: &str) -> StorageResult<bool> {
        let had_meta = self.delete_object(&Self::meta_key(scope, id)).await?;
        let had_content = self.delete_object(&Self::content_key(scope, id)).await?;
        Ok(had_meta || had_content)
    }

    async fn put_secret(&self, secret: &VaultSecret) -> StorageResult<()> {
        self.put_json(&Self::secret_key(&secret.name), secret).await
    }

    async fn get_secret(&self, name: &str) -> StorageResult<Option<VaultSecret>> {
        self.get_json(&Self::secret_key(name)).await
    }

    async fn list_secrets(&self, scope: Option<&str>) -> StorageResult<Vec<VaultSecret>> {
        let mut secrets = Vec::new();
        for key in self.list_keys("secrets/").await? {
            if let Some(secret) = self.get_json::<VaultSecret>(&key).await? {
                if in_scope(&secret.scope, scope) {
                    secrets.push(secret);
                }
            }
        }
        Ok(secrets)
    }

    async fn remove_secret(&self, name: &str) -> StorageResult<bool> {
        self.delete_object(&Self::secret_key(name)).await
    }

    async fn put_cache_entry(&self, entry: &CacheEntry) -> StorageResult<()> {
        self.put_json(&Self::cache_key(&entry.key), entry).await
    }

    async fn get_cache_entry(&self, key: &str) -> StorageResult<Option<CacheEntry>> {
        self.get_json(&Self::cache_key(key)).await
    }

    async fn list_cache_entries(&self) -> StorageResult<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        for key in self.list_keys("cache/").await? {
            if let Some(entry) = self.get_json::<CacheEntry>(&key).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn remove_cache_entry(&self, key: &str) -> StorageResult<bool> {
        self.delete_object(&Self::cache_key(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        assert_eq!(S3Storage::meta_key("acme", "abc123"), "packages/acme/abc123.meta");
        assert_eq!(S3Storage::content_key("acme", "abc123"), "packages/acme/abc123.content");
        assert_eq!(S3Storage::secret_key("db-password"), "secrets/db-password.json");
        assert!(S3Storage::cache_key("acme:widget@1.0.0").starts_with("cache/acme_widget_1.0.0-"));
    }

    #[test]
    fn test_prefix_generation() {
        assert_eq!(S3Storage::packages_prefix(Some("acme")), "packages/acme/");
        assert_eq!(S3Storage::packages_prefix(None), "packages/");
    }

    #[test]
    fn test_key_validation() {
        assert!(S3Storage::validate_key("packages/acme/abc.meta").is_ok());
        assert!(S3Storage::validate_key("").is_err());
        assert!(S3Storage::validate_key("/starts-with-slash").is_err());
        assert!(S3Storage::validate_key("ends-with-slash/").is_err());
        assert!(S3Storage::validate_key("packages/../escape").is_err());
        assert!(S3Storage::validate_key(&"x".repeat(1025)).is_err());
    }

    #[test]
    fn test_settings_debug_redacts_secret_key() {
        let settings = S3Settings {
            endpoint: "http://localhost:9000".to_string(),
            bucket: "keepsake".to_string(),
            region: None,
            access_key: Some("minio".to_string()),
            secret_key: Some("minio-secret".to_string()),
        };
        let printed = format!("{:?}", settings);
        assert!(!printed.contains("minio-secret"));
    }
}
