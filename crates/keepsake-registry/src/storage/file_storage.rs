//! Filesystem storage backend
//!
//! The guaranteed fallback: always enabled, and the only backend whose write
//! failures fail a publish.
//!
//! Directory structure:
//! ```text
//! registry_root/
//! └── <scope>/
//!     ├── <id>.meta       package descriptor (JSON)
//!     └── <id>.content    stored bytes
//! vault_root/
//! └── <name>.secret       secret (JSON)
//! cache_root/
//! └── <sanitized-key>.cache
//! ```
//!
//! Files are written to a temporary sibling and renamed into place, so a
//! reader never observes a half-written file.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

use super::{StorageBackend, StorageResult, in_scope};
use crate::address::ContentAddress;
use crate::entities::{CacheEntry, PackageDescriptor, RegistryPackage, VaultSecret};
use crate::error::{BackendKind, StorageError};

const META_EXT: &str = "meta";
const CONTENT_EXT: &str = "content";
const SECRET_EXT: &str = "secret";
const CACHE_EXT: &str = "cache";

/// File-based storage implementation
#[derive(Debug, Clone)]
pub struct FileStorage {
    registry_root: PathBuf,
    vault_root: PathBuf,
    cache_root: PathBuf,
}

fn backend_err(context: impl std::fmt::Display, e: impl std::fmt::Display) -> StorageError {
    StorageError::backend(BackendKind::Filesystem, format!("{}: {}", context, e))
}

/// Reject anything that could escape its directory
fn validate_component(value: &str, what: &str) -> StorageResult<()> {
    if value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0'])
    {
        return Err(StorageError::invalid_key(
            BackendKind::Filesystem,
            format!("Invalid {} for a file name: {:?}", what, value),
        ));
    }
    Ok(())
}

/// Read a file, mapping a missing file to `None`
async fn read_optional(path: &Path) -> StorageResult<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(backend_err(format!("Failed to read {}", path.display()), e)),
    }
}

/// Remove a file, reporting whether it existed
async fn remove_optional(path: &Path) -> StorageResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(backend_err(format!("Failed to remove {}", path.display()), e)),
    }
}

/// Write a whole file via a temporary sibling and rename
async fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| backend_err(format!("Failed to create directory {}", parent.display()), e))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, data)
        .await
        .map_err(|e| backend_err(format!("Failed to write {}", tmp.display()), e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| backend_err(format!("Failed to move {} into place", path.display()), e))
}

/// Files in `dir` with the given extension; a missing directory is empty
async fn files_with_extension(dir: &Path, ext: &str) -> StorageResult<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(backend_err(format!("Failed to read directory {}", dir.display()), e)),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| backend_err("Failed to read directory entry", e))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(ext) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

impl FileStorage {
    /// Create a new filesystem storage, creating the three roots
    pub async fn new(
        registry_root: impl AsRef<Path>,
        vault_root: impl AsRef<Path>,
        cache_root: impl AsRef<Path>,
    ) -> StorageResult<Self> {
        let storage = Self {
            registry_root: registry_root.as_ref().to_path_buf(),
            vault_root: vault_root.as_ref().to_path_buf(),
            cache_root: cache_root.as_ref().to_path_buf(),
        };

        for dir in [&storage.registry_root, &storage.vault_root, &storage.cache_root] {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| backend_err(format!("Failed to create {}", dir.display()), e))?;
        }

        Ok(storage)
    }

    /// All three roots under one base directory: `registry/`, `vault/`, `cache/`
    pub async fn under(base: impl AsRef<Path>) -> StorageResult<Self> {
        let base = base.as_ref();
        Self::new(base.join("registry"), base.join("vault"), base.join("cache")).await
    }

    pub fn registry_root(&self) -> &Path {
        &self.registry_root
    }

    /// Get path to a package's descriptor file
    pub fn meta_file(&self, scope: &str, id: &str) -> PathBuf {
        self.registry_root
            .join(scope)
            .join(format!("{}.{}", id, META_EXT))
    }

    /// Get path to a package's content file
    pub fn content_file(&self, scope: &str, id: &str) -> PathBuf {
        self.registry_root
            .join(scope)
            .join(format!("{}.{}", id, CONTENT_EXT))
    }

    /// Get path to a secret file
    pub fn secret_file(&self, name: &str) -> PathBuf {
        self.vault_root.join(format!("{}.{}", name, SECRET_EXT))
    }

    /// Get path to a cache entry file
    pub fn cache_file(&self, key: &str) -> PathBuf {
        self.cache_root
            .join(format!("{}.{}", ContentAddress::sanitize_key(key), CACHE_EXT))
    }

    async fn read_package_at(&self, meta_path: &Path) -> StorageResult<Option<RegistryPackage>> {
        let Some(meta) = read_optional(meta_path).await? else {
            return Ok(None);
        };
        let descriptor: PackageDescriptor = serde_json::from_slice(&meta)
            .map_err(|e| backend_err(format!("Corrupt descriptor {}", meta_path.display()), e))?;

        let content_path = meta_path.with_extension(CONTENT_EXT);
        let content = read_optional(&content_path).await?.ok_or_else(|| {
            StorageError::backend(
                BackendKind::Filesystem,
                format!("Content file missing for {}", meta_path.display()),
            )
        })?;

        Ok(Some(RegistryPackage::from_parts(descriptor, content)))
    }

    async fn scope_dirs(&self, scope: Option<&str>) -> StorageResult<Vec<PathBuf>> {
        if let Some(scope) = scope {
            validate_component(scope, "scope")?;
            return Ok(vec![self.registry_root.join(scope)]);
        }

        let mut entries = match fs::read_dir(&self.registry_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(backend_err("Failed to read registry root", e)),
        };

        let mut dirs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| backend_err("Failed to read directory entry", e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if is_dir {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::Filesystem
    }

    async fn health_check(&self) -> StorageResult<()> {
        for dir in [&self.registry_root, &self.vault_root, &self.cache_root] {
            let meta = fs::metadata(dir)
                .await
                .map_err(|e| backend_err(format!("{} unavailable", dir.display()), e))?;
            if !meta.is_dir() {
                return Err(StorageError::backend(
                    BackendKind::Filesystem,
                    format!("{} is not a directory", dir.display()),
                ));
            }
        }
        Ok(())
    }

    async fn put_package(&self, package: &RegistryPackage) -> StorageResult<()> {
        validate_component(&package.scope, "scope")?;
        validate_component(&package.id, "identifier")?;

        let descriptor = serde_json::to_vec_pretty(&package.descriptor())
            .map_err(|e| backend_err("Failed to serialize descriptor", e))?;

        // Content first: a descriptor without content would read as corrupt
        write_atomic(&self.content_file(&package.scope, &package.id), &package.content).await?;
        write_atomic(&self.meta_file(&package.scope, &package.id), &descriptor).await
    }

    async fn get_package(&self, scope: &str, id: &str) -> StorageResult<Option<RegistryPackage>> {
        validate_component(scope, "scope")?;
        validate_component(id, "identifier")?;
        self.read_package_at(&self.meta_file(scope, id)).await
    }

    async fn list_packages(&self, scope: Option<&str>) -> StorageResult<Vec<RegistryPackage>> {
        let mut packages = Vec::new();
        for dir in self.scope_dirs(scope).await? {
            for meta_path in files_with_extension(&dir, META_EXT).await? {
                match self.read_package_at(&meta_path).await {
                    Ok(Some(package)) if in_scope(&package.scope, scope) => packages.push(package),
                    Ok(_) => {}
                    Err(e) => warn!(path = %meta_path.display(), error = %e, "skipping unreadable package"),
                }
            }
        }
        Ok(packages)
    }

    async fn remove_package(&self, scope: &str, id: &str) -> StorageResult<bool> {
        validate_component(scope, "scope")?;
        validate_component(id, "identifier")?;
        let had_meta = remove_optional(&self.meta_file(scope, id)).await?;
        let had_content = remove_optional(&self.content_file(scope, id)).await?;
        Ok(had_meta || had_content)
    }

    async fn put_secret(&self, secret: &VaultSecret) -> StorageResult<()> {
        validate_component(&secret.name, "secret name")?;
        let json = serde_json::to_vec_pretty(secret)
            .map_err(|e| backend_err("Failed to serialize secret", e))?;
        write_atomic(&self.secret_file(&secret.name), &json).await
    }

    async fn get_secret(&self, name: &str) -> StorageResult<Option<VaultSecret>> {
        validate_component(name, "secret name")?;
        let Some(bytes) = read_optional(&self.secret_file(name)).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| backend_err(format!("Corrupt secret file for {}", name), e))
    }

    async fn list_secrets(&self, scope: Option<&str>) -> StorageResult<Vec<VaultSecret>> {
        let mut secrets = Vec::new();
        for path in files_with_extension(&self.vault_root, SECRET_EXT).await? {
            let Some(bytes) = read_optional(&path).await? else {
                continue;
            };
            match serde_json::from_slice::<VaultSecret>(&bytes) {
                Ok(secret) if in_scope(&secret.scope, scope) => secrets.push(secret),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable secret"),
            }
        }
        Ok(secrets)
    }

    async fn remove_secret(&self, name: &str) -> StorageResult<bool> {
        validate_component(name, "secret name")?;
        remove_optional(&self.secret_file(name)).await
    }

    async fn put_cache_entry(&self, entry: &CacheEntry) -> StorageResult<()> {
        let json = serde_json::to_vec(entry)
            .map_err(|e| backend_err("Failed to serialize cache entry", e))?;
        write_atomic(&self.cache_file(&entry.key), &json).await
    }

    async fn get_cache_entry(&self, key: &str) -> StorageResult<Option<CacheEntry>> {
        let Some(bytes) = read_optional(&self.cache_file(key)).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| backend_err(format!("Corrupt cache entry for {}", key), e))
    }

    async fn list_cache_entries(&self) -> StorageResult<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        for path in files_with_extension(&self.cache_root, CACHE_EXT).await? {
            let Some(bytes) = read_optional(&path).await? else {
                continue;
            };
            match serde_json::from_slice::<CacheEntry>(&bytes) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable cache entry"),
            }
        }
        Ok(entries)
    }

    async fn remove_cache_entry(&self, key: &str) -> StorageResult<bool> {
        remove_optional(&self.cache_file(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Encoding;
    use crate::entities::{PackageMetadata, SecretType};
    use std::time::Duration;
    use tempfile::tempdir;

    fn package(scope: &str, name: &str, content: &[u8]) -> RegistryPackage {
        RegistryPackage::new(
            scope,
            name,
            "1.0.0",
            content.to_vec(),
            content.len() as u64,
            Encoding::default(),
            PackageMetadata::with_description("test"),
        )
    }

    #[tokio::test]
    async fn test_package_layout_on_disk() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::under(dir.path()).await.unwrap();
        let pkg = package("acme", "widget", b"hello");

        storage.put_package(&pkg).await.unwrap();

        let meta = dir.path().join("registry").join("acme").join(format!("{}.meta", pkg.id));
        let content = dir.path().join("registry").join("acme").join(format!("{}.content", pkg.id));
        assert!(meta.is_file());
        assert_eq!(std::fs::read(content).unwrap(), b"hello");

        let retrieved = storage.get_package("acme", &pkg.id).await.unwrap().unwrap();
        assert_eq!(retrieved, pkg);
    }

    #[tokio::test]
    async fn test_missing_package_is_none() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::under(dir.path()).await.unwrap();
        assert!(storage.get_package("acme", "0123").await.unwrap().is_none());
        assert!(!storage.remove_package("acme", "0123").await.unwrap());
        assert!(storage.list_packages(Some("acme")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_packages_across_scopes() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::under(dir.path()).await.unwrap();
        storage.put_package(&package("acme", "a", b"1")).await.unwrap();
        storage.put_package(&package("acme", "b", b"2")).await.unwrap();
        storage.put_package(&package("beta", "c", b"3")).await.unwrap();

        assert_eq!(storage.list_packages(None).await.unwrap().len(), 3);
        assert_eq!(storage.list_packages(Some("beta")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::under(dir.path()).await.unwrap();
        let mut pkg = package("acme", "widget", b"x");
        pkg.scope = "../escape".to_string();
        assert!(storage.put_package(&pkg).await.is_err());

        let secret = VaultSecret::new("../../etc/passwd", "v", SecretType::Custom, "default");
        assert!(storage.put_secret(&secret).await.is_err());
    }

    #[tokio::test]
    async fn test_secret_files() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::under(dir.path()).await.unwrap();
        let secret = VaultSecret::new("db-password", "hunter2", SecretType::Password, "prod");

        storage.put_secret(&secret).await.unwrap();
        assert!(dir.path().join("vault").join("db-password.secret").is_file());

        assert_eq!(storage.get_secret("db-password").await.unwrap(), Some(secret));
        assert_eq!(storage.list_secrets(Some("prod")).await.unwrap().len(), 1);
        assert!(storage.list_secrets(Some("dev")).await.unwrap().is_empty());
        assert!(storage.remove_secret("db-password").await.unwrap());
        assert!(storage.get_secret("db-password").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cache_entry_files() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::under(dir.path()).await.unwrap();
        let entry = CacheEntry::new("acme:widget@1.0.0", b"data".to_vec(), Duration::from_secs(30));

        storage.put_cache_entry(&entry).await.unwrap();
        assert!(storage.cache_file(&entry.key).starts_with(dir.path().join("cache")));
        assert_eq!(storage.get_cache_entry(&entry.key).await.unwrap(), Some(entry.clone()));
        assert_eq!(storage.list_cache_entries().await.unwrap().len(), 1);
        assert!(storage.remove_cache_entry(&entry.key).await.unwrap());
        assert!(storage.list_cache_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_health_check() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::under(dir.path()).await.unwrap();
        assert!(storage.health_check().await.is_ok());

        std::fs::remove_dir_all(dir.path().join("vault")).unwrap();
        assert!(storage.health_check().await.is_err());
    }
}
