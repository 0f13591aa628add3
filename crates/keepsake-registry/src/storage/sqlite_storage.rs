//! SQLite storage implementation
//!
//! The embedded relational store. Durable, indexed by (name, version, scope)
//! for packages and by name for secrets, and the system of record for
//! secrets and cache metadata when enabled.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::{SchemaObject, StorageBackend, StorageResult};
use crate::entities::{CacheEntry, PackageMetadata, RegistryPackage, SecretType, VaultSecret};
use crate::error::{BackendKind, StorageError};

fn backend_err(context: impl std::fmt::Display, e: impl std::fmt::Display) -> StorageError {
    StorageError::backend(BackendKind::Relational, format!("{}: {}", context, e))
}

fn format_ts(ts: OffsetDateTime) -> StorageResult<String> {
    ts.format(&Rfc3339)
        .map_err(|e| backend_err("Failed to format timestamp", e))
}

fn parse_ts(value: &str) -> StorageResult<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|e| backend_err("Failed to parse timestamp", e))
}

const PACKAGE_COLUMNS: &str = "id, scope, name, version, content, metadata, integrity, size, \
                               stored_size, compressed, encrypted, created_at, updated_at";

const SECRET_COLUMNS: &str = "name, value, secret_type, scope, created_at, updated_at, expires_at, metadata";

const CACHE_COLUMNS: &str = "key, data, size, integrity, created_at, ttl_ms, access_count, last_accessed";

/// SQLite-based storage implementation
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if missing) the database at a `sqlite:` URL
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| backend_err("Invalid database path", e))?
            .create_if_missing(true);
        Self::with_options(options).await
    }

    /// Open (creating if missing) the database file at `path`
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| backend_err("Failed to create database directory", e))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::with_options(options).await
    }

    /// Open from either a `sqlite:` URL or a plain file path
    pub async fn from_location(location: &str) -> StorageResult<Self> {
        if location.starts_with("sqlite:") {
            Self::connect(location).await
        } else {
            Self::open(location).await
        }
    }

    async fn with_options(options: SqliteConnectOptions) -> StorageResult<Self> {
        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| backend_err("Failed to connect to SQLite", e))?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Initialize database schema
    async fn init_schema(&self) -> StorageResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS packages (
                id TEXT NOT NULL,
                scope TEXT NOT NULL,
                name TEXT NOT NULL,
                version TEXT NOT NULL,
                content BLOB NOT NULL,
                metadata TEXT NOT NULL,              -- JSON
                integrity TEXT NOT NULL,
                size INTEGER NOT NULL,
                stored_size INTEGER NOT NULL,
                compressed INTEGER NOT NULL DEFAULT 0,
                encrypted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (scope, id)
            )
            "#,
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_packages_name_version_scope ON packages(name, version, scope)",
            "CREATE INDEX IF NOT EXISTS idx_packages_scope ON packages(scope)",
            r#"
            CREATE TABLE IF NOT EXISTS secrets (
                name TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                secret_type TEXT NOT NULL,
                scope TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                expires_at TEXT,
                metadata TEXT NOT NULL               -- JSON
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_secrets_scope ON secrets(scope)",
            "CREATE INDEX IF NOT EXISTS idx_secrets_expires ON secrets(expires_at)",
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                size INTEGER NOT NULL,
                integrity TEXT NOT NULL,
                created_at TEXT NOT NULL,
                ttl_ms INTEGER NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                last_accessed TEXT NOT NULL
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| backend_err("Failed to initialize schema", e))?;
        }

        Ok(())
    }

    fn package_from_row(row: &SqliteRow) -> StorageResult<RegistryPackage> {
        let metadata_json: String = row.get("metadata");
        let metadata: PackageMetadata = serde_json::from_str(&metadata_json)
            .map_err(|e| backend_err("Failed to deserialize package metadata", e))?;

        Ok(RegistryPackage {
            id: row.get("id"),
            scope: row.get("scope"),
            name: row.get("name"),
            version: row.get("version"),
            content: row.get("content"),
            metadata,
            integrity: row.get("integrity"),
            size: row.get::<i64, _>("size") as u64,
            stored_size: row.get::<i64, _>("stored_size") as u64,
            compressed: row.get::<i32, _>("compressed") == 1,
            encrypted: row.get::<i32, _>("encrypted") == 1,
            created_at: parse_ts(&row.get::<String, _>("created_at"))?,
            updated_at: parse_ts(&row.get::<String, _>("updated_at"))?,
        })
    }

    fn secret_from_row(row: &SqliteRow) -> StorageResult<VaultSecret> {
        let secret_type: SecretType = row
            .get::<String, _>("secret_type")
            .parse()
            .map_err(|e| backend_err("Unknown secret type", e))?;
        let metadata_json: String = row.get("metadata");
        let metadata = serde_json::from_str(&metadata_json)
            .map_err(|e| backend_err("Failed to deserialize secret metadata", e))?;
        let expires_at = row
            .get::<Option<String>, _>("expires_at")
            .map(|ts| parse_ts(&ts))
            .transpose()?;

        Ok(VaultSecret {
            name: row.get("name"),
            value: row.get("value"),
            secret_type,
            scope: row.get("scope"),
            created_at: parse_ts(&row.get::<String, _>("created_at"))?,
            updated_at: parse_ts(&row.get::<String, _>("updated_at"))?,
            expires_at,
            metadata,
        })
    }

    fn cache_entry_from_row(row: &SqliteRow) -> StorageResult<CacheEntry> {
        Ok(CacheEntry {
            key: row.get("key"),
            data: row.get("data"),
            size: row.get::<i64, _>("size") as u64,
            integrity: row.get("integrity"),
            created_at: parse_ts(&row.get::<String, _>("created_at"))?,
            ttl_ms: row.get::<i64, _>("ttl_ms") as u64,
            access_count: row.get::<i64, _>("access_count") as u64,
            last_accessed: parse_ts(&row.get::<String, _>("last_accessed"))?,
        })
    }
}

#[async_trait]
impl StorageBackend for SqliteStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    fn name(&self) -> &str {
        "sqlite"
    }

    async fn health_check(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| backend_err("Health check failed", e))?;
        Ok(())
    }

    async fn put_package(&self, package: &RegistryPackage) -> StorageResult<()> {
        let metadata = serde_json::to_string(&package.metadata)
            .map_err(|e| backend_err("Failed to serialize package metadata", e))?;

        sqlx::query(&format!(
            "INSERT OR REPLACE INTO packages ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            PACKAGE_COLUMNS
        ))
        .bind(&package.id)
        .bind(&package.scope)
        .bind(&package.name)
        .bind(&package.version)
        .bind(&package.content)
        .bind(metadata)
        .bind(&package.integrity)
        .bind(package.size as i64)
        .bind(package.stored_size as i64)
        .bind(if package.compressed { 1 } else { 0 })
        .bind(if package.encrypted { 1 } else { 0 })
        .bind(format_ts(package.created_at)?)
        .bind(format_ts(package.updated_at)?)
        .execute(&self.pool)
        .await
        .map_err(|e| backend_err("Failed to save package", e))?;

        Ok(())
    }

    async fn get_package(&self, scope: &str, id: &str) -> StorageResult<Option<RegistryPackage>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM packages WHERE scope = ? AND id = ?",
            PACKAGE_COLUMNS
        ))
        .bind(scope)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend_err("Failed to get package", e))?;

        row.as_ref().map(Self::package_from_row).transpose()
    }

    async fn list_packages(&self, scope: Option<&str>) -> StorageResult<Vec<RegistryPackage>> {
        let rows = match scope {
            Some(scope) => {
                sqlx::query(&format!(
                    "SELECT {} FROM packages WHERE scope = ? ORDER BY name, version",
                    PACKAGE_COLUMNS
                ))
                .bind(scope)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM packages ORDER BY scope, name, version",
                    PACKAGE_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| backend_err("Failed to list packages", e))?;

        rows.iter().map(Self::package_from_row).collect()
    }

    async fn remove_package(&self, scope: &str, id: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM packages WHERE scope = ? AND id = ?")
            .bind(scope)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| backend_err("Failed to delete package", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn put_secret(&self, secret: &VaultSecret) -> StorageResult<()> {
        let metadata = serde_json::to_string(&secret.metadata)
            .map_err(|e| backend_err("Failed to serialize secret metadata", e))?;
        let expires_at = secret.expires_at.map(format_ts).transpose()?;

        sqlx::query(&format!(
            "INSERT OR REPLACE INTO secrets ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            SECRET_COLUMNS
        ))
        .bind(&secret.name)
        .bind(&secret.value)
        .bind(secret.secret_type.as_str())
        .bind(&secret.scope)
        .bind(format_ts(secret.created_at)?)
        .bind(format_ts(secret.updated_at)?)
        .bind(expires_at)
        .bind(metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| backend_err("Failed to save secret", e))?;

        Ok(())
    }

    async fn get_secret(&self, name: &str) -> StorageResult<Option<VaultSecret>> {
        let row = sqlx::query(&format!("SELECT {} FROM secrets WHERE name = ?", SECRET_COLUMNS))
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend_err("Failed to get secret", e))?;

        row.as_ref().map(Self::secret_from_row).transpose()
    }

    async fn list_secrets(&self, scope: Option<&str>) -> StorageResult<Vec<VaultSecret>> {
        let rows = match scope {
            Some(scope) => {
                sqlx::query(&format!(
                    "SELECT {} FROM secrets WHERE scope = ? ORDER BY name",
                    SECRET_COLUMNS
                ))
                .bind(scope)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!("SELECT {} FROM secrets ORDER BY name", SECRET_COLUMNS))
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| backend_err("Failed to list secrets", e))?;

        rows.iter().map(Self::secret_from_row).collect()
    }

    async fn remove_secret(&self, name: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM secrets WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| backend_err("Failed to delete secret", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn put_cache_entry(&self, entry: &CacheEntry) -> StorageResult<()> {
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO cache_entries ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            CACHE_COLUMNS
        ))
        .bind(&entry.key)
        .bind(&entry.data)
        .bind(entry.size as i64)
        .bind(&entry.integrity)
        .bind(format_ts(entry.created_at)?)
        .bind(entry.ttl_ms.min(i64::MAX as u64) as i64)
        .bind(entry.access_count as i64)
        .bind(format_ts(entry.last_accessed)?)
        .execute(&self.pool)
        .await
        .map_err(|e| backend_err("Failed to save cache entry", e))?;

        Ok(())
    }

    async fn get_cache_entry(&self, key: &str) -> StorageResult<Option<CacheEntry>> {
        let row = sqlx::query(&format!("SELECT {} FROM cache_entries WHERE key = ?", CACHE_COLUMNS))
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend_err("Failed to get cache entry", e))?;

        row.as_ref().map(Self::cache_entry_from_row).transpose()
    }

    async fn list_cache_entries(&self) -> StorageResult<Vec<CacheEntry>> {
        let rows = sqlx::query(&format!("SELECT {} FROM cache_entries ORDER BY key", CACHE_COLUMNS))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| backend_err("Failed to list cache entries", e))?;

        rows.iter().map(Self::cache_entry_from_row).collect()
    }

    async fn remove_cache_entry(&self, key: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| backend_err("Failed to delete cache entry", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn describe_schema(&self) -> StorageResult<Option<Vec<SchemaObject>>> {
        let rows = sqlx::query(
            r#"
            SELECT type, name, tbl_name, sql FROM sqlite_master
            WHERE type IN ('table', 'index') AND name NOT LIKE 'sqlite_%'
            ORDER BY tbl_name, type DESC, name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend_err("Failed to read schema", e))?;

        Ok(Some(
            rows.iter()
                .map(|row| SchemaObject {
                    kind: row.get("type"),
                    name: row.get("name"),
                    table: row.get("tbl_name"),
                    sql: row.get("sql"),
                })
                .collect(),
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Encoding;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    async fn create_test_storage() -> (TempDir, SqliteStorage) {
        let temp_dir = tempdir().unwrap();
        let db_url = format!("sqlite:{}", temp_dir.path().join("test.db").display());
        let storage = SqliteStorage::connect(&db_url).await.unwrap();
        (temp_dir, storage)
    }

    fn package(scope: &str, name: &str, version: &str) -> RegistryPackage {
        RegistryPackage::new(
            scope,
            name,
            version,
            vec![1, 2, 3, 0, 255],
            5,
            Encoding { compressed: true, encrypted: false },
            PackageMetadata::with_description("sqlite test"),
        )
    }

    #[tokio::test]
    async fn test_package_crud() {
        let (_dir, storage) = create_test_storage().await;
        let pkg = package("acme", "widget", "1.0.0");

        storage.put_package(&pkg).await.unwrap();
        let retrieved = storage.get_package("acme", &pkg.id).await.unwrap().unwrap();
        assert_eq!(retrieved, pkg);

        // Republish overwrites in place
        let mut updated = pkg.clone();
        updated.content = vec![9, 9];
        storage.put_package(&updated).await.unwrap();
        assert_eq!(storage.list_packages(None).await.unwrap().len(), 1);
        assert_eq!(
            storage.get_package("acme", &pkg.id).await.unwrap().unwrap().content,
            vec![9, 9]
        );

        assert!(storage.remove_package("acme", &pkg.id).await.unwrap());
        assert!(storage.get_package("acme", &pkg.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_packages_by_scope() {
        let (_dir, storage) = create_test_storage().await;
        storage.put_package(&package("acme", "a", "1")).await.unwrap();
        storage.put_package(&package("acme", "a", "2")).await.unwrap();
        storage.put_package(&package("beta", "a", "1")).await.unwrap();

        assert_eq!(storage.list_packages(Some("acme")).await.unwrap().len(), 2);
        assert_eq!(storage.list_packages(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_secret_crud() {
        let (_dir, storage) = create_test_storage().await;
        let expires = OffsetDateTime::now_utc() + time::Duration::hours(1);
        let mut secret =
            VaultSecret::new("api", "s3cr3t", SecretType::ApiKey, "prod").expiring_at(expires);
        secret
            .metadata
            .insert("owner".to_string(), serde_json::json!("ops"));

        storage.put_secret(&secret).await.unwrap();
        let retrieved = storage.get_secret("api").await.unwrap().unwrap();
        assert_eq!(retrieved, secret);
        assert_eq!(storage.list_secrets(Some("prod")).await.unwrap().len(), 1);
        assert!(storage.remove_secret("api").await.unwrap());
        assert!(!storage.remove_secret("api").await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_entry_crud() {
        let (_dir, storage) = create_test_storage().await;
        let entry = CacheEntry::new("acme:widget@1.0.0", b"data".to_vec(), Duration::from_secs(30));

        storage.put_cache_entry(&entry).await.unwrap();
        assert_eq!(storage.get_cache_entry(&entry.key).await.unwrap(), Some(entry.clone()));
        assert_eq!(storage.list_cache_entries().await.unwrap().len(), 1);
        assert!(storage.remove_cache_entry(&entry.key).await.unwrap());
    }

    #[tokio::test]
    async fn test_describe_schema_lists_tables_and_indexes() {
        let (_dir, storage) = create_test_storage().await;
        let schema = storage.describe_schema().await.unwrap().unwrap();

        let names: Vec<&str> = schema.iter().map(|o| o.name.as_str()).collect();
        for expected in [
            "packages",
            "secrets",
            "cache_entries",
            "idx_packages_name_version_scope",
            "idx_secrets_scope",
        ] {
            assert!(names.contains(&expected), "missing {}", expected);
        }
        let index = schema
            .iter()
            .find(|o| o.name == "idx_packages_name_version_scope")
            .unwrap();
        assert_eq!(index.kind, "index");
        assert_eq!(index.table, "packages");
    }

    #[tokio::test]
    async fn test_open_plain_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("registry.db");
        let storage = SqliteStorage::from_location(path.to_str().unwrap()).await.unwrap();
        assert!(storage.health_check().await.is_ok());
        assert!(path.exists());
        storage.close().await.unwrap();
    }
}
