//! # Keepsake Registry
//!
//! A local, content-addressed store for packages and secrets that provides:
//! - Deterministic package identifiers derived from scope, name and version
//! - SHA-512 integrity verification on every read
//! - Transparent gzip compression and optional AES-256-GCM encryption
//! - Fan-out writes across redis, SQLite, S3 and a filesystem fallback
//! - A bounded in-process cache with TTL expiry and LRU eviction
//!
//! ## Core Concepts
//!
//! - **Packages** are opaque byte payloads addressed by `scope:name@version`;
//!   republishing a version overwrites it
//! - **Secrets** are named values with a type and an optional expiry
//! - **Backends** are consulted in a fixed priority order; the filesystem
//!   backend is always present and its failures are fatal
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use keepsake_registry::{PackageMetadata, Registry, RegistryConfig, SecretType};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::open(RegistryConfig::local("./data")).await?;
//!
//! let package = registry
//!     .publish_package("acme", "widget", "1.0.0", b"hello", PackageMetadata::default())
//!     .await?;
//! println!("Published {} as {}", package.cache_key(), package.id);
//!
//! let resolved = registry.require_package("acme", "widget", "1.0.0").await?;
//! assert_eq!(resolved.content, b"hello");
//!
//! registry
//!     .vault()
//!     .store_secret("db-password", "s3cret", SecretType::Password, "prod", None, Default::default())
//!     .await?;
//!
//! registry.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod cache;
pub mod codec;
pub mod config;
pub mod entities;
pub mod error;
pub mod export;
pub mod registry;
pub mod storage;
pub mod vault;

pub use address::ContentAddress;
pub use cache::{CacheCeiling, CacheStats, TieredCache};
pub use codec::{Codec, ContentKey, Encoding};
pub use config::{ObjectStoreConfig, RegistryConfig};
pub use entities::{
    CacheEntry, PackageDescriptor, PackageMetadata, RegistryPackage, ResolvedPackage, SecretType,
    VaultSecret,
};
pub use error::{BackendKind, RegistryError, Result, StorageError, StorageErrorKind};
pub use export::{RegistryArchive, TransferSummary};
pub use registry::{BackendStatus, CacheSummary, Registry, RegistryStats};
pub use storage::{FileStorage, MemoryStorage, SchemaObject, StorageBackend};
pub use vault::{CleanupReport, Vault};

#[cfg(feature = "redis")]
pub use storage::RedisStorage;

#[cfg(feature = "s3")]
pub use storage::S3Storage;

#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
