//! Portable registry archives
//!
//! An archive is a single JSON document holding every package (stored bytes,
//! base64) and every live secret. Archives are validated as a whole before
//! any record is written back.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use time::OffsetDateTime;

use crate::address::ContentAddress;
use crate::entities::{RegistryPackage, VaultSecret};
use crate::error::{RegistryError, Result};
use crate::registry::validate_segment;

/// Current archive layout version
pub const ARCHIVE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryArchive {
    pub format_version: u32,

    #[serde(with = "time::serde::rfc3339")]
    pub exported_at: OffsetDateTime,

    #[serde(default)]
    pub packages: Vec<RegistryPackage>,

    #[serde(default)]
    pub secrets: Vec<VaultSecret>,
}

/// Record counts moved by an export or import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSummary {
    pub packages: usize,
    pub secrets: usize,
}

fn invalid(message: impl Into<String>) -> RegistryError {
    RegistryError::InvalidArchive(message.into())
}

impl RegistryArchive {
    pub fn new(packages: Vec<RegistryPackage>, secrets: Vec<VaultSecret>) -> Self {
        Self {
            format_version: ARCHIVE_FORMAT_VERSION,
            exported_at: OffsetDateTime::now_utc(),
            packages,
            secrets,
        }
    }

    pub fn summary(&self) -> TransferSummary {
        TransferSummary {
            packages: self.packages.len(),
            secrets: self.secrets.len(),
        }
    }

    /// Check every record; the first problem found is reported
    pub fn validate(&self) -> Result<()> {
        if self.format_version != ARCHIVE_FORMAT_VERSION {
            return Err(invalid(format!(
                "Unsupported format version {} (expected {})",
                self.format_version, ARCHIVE_FORMAT_VERSION
            )));
        }

        let mut seen = HashSet::new();
        for package in &self.packages {
            let label = package.cache_key();
            for (field, value) in [
                ("scope", &package.scope),
                ("name", &package.name),
                ("version", &package.version),
            ] {
                validate_segment(field, value)
                    .map_err(|e| invalid(format!("Package {}: {}", label, e)))?;
            }

            let expected = ContentAddress::package_identifier(&package.scope, &package.name, &package.version);
            if package.id != expected {
                return Err(invalid(format!(
                    "Package {} has identifier {} but should be {}",
                    label, package.id, expected
                )));
            }
            if !ContentAddress::is_valid_integrity(&package.integrity) {
                return Err(invalid(format!("Package {} has a malformed integrity digest", label)));
            }
            package
                .verify_integrity()
                .map_err(|e| invalid(format!("Package {}: {}", label, e)))?;
            if package.stored_size != package.content.len() as u64 {
                return Err(invalid(format!(
                    "Package {} declares {} stored bytes but carries {}",
                    label,
                    package.stored_size,
                    package.content.len()
                )));
            }
            if !seen.insert((package.scope.as_str(), package.id.as_str())) {
                return Err(invalid(format!("Package {} appears more than once", label)));
            }
        }

        let mut names = HashSet::new();
        for secret in &self.secrets {
            validate_segment("secret name", &secret.name)
                .map_err(|e| invalid(format!("Secret {}: {}", secret.name, e)))?;
            validate_segment("scope", &secret.scope)
                .map_err(|e| invalid(format!("Secret {}: {}", secret.name, e)))?;
            if !names.insert(secret.name.as_str()) {
                return Err(invalid(format!("Secret {} appears more than once", secret.name)));
            }
        }

        Ok(())
    }

    /// Read and validate an archive file
    pub async fn read_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let archive: Self = serde_json::from_slice(&bytes)
            .map_err(|e| invalid(format!("{}: {}", path.display(), e)))?;
        archive.validate()?;
        Ok(archive)
    }

    /// Write the archive as pretty-printed JSON, creating parent directories
    pub async fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Encoding;
    use crate::entities::{PackageMetadata, SecretType};

    fn package(name: &str, content: &[u8]) -> RegistryPackage {
        RegistryPackage::new(
            "acme",
            name,
            "1.0.0",
            content.to_vec(),
            content.len() as u64,
            Encoding::default(),
            PackageMetadata::default(),
        )
    }

    fn archive() -> RegistryArchive {
        RegistryArchive::new(
            vec![package("widget", b"hello"), package("gadget", b"world")],
            vec![VaultSecret::new("token", "abc", SecretType::Token, "ci")],
        )
    }

    #[test]
    fn test_valid_archive() {
        let archive = archive();
        archive.validate().unwrap();
        assert_eq!(archive.summary(), TransferSummary { packages: 2, secrets: 1 });
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut archive = archive();
        archive.format_version = 2;
        assert!(matches!(archive.validate(), Err(RegistryError::InvalidArchive(_))));
    }

    #[test]
    fn test_rejects_tampered_content() {
        let mut archive = archive();
        archive.packages[1].content[0] ^= 0xff;
        let err = archive.validate().unwrap_err();
        assert!(err.to_string().contains("acme:gadget@1.0.0"));
    }

    #[test]
    fn test_rejects_wrong_identifier_and_duplicates() {
        let mut wrong_id = archive();
        wrong_id.packages[0].id = "0".repeat(32);
        assert!(wrong_id.validate().is_err());

        let mut duplicated = archive();
        let copy = duplicated.packages[0].clone();
        duplicated.packages.push(copy);
        assert!(duplicated.validate().is_err());

        let mut secrets = archive();
        let copy = secrets.secrets[0].clone();
        secrets.secrets.push(copy);
        assert!(secrets.validate().is_err());
    }

    #[tokio::test]
    async fn test_file_roundtrip_and_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("archive.json");

        let archive = archive();
        archive.write_to(&path).await.unwrap();
        let loaded = RegistryArchive::read_from(&path).await.unwrap();
        assert_eq!(loaded, archive);

        let broken = dir.path().join("broken.json");
        tokio::fs::write(&broken, b"{\"format_version\": 1, \"packages\": [")
            .await
            .unwrap();
        assert!(matches!(
            RegistryArchive::read_from(&broken).await,
            Err(RegistryError::InvalidArchive(_))
        ));
    }
}
