//! Subcommand implementations

use std::path::Path;

use anyhow::{Context, Result, bail};
use keepsake_registry::{PackageMetadata, Registry, SecretType, VaultSecret};
use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::Commands;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// A secret without its value
#[derive(Serialize)]
struct SecretSummary<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    secret_type: SecretType,
    scope: &'a str,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    expires_at: Option<OffsetDateTime>,
}

impl<'a> From<&'a VaultSecret> for SecretSummary<'a> {
    fn from(secret: &'a VaultSecret) -> Self {
        Self {
            name: &secret.name,
            secret_type: secret.secret_type,
            scope: &secret.scope,
            created_at: secret.created_at,
            updated_at: secret.updated_at,
            expires_at: secret.expires_at,
        }
    }
}

async fn read_content(file: Option<&Path>) -> Result<Vec<u8>> {
    match file {
        Some(path) => tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut content = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut content)
                .await
                .context("Failed to read package content from stdin")?;
            Ok(content)
        }
    }
}

async fn read_metadata(file: Option<&Path>) -> Result<PackageMetadata> {
    let Some(path) = file else {
        return Ok(PackageMetadata::default());
    };
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("Invalid metadata in {}", path.display()))
}

/// Absolute expiry for `--expires-in`; out-of-range values are an error
fn expiry_after(now: OffsetDateTime, seconds: Option<i64>) -> Result<Option<OffsetDateTime>> {
    let Some(seconds) = seconds else {
        return Ok(None);
    };
    match now.checked_add(time::Duration::seconds(seconds)) {
        Some(expires_at) => Ok(Some(expires_at)),
        None => bail!("--expires-in {} is out of range", seconds),
    }
}

pub(crate) async fn dispatch(registry: &Registry, command: Commands) -> Result<()> {
    match command {
        Commands::Publish {
            name,
            version,
            scope,
            file,
            metadata,
        } => {
            let content = read_content(file.as_deref()).await?;
            let metadata = read_metadata(metadata.as_deref()).await?;
            let package = registry
                .publish_package(&scope, &name, &version, &content, metadata)
                .await?;
            print_json(&package.descriptor())
        }

        Commands::Resolve {
            name,
            version,
            scope,
            output,
        } => {
            let resolved = registry.require_package(&scope, &name, &version).await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &resolved.content)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    print_json(&resolved.package.descriptor())
                }
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&resolved.content).await?;
                    stdout.flush().await?;
                    Ok(())
                }
            }
        }

        Commands::Delete {
            name,
            version,
            scope,
        } => {
            let deleted = registry.delete_package(&scope, &name, &version).await?;
            print_json(&json!({ "deleted": deleted }))
        }

        Commands::SecretStore {
            name,
            value,
            secret_type,
            scope,
            expires_in,
        } => {
            let secret_type: SecretType = secret_type.parse()?;
            let expires_at = expiry_after(OffsetDateTime::now_utc(), expires_in)?;
            let secret = registry
                .vault()
                .store_secret(&name, &value, secret_type, &scope, expires_at, Default::default())
                .await?;
            print_json(&SecretSummary::from(&secret))
        }

        Commands::SecretGet { name } => {
            let secret = registry.vault().require_secret(&name).await?;
            print_json(&secret)
        }

        Commands::SecretDelete { name } => {
            let deleted = registry.vault().delete_secret(&name).await?;
            print_json(&json!({ "deleted": deleted }))
        }

        Commands::ListPackages { scope } => {
            let packages = registry.list_packages(scope.as_deref()).await?;
            print_json(&packages)
        }

        Commands::ListSecrets { scope } => {
            let secrets = registry.vault().list_secrets(scope.as_deref()).await?;
            let summaries: Vec<SecretSummary> = secrets.iter().map(SecretSummary::from).collect();
            print_json(&summaries)
        }

        Commands::Stats => print_json(&registry.stats().await?),

        Commands::ClearCache => {
            let cleared = registry.clear_cache().await?;
            print_json(&json!({ "cleared": cleared }))
        }

        Commands::Cleanup => print_json(&registry.cleanup().await?),

        Commands::Export { path } => print_json(&registry.export(&path).await?),

        Commands::Import { path } => print_json(&registry.import(&path).await?),

        Commands::DbSchema => match registry.db_schema().await? {
            Some(schema) => print_json(&schema),
            None => bail!("Relational backend is not enabled (set KEEPSAKE_ENABLE_SQLITE=true)"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_after() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(expiry_after(now, None).unwrap(), None);
        assert_eq!(
            expiry_after(now, Some(60)).unwrap(),
            Some(now + time::Duration::seconds(60))
        );
    }

    #[test]
    fn test_expiry_overflow_is_an_error() {
        let now = OffsetDateTime::now_utc();
        assert!(expiry_after(now, Some(i64::MAX)).is_err());
        assert!(expiry_after(now, Some(i64::MIN)).is_err());
    }
}
