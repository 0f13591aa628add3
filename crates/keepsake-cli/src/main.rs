//! Keepsake CLI
//!
//! Publishes and resolves packages and manages vault secrets against a local
//! keepsake registry. Results are printed to stdout as JSON; logs go to stderr.

mod commands;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use keepsake_registry::{Registry, RegistryConfig};
use tracing::error;

#[derive(Parser)]
#[command(name = "keepsake", version, about = "Local package and secret registry")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Publish a package (content from --file, or stdin)
    Publish {
        name: String,
        version: String,
        scope: String,
        /// File holding the package content
        #[arg(long)]
        file: Option<PathBuf>,
        /// JSON file with description, dependencies and entry points
        #[arg(long)]
        metadata: Option<PathBuf>,
    },
    /// Resolve a package (content to --output, or stdout)
    Resolve {
        name: String,
        version: String,
        scope: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Delete a package from every backend
    Delete {
        name: String,
        version: String,
        scope: String,
    },
    /// Store a secret
    SecretStore {
        name: String,
        value: String,
        /// password, token, key, certificate, api-key, jwt, connection-string or custom
        secret_type: String,
        #[arg(long, default_value = "default")]
        scope: String,
        /// Expire the secret after this many seconds
        #[arg(long)]
        expires_in: Option<i64>,
    },
    /// Print a secret, including its value
    SecretGet { name: String },
    /// Delete a secret from every backend
    SecretDelete { name: String },
    /// List packages
    ListPackages {
        #[arg(long)]
        scope: Option<String>,
    },
    /// List secrets (values are not shown)
    ListSecrets {
        #[arg(long)]
        scope: Option<String>,
    },
    /// Counts, sizes, cache hit rate and backend availability
    Stats,
    /// Empty the in-process and persisted cache
    ClearCache,
    /// Purge expired secrets and cache entries
    Cleanup,
    /// Write every package and secret to an archive file
    Export { path: PathBuf },
    /// Load an archive file written by `export`
    Import { path: PathBuf },
    /// Show the tables and indexes of the relational backend
    DbSchema,
}

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "keepsake=info,keepsake_registry=info".to_string()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{e:#}");
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = RegistryConfig::from_env()?;
    let registry = Registry::open(config).await?;

    let result = commands::dispatch(&registry, cli.command).await;
    registry.close().await?;
    result
}
