//! Assetgate CLI: operate the configured storage gateway from the shell.
//!
//! Configuration comes from the environment (and `.env`), see `StorageConfig::from_env`.

use anyhow::Context;
use assetgate_cli::{init_tracing, object_url, ErrorReport};
use assetgate_core::{FileCategory, StorageConfig};
use assetgate_storage::{create_storage, ConfigResolver, UrlType};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "assetgate", about = "Object storage gateway CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a storage key without storing anything
    Key {
        /// Category, e.g. listing-media, user-avatar, document
        category: FileCategory,
        /// Entity identifier
        id: String,
        /// Original filename
        filename: Option<String>,
    },
    /// Store a local file
    Store {
        /// Path to the file to store
        file: PathBuf,
        /// Explicit storage key
        #[arg(long, conflicts_with_all = ["category", "id"])]
        key: Option<String>,
        /// Category used to generate the key
        #[arg(long, requires = "id")]
        category: Option<FileCategory>,
        /// Entity identifier used to generate the key
        #[arg(long, requires = "category")]
        id: Option<String>,
        /// Declared content type
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Load an object
    Load {
        key: String,
        /// Write content to this path instead of printing it
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Check whether an object exists
    Exists { key: String },
    /// Delete an object
    Delete { key: String },
    /// List stored keys
    List,
    /// Issue a time-limited URL
    Sign {
        key: String,
        /// Lifetime in seconds (defaults to SIGNED_URL_TTL_SECS)
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Public or CDN URL for a key
    Url {
        key: String,
        /// public or cdn
        #[arg(long = "type", default_value = "public")]
        url_type: UrlType,
    },
    /// Delete every stored object
    Purge {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize response")?;
    println!("{}", out);
    Ok(())
}

async fn run(cli: Cli, config: Arc<StorageConfig>) -> anyhow::Result<()> {
    let resolver = Arc::new(ConfigResolver::new(config.clone())?);

    match cli.command {
        Commands::Key {
            category,
            id,
            filename,
        } => {
            let key = resolver.generate_key(category, &id, filename.as_deref())?;
            print_json(&json!({ "key": key, "category": category }))?;
        }
        Commands::Url { key, url_type } => {
            let url = object_url(resolver, &key, url_type)?;
            print_json(&json!({ "key": key, "url": url }))?;
        }
        command => {
            let storage = create_storage(config.clone()).await?;
            match command {
                Commands::Store {
                    file,
                    key,
                    category,
                    id,
                    content_type,
                } => {
                    let content = tokio::fs::read(&file)
                        .await
                        .with_context(|| format!("Read {}", file.display()))?;
                    let key = match (key, category, id) {
                        (Some(key), _, _) => key,
                        (None, Some(category), Some(id)) => {
                            let filename = file.file_name().map(|n| n.to_string_lossy());
                            resolver.generate_key(category, &id, filename.as_deref())?
                        }
                        _ => anyhow::bail!("Pass either --key or --category with --id"),
                    };
                    let stored = storage
                        .store(Bytes::from(content), &key, content_type.as_deref())
                        .await?;
                    print_json(&stored)?;
                }
                Commands::Load { key, out } => {
                    let content = storage.load_bytes(&key).await?;
                    match out {
                        Some(path) => {
                            tokio::fs::write(&path, &content)
                                .await
                                .with_context(|| format!("Write {}", path.display()))?;
                            print_json(&json!({
                                "key": key,
                                "size_bytes": content.len(),
                                "path": path,
                            }))?;
                        }
                        None => print_json(&json!({
                            "key": key,
                            "size_bytes": content.len(),
                            "content": String::from_utf8_lossy(&content),
                        }))?,
                    }
                }
                Commands::Exists { key } => {
                    let exists = storage.exists(&key).await?;
                    print_json(&json!({ "key": key, "exists": exists }))?;
                }
                Commands::Delete { key } => {
                    let deleted = storage.delete(&key).await?;
                    print_json(&json!({ "key": key, "deleted": deleted }))?;
                }
                Commands::List => {
                    let keys = storage.list_all().await?;
                    print_json(&json!({ "count": keys.len(), "keys": keys }))?;
                }
                Commands::Sign { key, ttl } => {
                    let ttl = ttl
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| resolver.signed_url_ttl());
                    let url = storage.get_signed_url(&key, ttl).await?;
                    print_json(&json!({
                        "key": key,
                        "url": url,
                        "ttl_secs": ttl.as_secs(),
                    }))?;
                }
                Commands::Purge { yes } => {
                    if !yes {
                        anyhow::bail!("Refusing to purge storage without --yes");
                    }
                    let deleted = storage.delete_all().await?;
                    print_json(&json!({ "deleted": deleted }))?;
                }
                Commands::Key { .. } | Commands::Url { .. } => {}
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match StorageConfig::from_env().context("Load storage configuration") {
        Ok(config) => run(cli, Arc::new(config)).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        let report = ErrorReport::from_error(&e);
        match serde_json::to_string_pretty(&report) {
            Ok(body) => eprintln!("{}", body),
            Err(_) => eprintln!("{}: {}", report.error, report.message),
        }
        std::process::exit(1);
    }
}
