//! gidstore CLI
//!
//! Command-line interface for gidstore operations:
//! - Resolve metrics to global IDs
//! - Look up, inspect and delete identities
//! - Defragment and inspect the store
//!
//! Talks to a running server by default; `--data-dir` opens a store directly.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use gidstore::api::dto::{IdentityResponse, StatsResponse};
use gidstore::backend::{IdentityBackend, LocalBackend, RemoteBackend};
use gidstore::config::generate_default_config;
use gidstore::store::{MetricStore, StoreConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "gidstore-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Stable global IDs for metrics")]
#[command(long_about = "gidstore assigns every metric a permanent global ID, keyed by its name and/or an opaque binary key.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// API server URL
    #[arg(long, default_value = "http://localhost:8090", global = true)]
    pub api_url: String,

    /// Open the store in this directory instead of calling a server
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, default_value = "10", global = true)]
    pub timeout: u64,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve a metric to its global ID, creating it if needed
    Resolve {
        /// Metric name
        #[arg(short, long)]
        name: Option<String>,
        /// Opaque key, hex encoded
        #[arg(short, long)]
        opaque: Option<String>,
    },

    /// Look up a global ID without creating anything
    Lookup {
        /// Metric name
        #[arg(short, long, conflicts_with = "opaque")]
        name: Option<String>,
        /// Opaque key, hex encoded
        #[arg(short, long)]
        opaque: Option<String>,
    },

    /// Show the record of a global ID
    Get {
        global_id: i64,
    },

    /// Delete a global ID
    Delete {
        global_id: i64,
    },

    /// Compact the identity log
    Defrag,

    /// Show store counters
    Stats,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("Config written to {}", path.display());
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let local_store = match &cli.data_dir {
        Some(dir) => Some(Arc::new(
            MetricStore::open(StoreConfig::new(dir))
                .with_context(|| format!("opening store at {}", dir.display()))?,
        )),
        None => None,
    };

    let backend: Arc<dyn IdentityBackend> = match &local_store {
        Some(store) => Arc::new(LocalBackend::new(Arc::clone(store))),
        None => Arc::new(RemoteBackend::new(
            &cli.api_url,
            Duration::from_secs(cli.timeout),
        )?),
    };

    let result = run(&cli, backend.as_ref()).await;

    drop(backend);
    if let Some(store) = local_store {
        match Arc::try_unwrap(store) {
            Ok(store) => store.close()?,
            Err(store) => store.flush()?,
        }
    }

    result
}

async fn run(cli: &Cli, backend: &dyn IdentityBackend) -> anyhow::Result<()> {
    let json = cli.format == "json";

    match &cli.command {
        Commands::Resolve { name, opaque } => {
            let opaque = opaque.as_deref().map(parse_hex).transpose()?;
            if name.is_none() && opaque.is_none() {
                bail!("pass --name and/or --opaque");
            }

            let global_id = backend.resolve(name.clone(), opaque).await?;
            if json {
                println!("{}", serde_json::json!({ "global_id": global_id }));
            } else {
                println!("{}", global_id);
            }
        }

        Commands::Lookup { name, opaque } => {
            let found = match (name, opaque) {
                (Some(name), _) => backend.lookup_by_name(name).await?,
                (None, Some(opaque)) => backend.lookup_by_opaque(&parse_hex(opaque)?).await?,
                (None, None) => bail!("pass --name or --opaque"),
            };

            match found {
                Some(global_id) if json => {
                    println!("{}", serde_json::json!({ "global_id": global_id }))
                }
                Some(global_id) => println!("{}", global_id),
                None => {
                    eprintln!("Not found");
                    std::process::exit(1);
                }
            }
        }

        Commands::Get { global_id } => {
            let Some(identity) = backend.get(*global_id).await? else {
                eprintln!("Identity {} not found", global_id);
                std::process::exit(1);
            };

            let response = IdentityResponse::from(&identity);
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("{:<12} {}", "Global ID", response.global_id);
                println!("{:<12} {}", "Name", response.name.as_deref().unwrap_or("-"));
                println!(
                    "{:<12} {}",
                    "Opaque key",
                    response.opaque_key.as_deref().unwrap_or("-")
                );
                println!(
                    "{:<12} {}",
                    "Created",
                    response
                        .created_at_iso
                        .map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
                        .unwrap_or_else(|| response.created_at.to_string())
                );
            }
        }

        Commands::Delete { global_id } => {
            if backend.delete(*global_id).await? {
                println!("Deleted {}", global_id);
            } else {
                eprintln!("Identity {} not found", global_id);
                std::process::exit(1);
            }
        }

        Commands::Defrag => {
            let report = backend.defragment().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Defragmented in {} ms: {} -> {} records, {} -> {} bytes",
                    report.duration_ms,
                    report.records_before,
                    report.records_after,
                    report.bytes_before,
                    report.bytes_after
                );
            }
        }

        Commands::Stats => {
            let stats = StatsResponse::from(backend.stats().await?);
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                let s = &stats.stats;
                println!("{:<20} {}", "Names", s.name_cache_size);
                println!("{:<20} {}", "Opaque keys", s.opaque_cache_size);
                println!("{:<20} {}", "Locations", s.id_cache_size);
                println!("{:<20} {}", "Log records", s.log_size);
                println!(
                    "{:<20} {} ({:.1}%)",
                    "Tombstones",
                    s.deleted_count,
                    stats.tombstone_ratio * 100.0
                );
                println!("{:<20} {}", "Inserts", s.insert_count);
            }
        }

        // Handled before a backend is opened
        Commands::Config { .. } => {}
    }

    Ok(())
}

fn parse_hex(value: &str) -> anyhow::Result<Vec<u8>> {
    hex::decode(value).with_context(|| format!("'{}' is not a hex opaque key", value))
}
