/*!
Hydrate CLI - Command-line interface for hydrated state records.

This CLI inspects and maintains the records a hydrator keeps in a local
directory: one `<key>.json` envelope per key.
*/

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use hydrate_core::{
    create_storage_from_config, observability, Envelope, HydratorBuilder, LocalFileBackend,
    StorageCapability, StorageConfig,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::{Table, Tabled};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "hydrate")]
#[command(about = "CLI for versioned hydration records")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding the records
    #[arg(short, long, global = true, env = "HYDRATE_DIR", default_value = "./state")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all stored records
    List,
    /// Show the envelope of a record
    Show {
        /// Record key
        key: String,
    },
    /// Store a JSON document under a key
    Put {
        /// Record key
        key: String,
        /// State as JSON text
        json: String,
        /// Schema version written into the envelope
        #[arg(long, default_value_t = 1)]
        version: u32,
    },
    /// Remove a record
    Clear {
        /// Record key
        key: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Tabled)]
struct RecordInfo {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Modified")]
    modified: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    match cli.command {
        Commands::List => list_records(&cli.dir).await?,
        Commands::Show { key } => show_record(&cli.dir, &key).await?,
        Commands::Put { key, json, version } => put_record(&cli.dir, &key, &json, version).await?,
        Commands::Clear { key, force } => clear_record(&cli.dir, &key, force).await?,
    }

    Ok(())
}

fn init_logging(verbose: bool) -> Result<(), anyhow::Error> {
    let default_filter = if verbose { "debug" } else { "warn" };
    observability::init_observability_with(default_filter, false)?;
    Ok(())
}

fn open_storage(dir: &Path) -> Result<Arc<StorageCapability>, anyhow::Error> {
    let config = StorageConfig::local_with_base_path(dir);
    create_storage_from_config(&config)
        .with_context(|| format!("cannot use {} as a record directory", dir.display()))
}

async fn list_records(dir: &Path) -> Result<(), anyhow::Error> {
    info!("Listing records in {}", dir.display());

    let backend = LocalFileBackend::new(dir);
    let mut records = Vec::new();

    for key in backend.keys().await? {
        let path = backend.path_for(&key)?;
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                continue;
            }
        };

        let version = match Envelope::decode(&raw) {
            Ok(envelope) => envelope.version.to_string(),
            Err(e) => {
                warn!("Record {} is not a valid envelope: {}", key, e);
                "invalid".to_string()
            }
        };

        let (size, modified) = match tokio::fs::metadata(&path).await {
            Ok(meta) => (
                format_size(meta.len()),
                meta.modified()
                    .map(|t| format_timestamp(chrono::DateTime::<chrono::Utc>::from(t).timestamp()))
                    .unwrap_or_else(|_| "Unknown".to_string()),
            ),
            Err(_) => ("Unknown".to_string(), "Unknown".to_string()),
        };

        records.push(RecordInfo {
            key,
            version,
            size,
            modified,
        });
    }

    if records.is_empty() {
        println!("No records found in {}", dir.display());
    } else {
        let table = Table::new(records);
        println!("{table}");
    }

    Ok(())
}

async fn show_record(dir: &Path, key: &str) -> Result<(), anyhow::Error> {
    info!("Showing record: {}", key);

    let storage = open_storage(dir)?;
    let Some(raw) = storage.get_string(key).await? else {
        bail!("no record stored under '{key}'");
    };
    let envelope = Envelope::decode(&raw)?;

    println!("Record Details:");
    println!("  Key: {key}");
    println!("  Backend: {}", storage.backend_name());
    println!("  Version: {}", envelope.version);
    println!("  Data:");
    for line in serde_json::to_string_pretty(&envelope.data)?.lines() {
        println!("    {line}");
    }

    Ok(())
}

async fn put_record(
    dir: &Path,
    key: &str,
    json: &str,
    version: u32,
) -> Result<(), anyhow::Error> {
    let state: Value = serde_json::from_str(json).context("state must be valid JSON")?;

    let hydrator = HydratorBuilder::<Value>::serde(key)
        .version(version)
        .storage(open_storage(dir)?)
        .build()?;

    if !hydrator.save(&state).await {
        bail!("failed to store record '{key}'");
    }
    println!("✓ Stored '{key}' at version {version}");

    Ok(())
}

async fn clear_record(dir: &Path, key: &str, force: bool) -> Result<(), anyhow::Error> {
    if !force {
        print!("Are you sure you want to clear record '{key}'? (y/N): ");
        use std::io::{self, Write};
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().to_lowercase().starts_with('y') {
            println!("Clear cancelled");
            return Ok(());
        }
    }

    let hydrator = HydratorBuilder::<Value>::serde(key)
        .storage(open_storage(dir)?)
        .build()?;

    if !hydrator.clear().await {
        bail!("failed to clear record '{key}'");
    }
    println!("✓ Record cleared");

    Ok(())
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

fn format_timestamp(timestamp: i64) -> String {
    use chrono::{Local, TimeZone};

    match Local.timestamp_opt(timestamp, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        _ => timestamp.to_string(),
    }
}
