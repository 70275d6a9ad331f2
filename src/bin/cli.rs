//! Engram Sync CLI
//!
//! Push snapshot files to object storage or the ingestion endpoint.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use engram_sync::error::{Result, SyncError};
use engram_sync::{ForceMethod, SyncConfig, SyncEngine, SyncSettings, SyncWorker};

#[derive(Parser)]
#[command(name = "engram-sync")]
#[command(about = "Hybrid artifact sync for Engram snapshots")]
#[command(version)]
struct Cli {
    /// JSON settings file; flags and environment override its values
    #[arg(long, env = "ENGRAM_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Stable identifier of this host
    #[arg(long, env = "ENGRAM_SYNC_SYSTEM_ID")]
    system_id: Option<String>,

    /// Object storage bucket
    #[arg(long, env = "ENGRAM_SYNC_BUCKET")]
    bucket: Option<String>,

    /// Key prefix inside the bucket
    #[arg(long, env = "ENGRAM_SYNC_PREFIX")]
    prefix: Option<String>,

    /// S3-compatible endpoint (https)
    #[arg(long, env = "ENGRAM_SYNC_CLOUD_ENDPOINT")]
    cloud_endpoint: Option<String>,

    /// Object storage region
    #[arg(long, env = "ENGRAM_SYNC_REGION")]
    region: Option<String>,

    /// Direct ingestion endpoint
    #[arg(long, env = "ENGRAM_SYNC_HTTP_ENDPOINT")]
    http_endpoint: Option<String>,

    /// Prior upload state database
    #[arg(long, env = "ENGRAM_SYNC_STATE_PATH")]
    state_path: Option<String>,

    /// Chunk size in bytes
    #[arg(long, env = "ENGRAM_SYNC_CHUNK_SIZE")]
    chunk_size: Option<u64>,

    /// Direct transfer payload limit in bytes
    #[arg(long, env = "ENGRAM_SYNC_MAX_PAYLOAD")]
    max_payload: Option<u64>,

    /// Retries per network operation
    #[arg(long, env = "ENGRAM_SYNC_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Do not fall back to the next method
    #[arg(long)]
    no_fallback: bool,

    /// Upload chunks uncompressed
    #[arg(long)]
    no_compression: bool,

    /// Re-upload files even when unchanged
    #[arg(long)]
    no_dedup: bool,

    /// Emit logs as JSON
    #[arg(long, env = "ENGRAM_SYNC_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync files now
    Sync {
        /// Files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Method selection (auto, cloud, http)
        #[arg(short, long, default_value = "auto")]
        method: ForceMethod,
        /// Run through the background worker and wait for its event
        #[arg(long)]
        background: bool,
    },
    /// Check which methods are reachable
    Probe,
    /// Show recorded checksums
    State,
    /// Forget recorded checksums for this system
    Forget,
}

impl Cli {
    fn settings(&self) -> Result<SyncSettings> {
        let mut settings = match &self.config {
            Some(path) => SyncSettings::from_json_file(path)?,
            None => SyncSettings::default(),
        };

        if let Some(system_id) = &self.system_id {
            settings.system_id = system_id.clone();
        }
        if let Some(bucket) = &self.bucket {
            settings.cloud_bucket = Some(bucket.clone());
        }
        if let Some(prefix) = &self.prefix {
            settings.cloud_prefix = Some(prefix.clone());
        }
        if let Some(endpoint) = &self.cloud_endpoint {
            settings.cloud_endpoint = Some(endpoint.clone());
        }
        if let Some(region) = &self.region {
            settings.cloud_region = region.clone();
        }
        if let Some(endpoint) = &self.http_endpoint {
            settings.http_endpoint = endpoint.clone();
        }
        if let Some(state_path) = &self.state_path {
            settings.state_path = state_path.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            settings.chunk_size_bytes = chunk_size;
        }
        if let Some(max_payload) = self.max_payload {
            settings.max_payload_bytes = max_payload;
        }
        if let Some(max_retries) = self.max_retries {
            settings.max_retries = max_retries;
        }
        if self.no_fallback {
            settings.enable_fallback = false;
        }
        if self.no_compression {
            settings.enable_compression = false;
        }
        if self.no_dedup {
            settings.enable_deduplication = false;
        }
        Ok(settings)
    }
}

fn init_tracing(json: bool) {
    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    );
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    }
}

/// Resolve relative paths against the working directory
fn absolute(paths: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    let cwd = std::env::current_dir()?;
    Ok(paths
        .into_iter()
        .map(|p| if p.is_absolute() { p } else { cwd.join(p) })
        .collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = SyncConfig::from_settings(cli.settings()?)?;
    let engine = Arc::new(SyncEngine::open(config)?);

    match cli.command {
        Commands::Sync {
            files,
            method,
            background,
        } => {
            let files = absolute(files)?;

            let result = if background {
                let worker = SyncWorker::new()?;
                let mut events = worker.subscribe();
                worker.trigger(engine.clone(), files, method);
                let event = events
                    .recv()
                    .await
                    .map_err(|e| SyncError::Internal(format!("Sync event lost: {}", e)))?;
                event.result
            } else {
                match engine.sync_now(&files, method).await {
                    Ok(result) => result,
                    Err(e) => {
                        eprintln!("Sync failed: {}", e);
                        for failure in e.failures() {
                            eprintln!("  {}", failure);
                        }
                        std::process::exit(1);
                    }
                }
            };

            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
        }

        Commands::Probe => {
            for (method, outcome) in engine.probe().await {
                match outcome {
                    Ok(()) => println!("{:<6} available", method),
                    Err(e) => println!("{:<6} unavailable: {}", method, e),
                }
            }
        }

        Commands::State => {
            let records = engine.prior_state()?;
            if records.is_empty() {
                println!("No uploads recorded for {}", engine.system_id());
            }
            for record in records {
                println!(
                    "{} {} ({} bytes, {} chunks, {}) at {}",
                    record.logical_name,
                    record.checksum,
                    record.size_bytes,
                    record.chunk_count,
                    if record.compressed { "gzip" } else { "raw" },
                    record.uploaded_at.format("%Y-%m-%d %H:%M")
                );
            }
        }

        Commands::Forget => {
            let removed = engine.forget()?;
            println!("Forgot {} file(s) for {}", removed, engine.system_id());
        }
    }

    Ok(())
}
