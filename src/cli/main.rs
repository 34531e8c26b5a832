//! CLI binary entry point for warehouse-loader

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use warehouse_loader::config::{CONFIG_FILENAME, sample_config};
use warehouse_loader::{
    ConfigSecrets, JobLedger, LoadOrchestrator, LoaderConfig, LocalObjectStore, ObjectStore,
    PostgresConnector, RuntimeContext, StorageBackendType, TriggerEvent,
};

#[derive(Parser)]
#[command(name = "warehouse-loader")]
#[command(about = "Load processed job exports into the warehouse")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to .warehouse-loader.toml in the workspace)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Workspace directory; relative local bucket roots resolve against it
    #[arg(short, long, global = true, default_value = ".")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every pending job into the warehouse
    Run {
        /// Trigger event JSON file; a manual event is used when omitted
        #[arg(short, long)]
        event: Option<PathBuf>,
        /// Name reported in the runtime context
        #[arg(long, default_value = "warehouse-loader")]
        function_name: String,
    },
    /// Write a sample configuration file
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },
    /// Show the job marker and the pending job directories
    Status,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<LoaderConfig> {
    let config = match &cli.config {
        Some(path) => LoaderConfig::load_file(path),
        None => LoaderConfig::load(&cli.workspace),
    };
    config.context("Failed to load configuration")
}

fn read_event(path: Option<&Path>) -> Result<TriggerEvent> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read event file {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse event file {}", path.display()))
        }
        None => Ok(TriggerEvent::manual()),
    }
}

async fn run_load<S: ObjectStore>(
    store: S,
    config: &LoaderConfig,
    event: &TriggerEvent,
    function_name: &str,
) -> Result<()> {
    let secrets = ConfigSecrets::from_config(config);
    let orchestrator = LoadOrchestrator::new(store, PostgresConnector, secrets, config)?;
    let context = RuntimeContext::new(function_name);

    let report = orchestrator.run(event, &context).await?;

    println!(
        "Loaded {} job(s): {} inserted, {} updated, {} fact rows, {} empty export(s) skipped",
        report.processed.len(),
        report.rows_inserted,
        report.rows_updated,
        report.fact_rows,
        report.frames_skipped
    );
    match report.marker.last_completed {
        Some(ts) => println!("Marker at {} (version {})", ts, report.marker.version),
        None => println!("Marker not yet advanced"),
    }
    Ok(())
}

async fn show_status<S: ObjectStore>(store: S, config: &LoaderConfig) -> Result<()> {
    let ledger = JobLedger::new(
        &store,
        config.storage.bucket.clone(),
        config.storage.marker_key.clone(),
    );
    let marker = ledger.read_marker().await?;
    let jobs = ledger.list_pending_jobs(&marker).await?;

    println!("Bucket:  {} ({})", config.storage.bucket, store.backend_type());
    match marker.last_completed {
        Some(ts) => println!("Marker:  {} (version {})", ts, marker.version),
        None => println!("Marker:  none (version {})", marker.version),
    }
    println!("Pending: {}", jobs.len());
    for job in jobs {
        println!("  {}", job);
    }
    Ok(())
}

fn handle_init(cli: &Cli, force: bool) -> Result<()> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.workspace.join(CONFIG_FILENAME));
    if path.exists() && !force {
        bail!(
            "{} already exists, use --force to overwrite",
            path.display()
        );
    }
    std::fs::write(&path, sample_config())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

#[cfg(feature = "s3")]
async fn s3_store() -> Result<warehouse_loader::S3ObjectStore> {
    Ok(warehouse_loader::S3ObjectStore::from_env().await)
}

#[cfg(not(feature = "s3"))]
async fn s3_store() -> Result<LocalObjectStore> {
    bail!("S3 storage backend requires the 's3' feature")
}

async fn execute(cli: &Cli) -> Result<()> {
    if let Commands::Init { force } = &cli.command {
        return handle_init(cli, *force);
    }

    let config = load_config(cli)?;

    match &cli.command {
        Commands::Run {
            event,
            function_name,
        } => {
            let event = read_event(event.as_deref())?;
            match config.storage.backend {
                StorageBackendType::Local => {
                    let store = LocalObjectStore::new(config.local_root(&cli.workspace));
                    run_load(store, &config, &event, function_name).await
                }
                StorageBackendType::S3 => {
                    run_load(s3_store().await?, &config, &event, function_name).await
                }
            }
        }
        Commands::Status => match config.storage.backend {
            StorageBackendType::Local => {
                let store = LocalObjectStore::new(config.local_root(&cli.workspace));
                show_status(store, &config).await
            }
            StorageBackendType::S3 => show_status(s3_store().await?, &config).await,
        },
        Commands::Init { .. } => Ok(()),
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = execute(&cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
