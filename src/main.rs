//! KLAXON - Telemetry Alerting Engine
//!
//! Evaluates multi-tenant triggers against streaming telemetry and fires
//! alerts through pluggable action sinks.
//!
//! # Usage
//!
//! ```bash
//! # Evaluate JSON data samples from stdin (one per line)
//! telemetry-feed | klaxon --stdin
//!
//! # Replay a recorded data file
//! klaxon --replay data/samples.json
//!
//! # Fresh start with bootstrap definitions from ./data
//! klaxon --reset-db --stdin
//! ```
//!
//! # Environment Variables
//!
//! - `KLAXON_CONFIG`: Path to a TOML config file
//! - `RUST_LOG`: Logging level (default: info)
//! - `RESET_DB`: Set to "true" to wipe all persistent data on startup

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use klaxon::actions::{ActionDispatcher, LogSink};
use klaxon::alerts::AlertProducer;
use klaxon::config::{self, EngineConfig};
use klaxon::definitions::DefinitionsRegistry;
use klaxon::engine::external::ExternalRegistry;
use klaxon::engine::RuleEngine;
use klaxon::pipeline::{ProcessingLoop, ReplaySource, StdinSource};
use klaxon::storage::{SledAlertStore, SledDefinitionsStore};
use klaxon::bootstrap;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "klaxon")]
#[command(about = "Klaxon Telemetry Alerting Engine")]
#[command(version)]
struct CliArgs {
    /// Path to a TOML config file (takes precedence over KLAXON_CONFIG
    /// and ./klaxon.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Data directory for the stores and bootstrap JSON files
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Definitions store namespace
    #[arg(long)]
    keyspace: Option<String>,

    /// Suppress JSON bootstrap (for nodes joining a populated deployment)
    #[arg(long)]
    skip_init_data: bool,

    /// Read data samples from stdin (JSON, one per line)
    #[arg(long)]
    stdin: bool,

    /// Replay data samples from a JSON file
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Delay between replayed samples in milliseconds (0 = no delay)
    #[arg(long, default_value = "0")]
    replay_delay_ms: u64,

    /// Reset all persistent data (definitions, alerts) on startup.
    /// WARNING: This is destructive and cannot be undone!
    /// Can also be set via RESET_DB=true environment variable.
    #[arg(long)]
    reset_db: bool,
}

// ============================================================================
// Database Reset
// ============================================================================

/// Check if database reset is requested via CLI flag or environment variable.
fn should_reset_db(cli_flag: bool) -> bool {
    if cli_flag {
        return true;
    }
    if let Ok(val) = std::env::var("RESET_DB") {
        let val_lower = val.to_lowercase();
        return val_lower == "true" || val_lower == "1" || val_lower == "yes";
    }
    false
}

/// Remove the store namespace. Called BEFORE any storage initialization;
/// bootstrap files in the data directory itself are left in place.
fn reset_store(config: &EngineConfig) -> Result<()> {
    let store_path = config.store_path();
    if !store_path.exists() {
        info!("Store path does not exist, nothing to reset");
        return Ok(());
    }
    warn!("RESET_DB requested — removing {}", store_path.display());
    std::fs::remove_dir_all(&store_path).context("Failed to remove store directory")?;
    warn!("Store removed; a fresh database will be created on startup");
    Ok(())
}

// ============================================================================
// Engine Runner
// ============================================================================

async fn run_engine(args: CliArgs, cancel_token: CancellationToken) -> Result<()> {
    let config = config::get();

    std::fs::create_dir_all(&config.data_dir).context("Failed to create data directory")?;
    let db = sled::open(config.store_path()).context("Failed to open store")?;
    let definitions_store = Arc::new(
        SledDefinitionsStore::open(&db, &config.keyspace).context("Failed to open definitions store")?,
    );
    let alert_store =
        Arc::new(SledAlertStore::open(&db, &config.keyspace).context("Failed to open alert store")?);

    let registry = Arc::new(DefinitionsRegistry::new(definitions_store));
    let loaded = registry
        .init(Duration::from_secs(config.admin_fetch_timeout_secs))
        .await
        .context("Definitions scan failed")?;
    info!("📇 Definitions loaded: {} triggers", loaded);

    if config.skip_init_data {
        info!("Bootstrap suppressed (skip-init-data)");
    } else {
        bootstrap::load_initial_data(&registry, &config.data_dir)?;
    }

    let externals = Arc::new(ExternalRegistry::default());
    let dispatcher = ActionDispatcher::spawn(
        Arc::new(LogSink),
        Arc::clone(&registry),
        config.action_queue_capacity,
    );
    let producer =
        AlertProducer::new(alert_store, Arc::clone(&registry)).with_dispatcher(dispatcher);
    let engine = RuleEngine::new(Arc::clone(&registry), externals);
    let processing = ProcessingLoop::new(engine, producer, cancel_token);

    if let Some(path) = args.replay {
        info!("📥 Input: replay file {}", path.display());
        let mut source = ReplaySource::from_file(&path, args.replay_delay_ms)
            .context("Failed to load replay file")?;
        processing.run(&mut source).await;
    } else {
        if !args.stdin {
            info!("No input mode given — defaulting to stdin");
        }
        info!("📥 Input: stdin (JSON data samples)");
        let mut source = StdinSource::new();
        processing.run(&mut source).await;
    }

    db.flush().context("Final store flush failed")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Parse CLI arguments
    let args = CliArgs::parse();

    // Load configuration, apply CLI overrides, freeze
    let mut engine_config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::load(),
    };
    if let Some(data_dir) = &args.data_dir {
        engine_config.data_dir = data_dir.clone();
    }
    if let Some(keyspace) = &args.keyspace {
        engine_config.keyspace = keyspace.clone();
    }
    if args.skip_init_data {
        engine_config.skip_init_data = true;
    }
    engine_config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    // RESET_DB check — must happen BEFORE any storage initialization
    if should_reset_db(args.reset_db) {
        reset_store(&engine_config)?;
    }

    config::init(engine_config);

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  KLAXON - Telemetry Alerting Engine");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("");

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();

    // Setup signal handlers
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    run_engine(args, cancel_token).await?;

    info!("");
    info!("✓ Klaxon shutdown complete");
    Ok(())
}
