//! Main entry point for the membership sidecar

use anyhow::{Context, Result};
use clap::Parser;
use inference_common::config::validate_config;
use inference_common::{telemetry, Keypair, SqliteStateStore, SystemClock};
use inference_sidecar::{config::SidecarConfig, ledger, server, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "inference-sidecar",
    about = "Membership sidecar of the inference network",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Generate example configuration file
    #[arg(long)]
    gen_config: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.gen_config {
        println!("{}", SidecarConfig::generate_example()?);
        return Ok(());
    }

    telemetry::init_tracing(args.debug);
    info!("Starting inference sidecar v{}", inference_sidecar::VERSION);

    let config =
        SidecarConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    validate_config(&config).context("Configuration validation failed")?;

    let keypair = Keypair::load(&config.wallet.key_file).with_context(|| {
        format!(
            "Failed to load wallet from {}",
            config.wallet.key_file.display()
        )
    })?;
    let store = SqliteStateStore::connect(&config.store.url, config.store.max_connections)
        .await
        .with_context(|| format!("Failed to open state store {}", config.store.url))?;
    let source = ledger::from_config(&config.ledger.source)?;
    info!(
        "Syncing netuid {} from {} every {}s",
        config.ledger.netuid,
        source.describe(),
        config.ledger.sync_interval_secs
    );

    let state = AppState {
        identity: keypair.identity().to_string(),
        config: Arc::new(config),
        store: Arc::new(store),
        clock: SystemClock::shared(),
    };
    server::run(state, source).await
}
