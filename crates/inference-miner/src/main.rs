//! Main entry point for the inference miner

use anyhow::{Context, Result};
use clap::Parser;
use inference_common::config::validate_config;
use inference_common::{telemetry, Keypair, SystemClock};
use inference_miner::{config::MinerConfig, server, AppState};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "inference-miner", about = "Inference network miner", version)]
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
        println!("{}", MinerConfig::generate_example()?);
        return Ok(());
    }

    telemetry::init_tracing(args.debug);
    info!("Starting inference miner v{}", inference_miner::VERSION);

    let config = MinerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    validate_config(&config).context("Configuration validation failed")?;

    let keypair = Keypair::load(&config.wallet.key_file).with_context(|| {
        format!(
            "Failed to load wallet from {}",
            config.wallet.key_file.display()
        )
    })?;
    info!("Miner identity: {}", keypair.identity());

    let state = AppState::new(config, keypair.identity(), SystemClock::shared());
    server::run(state).await
}
