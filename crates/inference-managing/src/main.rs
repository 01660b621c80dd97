//! Main entry point for the inference managing service

use anyhow::{Context, Result};
use clap::Parser;
use inference_common::config::validate_config;
use inference_common::telemetry;
use inference_managing::{config::ManagingConfig, metrics, server::Server};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "inference-managing",
    about = "Quota, selection and scoring service of the inference network",
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
        let example_config = ManagingConfig::generate_example()?;
        println!("{example_config}");
        return Ok(());
    }

    telemetry::init_tracing(args.debug);
    info!("Starting inference managing service v{}", inference_managing::VERSION);

    let config = ManagingConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;
    validate_config(&config).context("Configuration validation failed")?;
    info!(
        "Configuration loaded, binding to {}",
        config.server.bind_address
    );

    telemetry::install_metrics_exporter(&config.metrics)?;
    metrics::describe();

    let server = Server::new(config).await?;

    match server.run().await {
        Ok(()) => {
            info!("Inference managing service shut down gracefully");
            Ok(())
        }
        Err(e) => {
            error!("Inference managing service error: {}", e);
            Err(e.into())
        }
    }
}
