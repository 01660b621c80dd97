//! # Inference Validator

use anyhow::Result;
use clap::Parser;
use inference_common::telemetry;
use inference_validator::cli::Args;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if !args.gen_config {
        telemetry::init_tracing(args.debug);
        info!("Starting inference validator v{}", inference_validator::VERSION);
    }

    args.run().await
}
