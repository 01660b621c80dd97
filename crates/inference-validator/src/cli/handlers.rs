//! Command handlers

use crate::clients::{ManagingClient, MinerClient, PayloadClient, ScoringClient};
use crate::config::ValidatorConfig;
use crate::metrics;
use crate::orchestrator::{Orchestrator, RoundClients};
use crate::window::ScoreTrackingWindow;
use anyhow::{Context, Result};
use inference_common::auth::RequestSigner;
use inference_common::config::validate_config;
use inference_common::{telemetry, Keypair, SqliteStateStore, SystemClock};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

fn load_config(path: Option<&Path>) -> Result<ValidatorConfig> {
    let config = ValidatorConfig::load(path).context("Failed to load configuration")?;
    validate_config(&config).context("Configuration validation failed")?;
    Ok(config)
}

/// Wire an orchestrator from configuration
pub async fn build_orchestrator(config: &ValidatorConfig) -> Result<Orchestrator> {
    let keypair = Keypair::load(&config.wallet.key_file).with_context(|| {
        format!(
            "Failed to load wallet from {}",
            config.wallet.key_file.display()
        )
    })?;
    info!("Validator identity: {}", keypair.identity());

    let clock = SystemClock::shared();
    let signer = RequestSigner::new(Arc::new(keypair), clock.clone());

    let store = SqliteStateStore::connect(&config.store.url, config.store.max_connections)
        .await
        .with_context(|| format!("Failed to open state store {}", config.store.url))?;

    let clients = RoundClients {
        managing: ManagingClient::new(
            config.managing.base_url.clone(),
            config.managing.request_timeout(),
        )?,
        payloads: PayloadClient::new(
            config.payload.base_url.clone(),
            config.payload.request_timeout(),
        )?,
        scoring: ScoringClient::new(
            config.scoring.base_url.clone(),
            config.scoring.request_timeout(),
        )?,
        miners: MinerClient::new(signer, config.orchestration.miner_timeout())?,
    };
    let window = ScoreTrackingWindow::new(Arc::new(store), clock, config.score_window.clone());

    Ok(Orchestrator::new(
        config.orchestration.clone(),
        clients,
        window,
    ))
}

pub async fn handle_start(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    telemetry::install_metrics_exporter(&config.metrics)?;
    metrics::describe();

    let orchestrator = Arc::new(build_orchestrator(&config).await?);

    tokio::select! {
        _ = orchestrator.run() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Received Ctrl+C, shutting down");
        }
    }
    Ok(())
}

pub async fn handle_round(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    let orchestrator = build_orchestrator(&config).await?;

    let report = orchestrator.run_round().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub fn handle_gen_config(output: &Path) -> Result<()> {
    let text = ValidatorConfig::generate_example()?;
    std::fs::write(output, text)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Configuration written to {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gen_config_writes_loadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("validator.toml");
        handle_gen_config(&output).unwrap();

        let config = ValidatorConfig::load(Some(output.as_path())).unwrap();
        assert_eq!(config.orchestration.batch_size, 8);
    }

    #[tokio::test]
    async fn test_missing_wallet_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ValidatorConfig::default();
        config.wallet.key_file = dir.path().join("missing.json");
        config.store.url = "sqlite::memory:".to_string();

        let err = build_orchestrator(&config).await.err().unwrap();
        assert!(err.to_string().contains("Failed to load wallet"));
    }
}
