//! HTTP clients for the services a validator talks to

mod collaborators;
mod managing;
mod miner;

pub use collaborators::{PayloadClient, ScoringClient};
pub use managing::ManagingClient;
pub use miner::{MinerClient, MinerMiss};

use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

pub(crate) fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}
