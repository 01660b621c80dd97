//! # Ledger Source
//!
//! Reads the raw metagraph of one network and converts it into
//! [`MemberRecord`]s. The ledger itself is external; the sidecar only needs a
//! full metagraph per sync.

use crate::config::LedgerSourceConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use inference_common::membership::{MemberRecord, NodeAddress};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const RAO_PER_TAO: f64 = 1e-9;

/// Hotkey as published by the ledger: hex text or raw public key bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawHotkey {
    Hex(String),
    Bytes(Vec<u8>),
}

impl RawHotkey {
    /// Lowercase hex identity without a `0x` prefix
    pub fn to_identity(&self) -> String {
        match self {
            RawHotkey::Hex(text) => {
                let text = text.trim();
                text.strip_prefix("0x")
                    .unwrap_or(text)
                    .to_ascii_lowercase()
            }
            RawHotkey::Bytes(bytes) => hex::encode(bytes),
        }
    }
}

/// Serving endpoint registered by a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAxon {
    pub ip: u128,
    pub ip_type: u8,
    pub port: u16,
    pub protocol: u8,
}

impl RawAxon {
    pub fn host(&self) -> String {
        if self.ip_type == 4 {
            Ipv4Addr::from(self.ip as u32).to_string()
        } else {
            Ipv6Addr::from(self.ip).to_string()
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.protocol == 1 {
            "https"
        } else {
            "http"
        }
    }

    pub fn address(&self) -> NodeAddress {
        NodeAddress {
            host: self.host(),
            port: self.port,
            scheme: self.scheme().to_string(),
        }
    }
}

/// Metagraph in the ledger's parallel-array layout; stakes are in rao
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawMetagraph {
    pub netuid: Option<u16>,
    pub hotkeys: Vec<RawHotkey>,
    pub axons: Vec<RawAxon>,
    pub alpha_stake: Vec<u64>,
    pub tao_stake: Vec<u64>,
    pub total_stake: Vec<u64>,
    pub trust: Vec<f64>,
    /// Unix seconds
    pub last_update: Vec<u64>,
}

fn at<T: Copy + Default>(values: &[T], uid: usize) -> T {
    values.get(uid).copied().unwrap_or_default()
}

fn rao_to_tao(rao: u64) -> f64 {
    rao as f64 * RAO_PER_TAO
}

impl RawMetagraph {
    /// One record per hotkey, uid = position; missing entries read as zero
    pub fn to_members(&self) -> Vec<MemberRecord> {
        let mut members = Vec::with_capacity(self.hotkeys.len());

        for (position, hotkey) in self.hotkeys.iter().enumerate() {
            let Ok(uid) = u16::try_from(position) else {
                warn!(
                    "Metagraph has {} hotkeys, ignoring uids above {}",
                    self.hotkeys.len(),
                    u16::MAX
                );
                break;
            };

            let last_update = i64::try_from(at(&self.last_update, position)).unwrap_or(i64::MAX);
            members.push(MemberRecord {
                uid,
                identity: hotkey.to_identity(),
                address: at(&self.axons, position).address(),
                stake_alpha: rao_to_tao(at(&self.alpha_stake, position)),
                stake_tao: rao_to_tao(at(&self.tao_stake, position)),
                stake_total: rao_to_tao(at(&self.total_stake, position)),
                trust: at(&self.trust, position),
                last_updated: DateTime::<Utc>::from_timestamp(last_update, 0).unwrap_or_default(),
            });
        }

        members
    }
}

/// Provider of raw metagraphs
#[async_trait]
pub trait LedgerSource: Send + Sync {
    async fn fetch_metagraph(&self, netuid: u16) -> Result<RawMetagraph>;

    /// Human readable origin, for logs
    fn describe(&self) -> String;
}

/// Build the configured source
pub fn from_config(config: &LedgerSourceConfig) -> Result<Arc<dyn LedgerSource>> {
    Ok(match config {
        LedgerSourceConfig::Http {
            endpoint,
            request_timeout_secs,
        } => Arc::new(HttpLedgerSource::new(
            endpoint.clone(),
            Duration::from_secs(*request_timeout_secs),
        )?),
        LedgerSourceConfig::File { path } => Arc::new(FileLedgerSource::new(path.clone())),
    })
}

/// Ledger gateway over HTTP
#[derive(Clone, Debug)]
pub struct HttpLedgerSource {
    endpoint: String,
    http_client: Client,
}

impl HttpLedgerSource {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }
}

#[async_trait]
impl LedgerSource for HttpLedgerSource {
    async fn fetch_metagraph(&self, netuid: u16) -> Result<RawMetagraph> {
        let url = format!("{}/metagraph/{}", self.endpoint, netuid);
        debug!("Fetching metagraph from {}", url);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .context("Failed to send metagraph request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to fetch metagraph: {} - {}", status, error_body);
        }

        response
            .json()
            .await
            .context("Failed to parse metagraph response")
    }

    fn describe(&self) -> String {
        self.endpoint.clone()
    }
}

/// Metagraph kept in a JSON file
#[derive(Clone, Debug)]
pub struct FileLedgerSource {
    path: PathBuf,
}

impl FileLedgerSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LedgerSource for FileLedgerSource {
    async fn fetch_metagraph(&self, netuid: u16) -> Result<RawMetagraph> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read metagraph file {}", self.path.display()))?;
        let metagraph: RawMetagraph = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse metagraph file {}", self.path.display()))?;

        if let Some(found) = metagraph.netuid {
            if found != netuid {
                anyhow::bail!(
                    "Metagraph file {} is for netuid {}, expected {}",
                    self.path.display(),
                    found,
                    netuid
                );
            }
        }
        Ok(metagraph)
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}
