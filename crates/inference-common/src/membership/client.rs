use super::{MembershipError, MembershipSnapshot, MembershipSource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identity and registration of the sidecar's own wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarStatus {
    pub identity: String,
    pub uid: Option<u16>,
}

/// HTTP client for the membership sidecar
#[derive(Clone, Debug)]
pub struct SidecarClient {
    base_url: String,
    http_client: Client,
}

impl SidecarClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self::with_client(base_url, http_client))
    }

    pub fn with_client(base_url: impl Into<String>, http_client: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        }
    }

    /// Full membership snapshot
    pub async fn nodes(&self) -> Result<MembershipSnapshot> {
        let url = format!("{}/api/nodes", self.base_url);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .context("Failed to send nodes request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to fetch nodes: {} - {}", status, error_body);
        }

        response
            .json()
            .await
            .context("Failed to parse nodes response")
    }

    pub async fn status(&self) -> Result<SidecarStatus> {
        let url = format!("{}/api/status", self.base_url);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .context("Failed to send status request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to fetch status: {} - {}", status, error_body);
        }

        response
            .json()
            .await
            .context("Failed to parse status response")
    }
}

#[async_trait]
impl MembershipSource for SidecarClient {
    async fn fetch_snapshot(&self) -> Result<MembershipSnapshot, MembershipError> {
        self.nodes()
            .await
            .map_err(|e| MembershipError::SourceUnavailable(format!("{e:#}")))
    }
}
