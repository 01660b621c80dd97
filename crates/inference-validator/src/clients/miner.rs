use super::build_http_client;
use anyhow::Result;
use inference_common::auth::{RequestSigner, MESSAGE_HEADER, SIGNATURE_HEADER};
use inference_common::protocol::{ChallengePayload, ChallengeResponse};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Why a miner produced no usable response
#[derive(Debug, Error)]
pub enum MinerMiss {
    #[error("miner has no known address")]
    NoAddress,

    #[error("request failed: {0}")]
    Transport(String),

    #[error("miner answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Sends signed challenge requests to miners
#[derive(Clone)]
pub struct MinerClient {
    http_client: Client,
    signer: RequestSigner,
}

impl MinerClient {
    /// `timeout` bounds every single miner request
    pub fn new(signer: RequestSigner, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http_client: build_http_client(timeout)?,
            signer,
        })
    }

    pub fn identity(&self) -> &str {
        self.signer.identity()
    }

    /// POST `payload` to the miner's route for its challenge
    pub async fn forward(
        &self,
        miner_identity: &str,
        address: Option<&str>,
        payload: &ChallengePayload,
    ) -> Result<ChallengeResponse, MinerMiss> {
        let address = address.ok_or(MinerMiss::NoAddress)?;
        let challenge = payload.challenge();
        let url = format!(
            "{}{}",
            address.trim_end_matches('/'),
            challenge.api_route()
        );
        let headers = self.signer.sign_for(miner_identity);

        let response = self
            .http_client
            .post(&url)
            .header(MESSAGE_HEADER, headers.message)
            .header(SIGNATURE_HEADER, headers.signature)
            .json(&payload.to_json())
            .send()
            .await
            .map_err(|e| MinerMiss::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(MinerMiss::Status { status, body });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| MinerMiss::InvalidResponse(e.to_string()))?;
        challenge
            .decode_response(body)
            .map_err(|e| MinerMiss::InvalidResponse(e.to_string()))
    }
}
