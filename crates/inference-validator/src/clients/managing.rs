use super::build_http_client;
use anyhow::{Context, Result};
use inference_common::protocol::{
    ConsumeRequest, MinerSamplingResponse, UpdateScoreRequest, UpdateScoreResponse,
};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// HTTP client for the managing service
#[derive(Clone, Debug)]
pub struct ManagingClient {
    base_url: String,
    http_client: Client,
}

impl ManagingClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self::with_client(base_url, build_http_client(timeout)?))
    }

    pub fn with_client(base_url: impl Into<String>, http_client: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        }
    }

    /// Request a batch of miners
    ///
    /// `Ok(None)` means the managing service answered 429: there is no
    /// capacity left for this validator right now.
    pub async fn consume(&self, request: &ConsumeRequest) -> Result<Option<MinerSamplingResponse>> {
        let url = format!("{}/api/consume", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .json(request)
            .send()
            .await
            .context("Failed to send consume request")?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            debug!("No miner capacity available: {}", body);
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to consume quota: {} - {}", status, error_body);
        }

        let batch = response
            .json()
            .await
            .context("Failed to parse consume response")?;
        Ok(Some(batch))
    }

    /// Report one score per miner; empty batches are not sent
    pub async fn update_scores(&self, miners: Vec<String>, scores: Vec<f64>) -> Result<()> {
        if miners.is_empty() {
            return Ok(());
        }
        let url = format!("{}/api/update-score", self.base_url);
        let request = UpdateScoreRequest {
            miner_identities: miners,
            scores,
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send score update")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to update scores: {} - {}", status, error_body);
        }

        let body: UpdateScoreResponse = response
            .json()
            .await
            .context("Failed to parse score update response")?;
        if !body.success {
            anyhow::bail!("Managing service rejected the score update");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_consume_maps_429_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/consume"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"code": "MANAGING_QUOTA_EXHAUSTED", "message": "x",
                          "timestamp": "2024-01-01T00:00:00Z", "retryable": true}
            })))
            .mount(&server)
            .await;

        let client = ManagingClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let batch = client.consume(&ConsumeRequest::sample("val", 4)).await.unwrap();
        assert!(batch.is_none());
    }

    #[tokio::test]
    async fn test_consume_sends_camel_case() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/consume"))
            .and(body_json(json!({
                "validatorIdentity": "val",
                "rateLimitThreshold": 1.0,
                "sampleSize": 4,
                "topScore": 1.0
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "minerIdentities": ["m1"],
                "uids": [3],
                "addresses": ["http://10.0.0.1:8091"]
            })))
            .mount(&server)
            .await;

        let client = ManagingClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let batch = client
            .consume(&ConsumeRequest::sample("val", 4))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.miner_identities, vec!["m1"]);
        assert_eq!(batch.uids, vec![Some(3)]);
    }

    #[tokio::test]
    async fn test_consume_server_error_is_err() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/consume"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let client = ManagingClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        assert!(client.consume(&ConsumeRequest::sample("val", 1)).await.is_err());
    }

    #[tokio::test]
    async fn test_update_scores() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/update-score"))
            .and(body_json(json!({"minerIdentities": ["a"], "scores": [0.0]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "minerIdentities": ["a"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ManagingClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        client.update_scores(vec![], vec![]).await.unwrap();
        client
            .update_scores(vec!["a".to_string()], vec![0.0])
            .await
            .unwrap();
    }
}
