use super::build_http_client;
use anyhow::{Context, Result};
use inference_common::protocol::{
    Challenge, ChallengePayload, ChallengeResponse, PayloadRequest, ScoringRequest,
    ScoringResponse,
};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// HTTP client for the payload generator
#[derive(Clone, Debug)]
pub struct PayloadClient {
    base_url: String,
    http_client: Client,
}

impl PayloadClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client: build_http_client(timeout)?,
        })
    }

    /// Fetch a fresh payload for `challenge`
    pub async fn get_payload(&self, challenge: Challenge) -> Result<ChallengePayload> {
        let url = format!("{}/api/get-payload", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .json(&PayloadRequest { challenge })
            .send()
            .await
            .context("Failed to send payload request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to get {} payload: {} - {}", challenge, status, error_body);
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to parse payload response")?;
        Ok(challenge.decode_payload(body)?)
    }
}

/// HTTP client for the scoring service
#[derive(Clone, Debug)]
pub struct ScoringClient {
    base_url: String,
    http_client: Client,
}

impl ScoringClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client: build_http_client(timeout)?,
        })
    }

    /// Score miner responses against the payload they answered
    ///
    /// Returns one score per response, in the same order.
    pub async fn score(
        &self,
        payload: &ChallengePayload,
        responses: &[ChallengeResponse],
    ) -> Result<Vec<f64>> {
        let url = format!("{}/api/score", self.base_url);
        let request = ScoringRequest {
            challenge: payload.challenge(),
            base_payload: payload.to_json(),
            miner_responses: responses.iter().map(ChallengeResponse::to_json).collect(),
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send scoring request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to score responses: {} - {}", status, error_body);
        }

        let body: ScoringResponse = response
            .json()
            .await
            .context("Failed to parse scoring response")?;

        if body.scores.len() != responses.len() {
            anyhow::bail!(
                "Scoring service returned {} scores for {} responses",
                body.scores.len(),
                responses.len()
            );
        }
        if let Some(score) = body.scores.iter().find(|s| !s.is_finite()) {
            anyhow::bail!("Scoring service returned a non-finite score: {}", score);
        }
        Ok(body.scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inference_common::protocol::{ArithmeticPayload, ArithmeticResponse};
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_get_payload_decodes_by_challenge() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/get-payload"))
            .and(body_json(json!({"challenge": "multiplication"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"a": 6, "b": 7})))
            .mount(&server)
            .await;

        let client = PayloadClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let payload = client.get_payload(Challenge::Multiplication).await.unwrap();
        assert_eq!(
            payload,
            ChallengePayload::Multiplication(ArithmeticPayload { a: 6, b: 7 })
        );
    }

    #[tokio::test]
    async fn test_get_payload_rejects_wrong_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/get-payload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"prompt": "hi"})))
            .mount(&server)
            .await;

        let client = PayloadClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        assert!(client.get_payload(Challenge::Addition).await.is_err());
    }

    #[tokio::test]
    async fn test_score_sends_payload_and_responses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/score"))
            .and(body_json(json!({
                "challenge": "addition",
                "basePayload": {"a": 1, "b": 2},
                "minerResponses": [{"result": 3}, {"result": 4}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"scores": [1.0, 0.0]})))
            .mount(&server)
            .await;

        let client = ScoringClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let payload = ChallengePayload::Addition(ArithmeticPayload { a: 1, b: 2 });
        let responses = [
            ChallengeResponse::Addition(ArithmeticResponse { result: 3 }),
            ChallengeResponse::Addition(ArithmeticResponse { result: 4 }),
        ];
        assert_eq!(client.score(&payload, &responses).await.unwrap(), vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_score_count_mismatch_is_err() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/score"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"scores": [1.0]})))
            .mount(&server)
            .await;

        let client = ScoringClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let payload = ChallengePayload::Addition(ArithmeticPayload { a: 1, b: 2 });
        let responses = [
            ChallengeResponse::Addition(ArithmeticResponse { result: 3 }),
            ChallengeResponse::Addition(ArithmeticResponse { result: 3 }),
        ];
        assert!(client.score(&payload, &responses).await.is_err());
    }
}
