//! Request and response bodies of the managing service API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_fraction() -> f64 {
    1.0
}

fn default_sample_size() -> usize {
    1
}

/// `POST /api/consume`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    pub validator_identity: String,
    /// Specific miner to consume against; empty means none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub miner_identity: Option<String>,
    #[serde(default = "default_fraction")]
    pub rate_limit_threshold: f64,
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    #[serde(default = "default_fraction")]
    pub top_score: f64,
}

impl ConsumeRequest {
    /// Sampling request with default threshold and filter
    pub fn sample(validator_identity: impl Into<String>, sample_size: usize) -> Self {
        Self {
            validator_identity: validator_identity.into(),
            miner_identity: None,
            rate_limit_threshold: 1.0,
            sample_size,
            top_score: 1.0,
        }
    }

    /// The named miner, treating an empty string as absent
    pub fn target_miner(&self) -> Option<&str> {
        self.miner_identity
            .as_deref()
            .map(str::trim)
            .filter(|miner| !miner.is_empty())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.validator_identity.trim().is_empty() {
            return Err("validatorIdentity must not be empty".to_string());
        }
        let threshold = self.rate_limit_threshold;
        if !threshold.is_finite() || threshold <= 0.0 || threshold > 1.0 {
            return Err(format!(
                "rateLimitThreshold must be in (0, 1], got {threshold}"
            ));
        }
        if self.sample_size < 1 {
            return Err("sampleSize must be at least 1".to_string());
        }
        let top = self.top_score;
        if !top.is_finite() || !(0.0..=1.0).contains(&top) {
            return Err(format!("topScore must be in [0, 1], got {top}"));
        }
        Ok(())
    }
}

/// Response of `POST /api/consume`; the three lists are parallel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerSamplingResponse {
    pub miner_identities: Vec<String>,
    pub uids: Vec<Option<u16>>,
    pub addresses: Vec<Option<String>>,
}

impl MinerSamplingResponse {
    /// Iterate `(identity, address)` pairs
    pub fn miners(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.miner_identities.iter().enumerate().map(|(i, identity)| {
            let address = self.addresses.get(i).and_then(|a| a.as_deref());
            (identity.as_str(), address)
        })
    }
}

/// `POST /api/update-score`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateScoreRequest {
    pub miner_identities: Vec<String>,
    pub scores: Vec<f64>,
}

impl UpdateScoreRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.miner_identities.len() != self.scores.len() {
            return Err(format!(
                "minerIdentities has {} entries but scores has {}",
                self.miner_identities.len(),
                self.scores.len()
            ));
        }
        if self.miner_identities.iter().any(|m| m.trim().is_empty()) {
            return Err("minerIdentities must not contain empty identities".to_string());
        }
        if let Some(score) = self.scores.iter().find(|s| !s.is_finite()) {
            return Err(format!("scores must be finite, got {score}"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateScoreResponse {
    pub success: bool,
    pub miner_identities: Vec<String>,
}

/// `GET /api/get-scores`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoresResponse {
    pub scores: HashMap<String, f64>,
}

/// One recorded score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub score: f64,
    pub timestamp: DateTime<Utc>,
}

/// `GET /api/score-history/:identity`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreHistoryResponse {
    pub identity: String,
    pub scores: Vec<ScoreEntry>,
    pub average_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

impl HealthResponse {
    pub fn healthy(version: &str) -> Self {
        Self {
            status: "healthy".to_string(),
            version: version.to_string(),
            timestamp: Utc::now(),
        }
    }
}
