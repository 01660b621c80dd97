//! Bodies exchanged with the payload generator and the scoring service

use super::Challenge;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `POST /api/get-payload`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadRequest {
    pub challenge: Challenge,
}

/// `POST /api/score`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringRequest {
    pub challenge: Challenge,
    pub base_payload: Value,
    pub miner_responses: Vec<Value>,
}

/// One score per miner response, in request order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringResponse {
    pub scores: Vec<f64>,
}
