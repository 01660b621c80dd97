//! Workload registry
//!
//! Challenges are a closed set resolved once by name. Each one has a payload
//! type, a response type and the miner route that serves it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("Unknown challenge: {0}")]
    Unknown(String),

    #[error("Invalid {challenge} payload: {message}")]
    InvalidPayload {
        challenge: Challenge,
        message: String,
    },

    #[error("Invalid {challenge} response: {message}")]
    InvalidResponse {
        challenge: Challenge,
        message: String,
    },

    #[error("{challenge} result overflows a 64-bit integer")]
    Overflow { challenge: Challenge },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Challenge {
    Addition,
    Multiplication,
}

/// Operands of an arithmetic challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArithmeticPayload {
    pub a: i64,
    pub b: i64,
}

/// Result of an arithmetic challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArithmeticResponse {
    pub result: i64,
}

/// A payload tagged with the challenge it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengePayload {
    Addition(ArithmeticPayload),
    Multiplication(ArithmeticPayload),
}

/// A miner response tagged with the challenge it answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeResponse {
    Addition(ArithmeticResponse),
    Multiplication(ArithmeticResponse),
}

impl Challenge {
    pub const ALL: [Challenge; 2] = [Challenge::Addition, Challenge::Multiplication];

    pub fn name(&self) -> &'static str {
        match self {
            Challenge::Addition => "addition",
            Challenge::Multiplication => "multiplication",
        }
    }

    /// Miner route serving this challenge
    pub fn api_route(&self) -> &'static str {
        match self {
            Challenge::Addition => "/api/add",
            Challenge::Multiplication => "/api/multiply",
        }
    }

    pub fn decode_payload(&self, value: Value) -> Result<ChallengePayload, ChallengeError> {
        let payload: ArithmeticPayload =
            serde_json::from_value(value).map_err(|e| ChallengeError::InvalidPayload {
                challenge: *self,
                message: e.to_string(),
            })?;
        Ok(match self {
            Challenge::Addition => ChallengePayload::Addition(payload),
            Challenge::Multiplication => ChallengePayload::Multiplication(payload),
        })
    }

    pub fn decode_response(&self, value: Value) -> Result<ChallengeResponse, ChallengeError> {
        let response: ArithmeticResponse =
            serde_json::from_value(value).map_err(|e| ChallengeError::InvalidResponse {
                challenge: *self,
                message: e.to_string(),
            })?;
        Ok(match self {
            Challenge::Addition => ChallengeResponse::Addition(response),
            Challenge::Multiplication => ChallengeResponse::Multiplication(response),
        })
    }

    /// Compute the answer the way an honest miner does
    pub fn solve(&self, payload: &ArithmeticPayload) -> Result<ArithmeticResponse, ChallengeError> {
        let result = match self {
            Challenge::Addition => payload.a.checked_add(payload.b),
            Challenge::Multiplication => payload.a.checked_mul(payload.b),
        };
        result
            .map(|result| ArithmeticResponse { result })
            .ok_or(ChallengeError::Overflow { challenge: *self })
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Challenge {
    type Err = ChallengeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Challenge::ALL
            .into_iter()
            .find(|challenge| challenge.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ChallengeError::Unknown(s.to_string()))
    }
}

impl ChallengePayload {
    pub fn challenge(&self) -> Challenge {
        match self {
            ChallengePayload::Addition(_) => Challenge::Addition,
            ChallengePayload::Multiplication(_) => Challenge::Multiplication,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ChallengePayload::Addition(payload) | ChallengePayload::Multiplication(payload) => {
                serde_json::json!(payload)
            }
        }
    }
}

impl ChallengeResponse {
    pub fn to_json(&self) -> Value {
        match self {
            ChallengeResponse::Addition(response)
            | ChallengeResponse::Multiplication(response) => serde_json::json!(response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_by_name() {
        assert_eq!("addition".parse::<Challenge>().unwrap(), Challenge::Addition);
        assert_eq!(
            "Multiplication".parse::<Challenge>().unwrap(),
            Challenge::Multiplication
        );
        assert!(matches!(
            "division".parse::<Challenge>(),
            Err(ChallengeError::Unknown(_))
        ));
    }

    #[test]
    fn test_routes() {
        assert_eq!(Challenge::Addition.api_route(), "/api/add");
        assert_eq!(Challenge::Multiplication.api_route(), "/api/multiply");
    }

    #[test]
    fn test_solve_checks_overflow() {
        let payload = ArithmeticPayload { a: 6, b: 7 };
        assert_eq!(Challenge::Addition.solve(&payload).unwrap().result, 13);
        assert_eq!(Challenge::Multiplication.solve(&payload).unwrap().result, 42);

        let huge = ArithmeticPayload { a: i64::MAX, b: 2 };
        assert!(matches!(
            Challenge::Multiplication.solve(&huge),
            Err(ChallengeError::Overflow { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let payload = Challenge::Addition.decode_payload(json!({"a": 1, "b": 2})).unwrap();
        assert_eq!(payload.challenge(), Challenge::Addition);
        assert_eq!(payload.to_json(), json!({"a": 1, "b": 2}));

        assert!(Challenge::Addition.decode_payload(json!({"a": 1})).is_err());
        assert!(Challenge::Multiplication
            .decode_response(json!({"result": "x"}))
            .is_err());
    }

    #[test]
    fn test_serde_name() {
        assert_eq!(
            serde_json::to_value(Challenge::Multiplication).unwrap(),
            json!("multiplication")
        );
    }
}
