use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error body returned by every service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Stable machine-readable code
    pub code: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub retryable: bool,
}

impl ErrorResponse {
    pub fn new(code: &str, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            error: ErrorDetails {
                code: code.to_string(),
                message: message.into(),
                timestamp: Utc::now(),
                retryable,
            },
        }
    }
}
