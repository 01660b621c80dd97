//! Error types for the managing service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use inference_common::membership::MembershipError;
use inference_common::protocol::ErrorResponse;
use inference_common::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagingError {
    /// Request fields out of range or inconsistent
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// The named miner is over quota for the caller
    #[error("Rate limit exceeded for validator {validator} accessing miner {miner}")]
    QuotaExceeded { validator: String, miner: String },

    /// None of the sampled miners could be consumed
    #[error("Could not consume quota for any of the sampled miners")]
    QuotaExhausted,

    /// Nothing to sample from
    #[error("No members available: {reason}")]
    NoMembers { reason: String },

    #[error("Membership unavailable: {0}")]
    Membership(#[from] MembershipError),

    #[error("State store error: {0}")]
    Store(StoreError),

    #[error("State store not ready: {message}")]
    StoreNotReady { message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl From<StoreError> for ManagingError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotReady(message) => ManagingError::StoreNotReady { message },
            other => ManagingError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ManagingError>;

impl ManagingError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ManagingError::InvalidRequest { .. } => "MANAGING_INVALID_REQUEST",
            ManagingError::QuotaExceeded { .. } => "MANAGING_QUOTA_EXCEEDED",
            ManagingError::QuotaExhausted => "MANAGING_QUOTA_EXHAUSTED",
            ManagingError::NoMembers { .. } => "MANAGING_NO_MEMBERS",
            ManagingError::Membership(_) => "MANAGING_MEMBERSHIP_UNAVAILABLE",
            ManagingError::Store(_) => "MANAGING_STORE_ERROR",
            ManagingError::StoreNotReady { .. } => "MANAGING_STORE_NOT_READY",
            ManagingError::Internal { .. } => "MANAGING_INTERNAL_ERROR",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ManagingError::QuotaExceeded { .. }
                | ManagingError::QuotaExhausted
                | ManagingError::Membership(_)
                | ManagingError::StoreNotReady { .. }
        )
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ManagingError::InvalidRequest { .. }
                | ManagingError::QuotaExceeded { .. }
                | ManagingError::QuotaExhausted
                | ManagingError::NoMembers { .. }
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ManagingError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ManagingError::QuotaExceeded { .. }
            | ManagingError::QuotaExhausted
            | ManagingError::NoMembers { .. } => StatusCode::TOO_MANY_REQUESTS,
            ManagingError::Membership(_) => StatusCode::BAD_GATEWAY,
            ManagingError::StoreNotReady { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ManagingError::Store(_) | ManagingError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ManagingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        let body = Json(ErrorResponse::new(
            self.error_code(),
            self.to_string(),
            self.is_retryable(),
        ));

        (status, body).into_response()
    }
}
