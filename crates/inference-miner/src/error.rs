//! Error types for the miner

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use inference_common::auth::AuthError;
use inference_common::protocol::{ChallengeError, ErrorResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MinerError {
    #[error("Authentication failed: {0}")]
    Unauthenticated(AuthError),

    #[error("Caller not allowed: {0}")]
    Forbidden(AuthError),

    #[error("Invalid payload: {message}")]
    InvalidPayload { message: String },

    #[error("Unsolvable payload: {0}")]
    Unsolvable(ChallengeError),
}

impl From<AuthError> for MinerError {
    fn from(error: AuthError) -> Self {
        if error.is_forbidden() {
            MinerError::Forbidden(error)
        } else {
            MinerError::Unauthenticated(error)
        }
    }
}

pub type Result<T> = std::result::Result<T, MinerError>;

impl MinerError {
    pub fn error_code(&self) -> &'static str {
        match self {
            MinerError::Unauthenticated(_) => "MINER_UNAUTHENTICATED",
            MinerError::Forbidden(_) => "MINER_FORBIDDEN",
            MinerError::InvalidPayload { .. } => "MINER_INVALID_PAYLOAD",
            MinerError::Unsolvable(_) => "MINER_UNSOLVABLE_PAYLOAD",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            MinerError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            MinerError::Forbidden(_) => StatusCode::FORBIDDEN,
            MinerError::InvalidPayload { .. } => StatusCode::BAD_REQUEST,
            MinerError::Unsolvable(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl IntoResponse for MinerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorResponse::new(
            self.error_code(),
            self.to_string(),
            false,
        ));
        (status, body).into_response()
    }
}
