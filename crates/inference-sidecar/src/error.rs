//! Error types for the sidecar API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use inference_common::protocol::ErrorResponse;
use inference_common::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SidecarError {
    /// No sync has completed since startup, or the last one expired
    #[error("No membership snapshot for netuid {netuid} yet")]
    SnapshotUnavailable { netuid: u16 },

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Stored snapshot is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SidecarError>;

impl SidecarError {
    pub fn error_code(&self) -> &'static str {
        match self {
            SidecarError::SnapshotUnavailable { .. } => "SIDECAR_SNAPSHOT_UNAVAILABLE",
            SidecarError::Store(_) => "SIDECAR_STORE_ERROR",
            SidecarError::Malformed(_) => "SIDECAR_MALFORMED_SNAPSHOT",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SidecarError::SnapshotUnavailable { .. } | SidecarError::Store(StoreError::NotReady(_))
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            SidecarError::SnapshotUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            SidecarError::Store(StoreError::NotReady(_)) => StatusCode::SERVICE_UNAVAILABLE,
            SidecarError::Store(_) | SidecarError::Malformed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for SidecarError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorResponse::new(
            self.error_code(),
            self.to_string(),
            self.is_retryable(),
        ));
        (status, body).into_response()
    }
}
