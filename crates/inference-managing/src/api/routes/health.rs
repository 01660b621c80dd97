//! Health check route handler

use axum::Json;
use inference_common::protocol::HealthResponse;

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse::healthy(crate::VERSION))
}
