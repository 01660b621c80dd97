//! HTTP API of the managing service

pub mod routes;

use crate::error::ManagingError;
use crate::server::AppState;
use axum::{
    extract::rejection::JsonRejection,
    routing::{get, post},
    Json, Router,
};

/// Create all API routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/consume", post(routes::consume::consume))
        .route("/api/update-score", post(routes::scores::update_score))
        .route("/api/get-scores", get(routes::scores::get_scores))
        .route(
            "/api/score-history/:identity",
            get(routes::scores::score_history),
        )
        .route("/api/health", get(routes::health::health_check))
}

/// Unwrap a JSON body, reporting malformed input as a 400
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ManagingError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ManagingError::InvalidRequest {
            message: rejection.body_text(),
        })
}
