//! Score reporting and queries

use crate::api::json_body;
use crate::error::{ManagingError, Result};
use crate::server::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use inference_common::protocol::{
    ScoreHistoryResponse, ScoresResponse, UpdateScoreRequest, UpdateScoreResponse,
};
use tracing::info;

/// `POST /api/update-score`
pub async fn update_score(
    State(state): State<AppState>,
    body: std::result::Result<Json<UpdateScoreRequest>, JsonRejection>,
) -> Result<Json<UpdateScoreResponse>> {
    let request = json_body(body)?;
    request
        .validate()
        .map_err(|message| ManagingError::InvalidRequest { message })?;

    state
        .scores
        .update_scores(&request.miner_identities, &request.scores)
        .await?;

    info!("Recorded scores for {} miners", request.miner_identities.len());
    Ok(Json(UpdateScoreResponse {
        success: true,
        miner_identities: request.miner_identities,
    }))
}

/// `GET /api/get-scores`
pub async fn get_scores(State(state): State<AppState>) -> Result<Json<ScoresResponse>> {
    let scores = state.scores.all_average_scores().await?;
    Ok(Json(ScoresResponse { scores }))
}

/// `GET /api/score-history/:identity`
pub async fn score_history(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<Json<ScoreHistoryResponse>> {
    let scores = state.scores.score_history(&identity).await?;
    let average_score = state.scores.average_score(&identity).await?;
    Ok(Json(ScoreHistoryResponse {
        identity,
        scores,
        average_score,
    }))
}
