//! Quota consumption and miner sampling

use crate::api::json_body;
use crate::error::Result;
use crate::server::AppState;
use axum::{extract::rejection::JsonRejection, extract::State, Json};
use inference_common::protocol::{ConsumeRequest, MinerSamplingResponse};
use tracing::debug;

/// `POST /api/consume`
///
/// With a non-empty `minerIdentity` consumes quota against that miner only;
/// otherwise samples up to `sampleSize` miners weighted by remaining capacity.
pub async fn consume(
    State(state): State<AppState>,
    body: std::result::Result<Json<ConsumeRequest>, JsonRejection>,
) -> Result<Json<MinerSamplingResponse>> {
    let request = json_body(body)?;
    debug!(
        validator = %request.validator_identity,
        sample_size = request.sample_size,
        "Consume request"
    );

    let response = state.selection.consume(&request).await?;
    Ok(Json(response))
}
