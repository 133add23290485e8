use axum::extract::{Path, Query, State};
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::error::ModerationError;
use crate::models::moderation::{
    AsyncPredictRequest, AsyncPredictResponse, ModerationResultResponse, PredictResponse,
    SimplePredictQuery,
};
use crate::services::moderation;

/// POST /async_predict: Queue a stored listing for moderation.
pub async fn async_predict(
    State(state): State<AppState>,
    Json(request): Json<AsyncPredictRequest>,
) -> Result<Json<AsyncPredictResponse>, ModerationError> {
    request.validate()?;
    let response = moderation::submit(&state, request.item_id).await?;
    Ok(Json(response))
}

/// GET /moderation_result/{task_id}: Check a moderation task.
pub async fn get_moderation_result(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
) -> Result<Json<ModerationResultResponse>, ModerationError> {
    let response = moderation::get_result(&state, task_id).await?;
    Ok(Json(response))
}

/// POST /simple_predict?item_id=: Score a stored listing synchronously.
pub async fn simple_predict(
    State(state): State<AppState>,
    Query(query): Query<SimplePredictQuery>,
) -> Result<Json<PredictResponse>, ModerationError> {
    query.validate()?;
    let response = moderation::predict_for_item(&state, query.item_id).await?;
    Ok(Json(response))
}
