//! Request-side moderation operations, independent of the HTTP layer.
//!
//! Every operation that needs the classifier checks for it first, before
//! touching the store or the queue.

use crate::app_state::AppState;
use crate::error::ModerationError;
use crate::models::listing::ListingRecord;
use crate::models::moderation::{AsyncPredictResponse, ModerationResultResponse, PredictResponse};
use crate::services::features;

fn ensure_positive(name: &str, value: i64) -> Result<(), ModerationError> {
    if value < 1 {
        return Err(ModerationError::Validation(format!(
            "{} must be a positive integer, got {}",
            name, value
        )));
    }
    Ok(())
}

async fn require_listing(state: &AppState, item_id: i64) -> Result<ListingRecord, ModerationError> {
    state
        .listings
        .get_listing(item_id)
        .await
        .map_err(|e| {
            tracing::error!(item_id, error = %e, "Failed to look up listing");
            ModerationError::Store(e)
        })?
        .ok_or_else(|| {
            ModerationError::NotFound(format!("Advertisement with item_id={} not found", item_id))
        })
}

/// Accept an item for asynchronous moderation.
///
/// The task row is written before the work item is published. If publishing
/// fails the task stays pending and the caller gets an error; nothing is
/// rolled back.
pub async fn submit(state: &AppState, item_id: i64) -> Result<AsyncPredictResponse, ModerationError> {
    ensure_positive("item_id", item_id)?;
    state.classifier()?;

    require_listing(state, item_id).await?;

    let task_id = state.tasks.create_task(item_id).await.map_err(|e| {
        tracing::error!(item_id, error = %e, "Failed to create moderation task");
        ModerationError::Store(e)
    })?;

    if let Err(e) = state.queue.publish_work(item_id, Some(task_id)).await {
        metrics::counter!("moderation_submission_failures_total").increment(1);
        tracing::error!(
            item_id,
            task_id,
            error = %e,
            "Task created but work item was not published; task left pending"
        );
        return Err(ModerationError::Queue(e));
    }

    metrics::counter!("moderation_submissions_total").increment(1);
    tracing::info!(item_id, task_id, "Moderation task submitted");

    Ok(AsyncPredictResponse {
        task_id,
        status: "pending".to_string(),
        message: "Moderation request accepted".to_string(),
    })
}

/// Current state of a moderation task.
pub async fn get_result(
    state: &AppState,
    task_id: i64,
) -> Result<ModerationResultResponse, ModerationError> {
    ensure_positive("task_id", task_id)?;

    let task = state
        .tasks
        .get_task(task_id)
        .await?
        .ok_or_else(|| ModerationError::NotFound(format!("Task with id={} not found", task_id)))?;

    Ok(ModerationResultResponse::from(task))
}

/// Score a stored listing synchronously, without creating a task.
pub async fn predict_for_item(
    state: &AppState,
    item_id: i64,
) -> Result<PredictResponse, ModerationError> {
    ensure_positive("item_id", item_id)?;
    let classifier = state.classifier()?.clone();

    let listing = require_listing(state, item_id).await?;
    let features = features::extract(&listing);
    tracing::debug!(item_id, features = ?features.0, "Features prepared");

    let prediction = classifier.score(&features)?;
    tracing::info!(
        item_id,
        is_violation = prediction.is_violation,
        probability = prediction.probability,
        "Prediction complete"
    );
    Ok(prediction)
}
