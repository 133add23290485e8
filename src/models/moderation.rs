use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::task::ModerationTask;

/// Request to moderate a stored listing asynchronously.
#[derive(Debug, Deserialize, Validate)]
pub struct AsyncPredictRequest {
    #[garde(range(min = 1))]
    pub item_id: i64,
}

/// Query string for the synchronous scoring endpoint.
#[derive(Debug, Deserialize, Validate)]
pub struct SimplePredictQuery {
    #[garde(range(min = 1))]
    pub item_id: i64,
}

/// Response after a moderation task was accepted.
#[derive(Debug, Serialize, Deserialize)]
pub struct AsyncPredictResponse {
    pub task_id: i64,
    pub status: String,
    pub message: String,
}

/// Classifier decision for one listing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PredictResponse {
    pub is_violation: bool,
    pub probability: f64,
}

/// Response for querying a moderation task.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ModerationResultResponse {
    pub task_id: i64,
    pub status: String,
    pub is_violation: Option<bool>,
    pub probability: Option<f64>,
    pub error_message: Option<String>,
}

impl From<ModerationTask> for ModerationResultResponse {
    fn from(task: ModerationTask) -> Self {
        Self {
            task_id: task.id,
            status: task.status.to_string(),
            is_violation: task.is_violation,
            probability: task.probability,
            error_message: task.error_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::TaskStatus;
    use chrono::Utc;

    #[test]
    fn test_item_id_must_be_positive() {
        assert!(AsyncPredictRequest { item_id: 1 }.validate().is_ok());
        assert!(AsyncPredictRequest { item_id: 0 }.validate().is_err());
        assert!(SimplePredictQuery { item_id: -5 }.validate().is_err());
    }

    #[test]
    fn test_result_view_maps_task_fields() {
        let mut task = ModerationTask::pending(9, 42, Utc::now());
        task.status = TaskStatus::Completed;
        task.is_violation = Some(true);
        task.probability = Some(0.82);
        task.processed_at = Some(Utc::now());

        let view = ModerationResultResponse::from(task);
        assert_eq!(view.task_id, 9);
        assert_eq!(view.status, "completed");
        assert_eq!(view.is_violation, Some(true));
        assert_eq!(view.probability, Some(0.82));
        assert_eq!(view.error_message, None);
    }
}
