use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::db::store::StoreError;
use crate::services::classifier::ClassifierError;
use crate::services::queue::QueueError;

/// Errors surfaced by the moderation handlers.
#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    /// Malformed input, rejected before any side effect.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// No classifier loaded.
    #[error("Service Unavailable: Model is not loaded")]
    ServiceUnavailable,

    #[error("Database error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Prediction error: {0}")]
    Processing(#[from] ClassifierError),
}

impl ModerationError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ModerationError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ModerationError::NotFound(_) => StatusCode::NOT_FOUND,
            ModerationError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ModerationError::Store(_)
            | ModerationError::Queue(_)
            | ModerationError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ModerationError::Validation(_) => "validation_error",
            ModerationError::NotFound(_) => "not_found",
            ModerationError::ServiceUnavailable => "service_unavailable",
            ModerationError::Store(_) | ModerationError::Queue(_) => "dependency_error",
            ModerationError::Processing(_) => "processing_error",
        }
    }
}

impl From<garde::Report> for ModerationError {
    fn from(report: garde::Report) -> Self {
        ModerationError::Validation(report.to_string())
    }
}

impl IntoResponse for ModerationError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self, "Request failed");
        }

        let body = json!({
            "error": self.kind(),
            "detail": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
