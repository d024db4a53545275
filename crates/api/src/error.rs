use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use merge::MergeError;
use pipeline::PipelineError;
use serde_json::json;
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
    Pipeline(PipelineError),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError::Pipeline(err)
    }
}

impl From<MergeError> for ApiError {
    fn from(err: MergeError) -> Self {
        ApiError::Pipeline(PipelineError::Merge(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::Internal(msg) => {
                error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg }))
            }
            ApiError::Pipeline(PipelineError::AlreadyRunning { tenant }) => (
                StatusCode::CONFLICT,
                json!({ "status": "already_running", "tenant": tenant }),
            ),
            ApiError::Pipeline(PipelineError::UnknownDocument(id))
            | ApiError::Pipeline(PipelineError::Merge(MergeError::NotFound(id))) => {
                (StatusCode::NOT_FOUND, json!({ "error": format!("{id} not found") }))
            }
            ApiError::Pipeline(PipelineError::Merge(err @ MergeError::InvalidField { .. })) => {
                (StatusCode::BAD_REQUEST, json!({ "error": err.to_string() }))
            }
            ApiError::Pipeline(PipelineError::Merge(err @ MergeError::Contention { .. })) => {
                (StatusCode::CONFLICT, json!({ "status": "busy", "error": err.to_string() }))
            }
            ApiError::Pipeline(err) => {
                error!(error = %err, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": err.to_string() }))
            }
        };
        (status, Json(body)).into_response()
    }
}
