//! Mapping of issue errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use civic::IssueError;

/// JSON error response: `{"error": "<message>"}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Classify an issue error; storage failures get the route's generic message.
    pub fn from_issue(err: IssueError, storage_message: &str) -> Self {
        match err {
            IssueError::Validation(message) => Self::bad_request(message),
            IssueError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "Not found"),
            err @ IssueError::InvalidTransition { .. } => {
                Self::new(StatusCode::CONFLICT, err.to_string())
            }
            IssueError::Storage(e) => {
                tracing::error!("{}: {:#}", storage_message, e);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, storage_message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}
