//! API route definitions

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use civic::{Issue, IssueService, IssueStore};

use crate::error::ApiError;
use crate::upload::{IssueForm, UploadDir, UPLOADS_PREFIX};

/// Largest accepted request body (multipart photo uploads included).
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Shared application state
pub struct AppState<S: IssueStore> {
    pub service: Arc<IssueService<S>>,
    pub uploads: UploadDir,
}

impl<S: IssueStore> AppState<S> {
    pub fn new(service: IssueService<S>, uploads: UploadDir) -> Self {
        Self {
            service: Arc::new(service),
            uploads,
        }
    }
}

impl<S: IssueStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            uploads: self.uploads.clone(),
        }
    }
}

/// Create API routes (mounted under `/api` by [`create_app`])
pub fn create_routes<S: IssueStore>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/issues",
            get(list_issues)
                .post(create_issue)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/issues/:id", get(get_issue))
        .route("/issues/:id/status", patch(update_status))
        .with_state(state)
}

/// Full application: API, uploaded photo files, CORS and request tracing
pub fn create_app<S: IssueStore>(state: AppState<S>) -> Router {
    let uploads = ServeDir::new(state.uploads.root());

    // Open CORS for the browser client
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", create_routes(state))
        .nest_service(&format!("/{}", UPLOADS_PREFIX), uploads)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Health check endpoint
async fn health_check<S: IssueStore>(State(state): State<AppState<S>>) -> impl IntoResponse {
    match state.service.health().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "ok": true }))),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "ok": false })),
            )
        }
    }
}

/// Report a new issue
async fn create_issue<S: IssueStore>(
    State(state): State<AppState<S>>,
    form: IssueForm,
) -> Result<(StatusCode, Json<Issue>), ApiError> {
    const FAILED: &str = "Failed to save issue";

    let mut submission = form.submission;
    submission
        .validate()
        .map_err(|e| ApiError::from_issue(e, FAILED))?;

    if let Some(photo) = &form.photo {
        let path = state.uploads.save(photo).await.map_err(|e| {
            tracing::error!("Failed to store photo: {:#}", e);
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, FAILED)
        })?;
        submission.photo_path = Some(path);
    }

    let issue = state
        .service
        .create_issue(submission)
        .await
        .map_err(|e| ApiError::from_issue(e, FAILED))?;

    Ok((StatusCode::CREATED, Json(issue)))
}

/// Listing query parameters
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Only issues reported by this user
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

/// List issues, newest first
async fn list_issues<S: IssueStore>(
    State(state): State<AppState<S>>,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<Issue>>, ApiError> {
    state
        .service
        .list_issues(params.user_id.as_deref())
        .await
        .map(Json)
        .map_err(|e| ApiError::from_issue(e, "Failed to list issues"))
}

/// Get single issue by ID
async fn get_issue<S: IssueStore>(
    Path(id): Path<String>,
    State(state): State<AppState<S>>,
) -> Result<Json<Issue>, ApiError> {
    state
        .service
        .get_issue(&id)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_issue(e, "Failed to fetch issue"))
}

/// Status update request body
#[derive(Debug, Default, Deserialize)]
pub struct StatusRequest {
    #[serde(default)]
    status: Option<String>,
}

/// Status update response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub id: String,
    pub status: String,
}

/// Manually set an issue's status
///
/// The body is parsed leniently: a missing, empty or non-JSON body is
/// reported as a missing status.
async fn update_status<S: IssueStore>(
    Path(id): Path<String>,
    State(state): State<AppState<S>>,
    body: Bytes,
) -> Result<Json<StatusResponse>, ApiError> {
    let request: StatusRequest = serde_json::from_slice(&body).unwrap_or_default();

    let status = state
        .service
        .update_status(&id, request.status.as_deref())
        .await
        .map_err(|e| ApiError::from_issue(e, "Failed to update status"))?;

    Ok(Json(StatusResponse {
        id,
        status: status.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum_test::TestServer;
    use civic::{InMemoryStorage, IssueSubmission, Status};
    use tempfile::TempDir;

    fn create_test_app() -> (TempDir, TestServer, Arc<IssueService<InMemoryStorage>>) {
        let temp = TempDir::new().unwrap();
        let state = AppState::new(
            IssueService::new(InMemoryStorage::new()),
            UploadDir::new(temp.path()),
        );
        let service = Arc::clone(&state.service);
        let server = TestServer::new(create_routes(state)).unwrap();
        (temp, server, service)
    }

    #[tokio::test]
    async fn test_health_check() {
        let (_temp, server, _) = create_test_app();
        let response = server.get("/health").await;
        response.assert_status_ok();
        response.assert_json(&serde_json::json!({ "ok": true }));
    }

    #[tokio::test]
    async fn test_list_issues_empty() {
        let (_temp, server, _) = create_test_app();
        let response = server.get("/issues").await;
        response.assert_status_ok();
        let issues: Vec<Issue> = response.json();
        assert_eq!(issues.len(), 0);
    }

    #[tokio::test]
    async fn test_get_issue_not_found() {
        let (_temp, server, _) = create_test_app();
        let response = server.get("/issues/nonexistent").await;
        response.assert_status(StatusCode::NOT_FOUND);
        response.assert_json(&serde_json::json!({ "error": "Not found" }));
    }

    #[tokio::test]
    async fn test_create_issue_from_json_body() {
        let (_temp, server, _) = create_test_app();
        let response = server
            .post("/issues")
            .json(&serde_json::json!({
                "title": "Broken light",
                "description": "Out since Monday",
                "location": "Elm St",
                "userId": "u1",
                "userName": "Ada"
            }))
            .await;

        response.assert_status(StatusCode::CREATED);
        let body: serde_json::Value = response.json();
        assert_eq!(body["title"], "Broken light");
        assert_eq!(body["userName"], "Ada");
        assert_eq!(body["status"], "Pending");
        assert_eq!(body["photoPath"], serde_json::Value::Null);
        assert!(body["id"].as_str().is_some_and(|id| !id.is_empty()));
        assert!(body["dateCreated"].as_str().is_some_and(|d| d.ends_with('Z')));
    }

    #[tokio::test]
    async fn test_create_issue_without_content_is_bad_request() {
        let (_temp, server, service) = create_test_app();
        let response = server
            .post("/issues")
            .json(&serde_json::json!({ "location": "Elm St" }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        response.assert_json(&serde_json::json!({ "error": "title or description is required" }));
        assert!(service.storage().is_empty());
    }

    #[tokio::test]
    async fn test_create_issue_with_empty_body_is_bad_request() {
        let (_temp, server, _) = create_test_app();
        let response = server.post("/issues").await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_issues_filters_by_user() {
        let (_temp, server, service) = create_test_app();
        for (user, title) in [("u1", "First"), ("u2", "Other"), ("u1", "Second")] {
            service
                .create_issue(IssueSubmission {
                    user_id: Some(user.to_string()),
                    title: Some(title.to_string()),
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let response = server.get("/issues").add_query_param("userId", "u1").await;
        response.assert_status_ok();
        let issues: Vec<Issue> = response.json();
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.user_id == "u1"));
        assert!(issues[0].created_at >= issues[1].created_at);
    }

    #[tokio::test]
    async fn test_update_status_missing_body_is_bad_request() {
        let (_temp, server, service) = create_test_app();
        let issue = service
            .create_issue(IssueSubmission {
                title: Some("A".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let response = server.patch(&format!("/issues/{}/status", issue.id)).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        response.assert_json(&serde_json::json!({ "error": "status required" }));
    }

    #[tokio::test]
    async fn test_update_status_unknown_issue_is_not_found() {
        let (_temp, server, _) = create_test_app();
        let response = server
            .patch("/issues/nonexistent/status")
            .json(&serde_json::json!({ "status": "Resolved" }))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_status_returns_id_and_status() {
        let (_temp, server, service) = create_test_app();
        let issue = service
            .create_issue(IssueSubmission {
                title: Some("A".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let response = server
            .patch(&format!("/issues/{}/status", issue.id))
            .json(&serde_json::json!({ "status": "Sent to Authority" }))
            .await;

        response.assert_status_ok();
        let body: StatusResponse = response.json();
        assert_eq!(body.id, issue.id);
        assert_eq!(body.status, "Sent to Authority");
        assert_eq!(
            service.get_issue(&issue.id).await.unwrap().status,
            Status::SentToAuthority
        );
    }
}
