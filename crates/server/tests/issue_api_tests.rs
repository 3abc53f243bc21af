//! Integration tests for the issue API endpoints

use axum::http::StatusCode;
use axum_test::TestServer;
use chrono::{Duration, Utc};
use civic::config::SweepConfig;
use civic::storage::{InMemoryStorage, IssueStore, JsonFileStorage};
use civic::{Issue, IssueService, Status, Sweeper, TransitionPolicy};
use civic_server::upload::UploadDir;
use civic_server::{create_app, AppState};
use tempfile::TempDir;

/// Helper to create a test server over the full app (API under `/api`)
fn create_test_server<S: IssueStore>(service: IssueService<S>) -> (TempDir, TestServer) {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let uploads = UploadDir::new(temp.path());
    let app = create_app(AppState::new(service, uploads));
    let server = TestServer::new(app).expect("Failed to create test server");
    (temp, server)
}

fn multipart_body(boundary: &str, fields: &[(&str, &str)], photo: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                boundary, name, value
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, data)) = photo {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"photo\"; filename=\"{}\"\r\nContent-Type: image/png\r\n\r\n",
                boundary, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    body
}

#[tokio::test]
async fn test_report_fetch_and_resolve_issue() {
    let (_temp, server) = create_test_server(IssueService::new(InMemoryStorage::new()));

    let created = server
        .post("/api/issues")
        .json(&serde_json::json!({
            "title": "Broken light",
            "description": "Streetlight out on Elm St"
        }))
        .await;
    created.assert_status(StatusCode::CREATED);
    let created: Issue = created.json();

    let fetched = server.get(&format!("/api/issues/{}", created.id)).await;
    fetched.assert_status_ok();
    let fetched: Issue = fetched.json();
    assert_eq!(fetched.title, "Broken light");
    assert_eq!(fetched.description, "Streetlight out on Elm St");
    assert_eq!(fetched.status, Status::Pending);
    assert_eq!(fetched.created_at, created.created_at);

    server
        .patch(&format!("/api/issues/{}/status", created.id))
        .json(&serde_json::json!({ "status": "Resolved" }))
        .await
        .assert_status_ok();

    let fetched: Issue = server
        .get(&format!("/api/issues/{}", created.id))
        .await
        .json();
    assert_eq!(fetched.status, Status::Resolved);
}

#[tokio::test]
async fn test_description_only_report_gets_truncated_title() {
    let (_temp, server) = create_test_server(IssueService::new(InMemoryStorage::new()));
    let description = "Large pothole in the left lane of Main Street near the school";

    let response = server
        .post("/api/issues")
        .json(&serde_json::json!({ "description": description }))
        .await;

    response.assert_status(StatusCode::CREATED);
    let issue: Issue = response.json();
    assert_eq!(issue.title, description.chars().take(40).collect::<String>());
    assert_eq!(issue.description, description);
    assert_eq!(issue.user_id, "demo-user-1");
    assert_eq!(issue.user_name, "Demo User");
}

#[tokio::test]
async fn test_multipart_report_with_photo_is_served_back() {
    let (temp, server) = create_test_server(IssueService::new(InMemoryStorage::new()));
    let boundary = "civic-test-boundary";
    let body = multipart_body(
        boundary,
        &[
            ("title", "Graffiti"),
            ("location", "Underpass"),
            ("userId", "u7"),
            ("userName", "Grace"),
        ],
        Some(("wall.png", b"fake-png")),
    );

    let response = server
        .post("/api/issues")
        .content_type(&format!("multipart/form-data; boundary={}", boundary))
        .bytes(body.into())
        .await;

    response.assert_status(StatusCode::CREATED);
    let issue: Issue = response.json();
    assert_eq!(issue.title, "Graffiti");
    assert_eq!(issue.location, "Underpass");
    assert_eq!(issue.user_id, "u7");
    assert_eq!(issue.user_name, "Grace");

    let photo_path = issue.photo_path.expect("photo path recorded");
    assert!(photo_path.starts_with("uploads/"));
    assert!(photo_path.ends_with(".png"));

    let file_name = photo_path.trim_start_matches("uploads/");
    assert!(temp.path().join(file_name).exists());

    let served = server.get(&format!("/{}", photo_path)).await;
    served.assert_status_ok();
    assert_eq!(served.as_bytes().to_vec(), b"fake-png".to_vec());
}

#[tokio::test]
async fn test_multipart_without_title_or_description_is_rejected() {
    let (temp, server) = create_test_server(IssueService::new(InMemoryStorage::new()));
    let boundary = "civic-test-boundary";
    let body = multipart_body(boundary, &[("location", "Park")], Some(("a.png", b"x")));

    let response = server
        .post("/api/issues")
        .content_type(&format!("multipart/form-data; boundary={}", boundary))
        .bytes(body.into())
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    // No orphan upload left behind
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_list_is_newest_first_and_filtered() {
    let storage = InMemoryStorage::new();
    let now = Utc::now();
    let seeded = [
        (300, "u1", "Oldest"),
        (10, "u1", "Newest"),
        (60, "u2", "Other"),
        (120, "u1", "Middle"),
    ];
    for (offset, user, title) in seeded {
        let new = civic::IssueSubmission {
            user_id: Some(user.to_string()),
            title: Some(title.to_string()),
            ..Default::default()
        }
        .normalize()
        .unwrap();
        storage
            .insert_issue(new, now - Duration::seconds(offset))
            .await
            .unwrap();
    }
    let (_temp, server) = create_test_server(IssueService::new(storage));

    let issues: Vec<Issue> = server
        .get("/api/issues")
        .add_query_param("userId", "u1")
        .await
        .json();
    let titles: Vec<_> = issues.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(titles, vec!["Newest", "Middle", "Oldest"]);

    let all: Vec<Issue> = server.get("/api/issues").await.json();
    assert_eq!(all.len(), 4);
    assert_eq!(all[1].title, "Other");
}

#[tokio::test]
async fn test_sweep_progress_is_visible_through_api() {
    let storage = InMemoryStorage::new();
    let sweeper = Sweeper::new(storage.clone(), SweepConfig::default());
    let (_temp, server) = create_test_server(IssueService::new(storage));

    let issue: Issue = server
        .post("/api/issues")
        .json(&serde_json::json!({ "title": "Fallen tree" }))
        .await
        .json();

    sweeper
        .run_once(issue.created_at + Duration::seconds(60))
        .await
        .unwrap();
    let fetched: Issue = server.get(&format!("/api/issues/{}", issue.id)).await.json();
    assert_eq!(fetched.status, Status::SentToAuthority);

    sweeper
        .run_once(issue.created_at + Duration::minutes(5))
        .await
        .unwrap();
    let fetched: Issue = server.get(&format!("/api/issues/{}", issue.id)).await.json();
    assert_eq!(fetched.status, Status::Resolved);
}

#[tokio::test]
async fn test_forward_only_policy_returns_conflict() {
    let service = IssueService::new(InMemoryStorage::new()).with_policy(TransitionPolicy::ForwardOnly);
    let (_temp, server) = create_test_server(service);

    let issue: Issue = server
        .post("/api/issues")
        .json(&serde_json::json!({ "title": "Leaking hydrant" }))
        .await
        .json();

    server
        .patch(&format!("/api/issues/{}/status", issue.id))
        .json(&serde_json::json!({ "status": "Resolved" }))
        .await
        .assert_status_ok();

    let response = server
        .patch(&format!("/api/issues/{}/status", issue.id))
        .json(&serde_json::json!({ "status": "Pending" }))
        .await;
    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_unknown_status_value_is_bad_request() {
    let (_temp, server) = create_test_server(IssueService::new(InMemoryStorage::new()));
    let issue: Issue = server
        .post("/api/issues")
        .json(&serde_json::json!({ "title": "Noise" }))
        .await
        .json();

    let response = server
        .patch(&format!("/api/issues/{}/status", issue.id))
        .json(&serde_json::json!({ "status": "Closed" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_json_storage_round_trip_through_api() {
    let data = TempDir::new().unwrap();
    let storage = JsonFileStorage::new(data.path());
    storage.init().await.unwrap();
    let (_temp, server) = create_test_server(IssueService::new(storage));

    server.get("/api/health").await.assert_status_ok();

    let issue: Issue = server
        .post("/api/issues")
        .json(&serde_json::json!({ "title": "Broken light", "userId": "u1" }))
        .await
        .json();

    let response = server.get(&format!("/api/issues/{}", issue.id)).await;
    response.assert_status_ok();
    assert_eq!(response.json::<Issue>(), issue);

    server
        .get("/api/issues/not-a-uuid")
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn test_health_reports_storage_failure() {
    // JSON storage that was never initialized cannot read its index
    let data = TempDir::new().unwrap();
    let (_temp, server) =
        create_test_server(IssueService::new(JsonFileStorage::new(data.path().join("missing"))));

    let response = server.get("/api/health").await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    response.assert_json(&serde_json::json!({ "ok": false }));
}
