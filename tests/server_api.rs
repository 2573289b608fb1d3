//! HTTP surface tests.
//!
//! Drives the router in-process with `tower::ServiceExt::oneshot`. Routes
//! that would reach out to the GitHub API are only tested for their local
//! behavior (lock conflicts, validation); the engine itself has its own
//! suite.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use devtempo::config;
use devtempo::db;
use devtempo::server::{router, AppState};
use devtempo::services::sync_lock::{SyncLock, SyncScope};

async fn test_state() -> (AppState, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let pool = db::initialize(&dir.path().join("test.db")).await.unwrap();
    let state = AppState {
        pool,
        sync_lock: SyncLock::new(),
        shutdown: CancellationToken::new(),
    };
    (state, dir)
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn sync_status_starts_idle() {
    let (state, _dir) = test_state().await;
    let app = router(state);

    let response = app
        .oneshot(Request::get("/api/sync").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["syncInProgress"], false);
    assert!(json["jobs"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn sync_trigger_conflicts_while_lock_held() {
    let (state, _dir) = test_state().await;
    let _permit = state.sync_lock.try_acquire(SyncScope::All).unwrap();
    let app = router(state);

    let response = app
        .oneshot(json_request("POST", "/api/sync", serde_json::json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    assert_eq!(json["code"], "CONFLICT");
}

#[tokio::test]
async fn settings_round_trip_masks_secrets() {
    let (state, _dir) = test_state().await;
    config::set_setting(&state.pool, config::KEY_GITHUB_PAT, "ghp_secret1234")
        .await
        .unwrap();
    config::set_setting(&state.pool, "churn_window_days", "21")
        .await
        .unwrap();
    let app = router(state);

    let response = app
        .clone()
        .oneshot(Request::get("/api/settings").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["churn_window_days"], "21");
    let masked = json["github_pat"].as_str().unwrap();
    assert!(masked.ends_with("1234"));
    assert!(masked.starts_with("*"));
    assert!(!masked.contains("secret"));

    let response = app
        .oneshot(json_request(
            "PUT",
            "/api/settings",
            serde_json::json!({"key": "exclude_globs", "value": "[\"*.lock\"]"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["saved"], true);
}

#[tokio::test]
async fn settings_put_requires_key() {
    let (state, _dir) = test_state().await;
    let app = router(state);

    let response = app
        .oneshot(json_request(
            "PUT",
            "/api/settings",
            serde_json::json!({"key": "", "value": "x"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn repo_registration_round_trip() {
    let (state, _dir) = test_state().await;
    let app = router(state);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/repos",
            serde_json::json!({"owner": "acme", "name": "widgets"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["fullName"], "acme/widgets");

    let response = app
        .clone()
        .oneshot(Request::get("/api/repos").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 1);

    // Slashes in either field would corrupt the full-name identity.
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/repos",
            serde_json::json!({"owner": "acme/evil", "name": "widgets"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn churn_route_returns_empty_series_for_empty_store() {
    let (state, _dir) = test_state().await;
    let app = router(state);

    let response = app
        .oneshot(
            Request::get("/api/metrics/churn?startDate=0&endDate=1000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn outliers_route_returns_both_sections() {
    let (state, _dir) = test_state().await;
    let app = router(state);

    let response = app
        .oneshot(
            Request::get("/api/metrics/outliers?startDate=0&endDate=1000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json["outliers"].as_array().unwrap().is_empty());
    assert!(json["trendOutliers"].as_array().unwrap().is_empty());
}
