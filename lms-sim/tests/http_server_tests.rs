//! HTTP Server & Routing Integration Tests
//!
//! Drive the router in-process with `tower::ServiceExt::oneshot`.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use lms_common::events::JobStatus;
use lms_sim::{build_router, AppState, SimConfig};
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_state(token: Option<&str>) -> AppState {
    AppState::new(SimConfig {
        token: token.map(str::to_string),
        step: 50.0,
        models: vec!["grammar".to_string()],
        ..Default::default()
    })
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_reports_module() {
    let app = build_router(test_state(None));

    let response = app.oneshot(get("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "lms-sim");
    assert_eq!(body["jobs"], 0);
}

#[tokio::test]
async fn test_create_job_then_poll_progress() {
    let state = test_state(None);
    let app = build_router(state.clone());

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/analysis",
            json!({"contentId": "C1", "jobId": "J1"}),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["jobId"], "J1");
    assert_eq!(body["status"], "pending");

    assert_eq!(state.tick().await, 1);

    let response = app
        .oneshot(get("/api/analysis/J1/progress", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["overallProgress"], 50.0);
    assert_eq!(body["status"], "processing");
    assert_eq!(body["currentStage"], "analysis");
    assert_eq!(body["modelProgress"][0]["modelId"], "grammar");
}

#[tokio::test]
async fn test_duplicate_job_is_conflict() {
    let app = build_router(test_state(None));
    let create = || post_json("/api/analysis", json!({"contentId": "C1", "jobId": "J1"}), None);

    let first = app.clone().oneshot(create()).await.unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app.oneshot(create()).await.unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body = body_json(second).await;
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let app = build_router(test_state(None));
    let response = app
        .oneshot(get("/api/analysis/missing/progress", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_token_required_when_configured() {
    let app = build_router(test_state(Some("secret")));

    let missing = app
        .clone()
        .oneshot(get("/api/analysis/J1/progress", None))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = app
        .clone()
        .oneshot(get("/api/analysis/J1/progress", Some("nope")))
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let right = app
        .oneshot(get("/api/analysis/J1/progress", Some("secret")))
        .await
        .unwrap();
    assert_eq!(right.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_fail_job_freezes_it() {
    let state = test_state(None);
    let app = build_router(state.clone());

    app.clone()
        .oneshot(post_json("/api/analysis", json!({"contentId": "C1", "jobId": "J1"}), None))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(post_json("/api/analysis/J1/fail", json!({"error": "model timeout"}), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"], "model timeout");

    assert_eq!(state.tick().await, 0, "failed jobs no longer advance");
    assert_eq!(
        state.jobs.read().await.get("J1").unwrap().status,
        JobStatus::Error
    );

    let again = app
        .oneshot(post_json("/api/analysis/J1/fail", json!({"error": "again"}), None))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_injected_notification_reaches_event_bus() {
    let state = test_state(None);
    let mut rx = state.event_bus.subscribe();
    let app = build_router(state);

    let response = app
        .oneshot(post_json(
            "/api/notifications",
            json!({"id": "n1", "title": "Ready", "message": "done", "type": "analysis"}),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let event = rx.try_recv().expect("notification should be broadcast");
    assert_eq!(event.event_name(), "notification");
}

#[tokio::test]
async fn test_live_endpoint_rejects_bad_token_before_upgrade() {
    let app = build_router(test_state(Some("secret")));
    let response = app
        .oneshot(get("/live/analysis?userId=u-1", Some("wrong")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_live_endpoint_requires_user_id() {
    let app = build_router(test_state(Some("secret")));
    let response = app
        .oneshot(get("/live/analysis", Some("secret")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_job_with_model_override() {
    let state = test_state(None);
    let app = build_router(state.clone());

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/analysis",
            json!({"contentId": "C1", "jobId": "J1", "models": ["tone", "citations"]}),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .oneshot(get("/api/analysis/J1/progress", None))
        .await
        .unwrap();
    let body = body_json(response).await;
    let models: Vec<&str> = body["modelProgress"]
        .as_array()
        .unwrap()
        .iter()
        .map(|model| model["modelId"].as_str().unwrap())
        .collect();
    assert_eq!(models, vec!["tone", "citations"]);
}
