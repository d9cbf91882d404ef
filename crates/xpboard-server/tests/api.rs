//! End-to-end tests against the assembled router

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use xpboard_core::InMemoryRepository;
use xpboard_server::{AppState, ServerConfig, build_router};
use xpboard_session::TokenStatus;
use xpboard_session::token::{encode_unsigned, status_at};

fn app_with(config: ServerConfig) -> Router {
    build_router(AppState {
        repository: Arc::new(InMemoryRepository::mock()),
        config: Arc::new(config),
    })
}

fn app() -> Router {
    app_with(ServerConfig::default())
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn signin(app: &Router, identifier: &str, password: &str) -> axum::response::Response {
    let credentials = STANDARD.encode(format!("{}:{}", identifier, password));
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/signin")
                .header(header::AUTHORIZATION, format!("Basic {}", credentials))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn token_for(app: &Router, identifier: &str, password: &str) -> String {
    let response = signin(app, identifier, password).await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await.as_str().unwrap().to_string()
}

async fn graphql(app: &Router, token: Option<&str>, body: Value) -> axum::response::Response {
    let mut request = Request::builder()
        .method("POST")
        .uri("/graphql")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    app.clone()
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_signin_by_login_and_email() {
    let app = app();
    let by_login = token_for(&app, "student", "student123").await;
    let by_email = token_for(&app, "learner@example.com", "learner123").await;
    assert_eq!(by_login.split('.').count(), 3);
    assert_eq!(by_email.split('.').count(), 3);
}

#[tokio::test]
async fn test_signin_token_is_valid_for_the_monitor() {
    let token = token_for(&app(), "student", "student123").await;
    let now_ms = Utc::now().timestamp_millis();

    assert_eq!(status_at(Some(&token), now_ms), TokenStatus::Valid);
    // Default lifetime is one hour
    assert_eq!(
        status_at(Some(&token), now_ms + 3_601_000),
        TokenStatus::ExpiredOrMalformed
    );
}

#[tokio::test]
async fn test_signin_rejects_bad_credentials() {
    let response = signin(&app(), "student", "wrong").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["extensions"]["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_graphql_requires_token() {
    let response = graphql(&app(), None, json!({"operation": "user"})).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["extensions"]["code"], "UNAUTHENTICATED");
    assert!(body.get("data").is_none());
}

#[tokio::test]
async fn test_graphql_rejects_expired_token() {
    let expired = encode_unsigned(&json!({"sub": "1", "exp": Utc::now().timestamp() - 10}));
    let response = graphql(&app(), Some(&expired), json!({"operation": "user"})).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_graphql_rejects_unknown_user() {
    let stranger = encode_unsigned(&json!({"sub": "99", "exp": Utc::now().timestamp() + 600}));
    let response = graphql(&app(), Some(&stranger), json!({"operation": "user"})).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_user_profile_for_signed_in_user() {
    let app = app();
    let token = token_for(&app, "learner", "learner123").await;

    let response = graphql(&app, Some(&token), json!({"operation": "user"})).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["data"]["user"]["login"], "learner");
    assert_eq!(body["data"]["user"]["id"], 2);
}

#[tokio::test]
async fn test_records_are_scoped_to_caller() {
    let app = app();
    let token = token_for(&app, "learner", "learner123").await;

    let response = graphql(
        &app,
        Some(&token),
        json!({
            "operation": "transaction",
            "variables": {"where": {"userId": {"_eq": 1}}}
        }),
    )
    .await;
    let body = body_json(response).await;
    let records = body["data"]["transaction"].as_array().unwrap();

    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r["userId"] == 2));
}

#[tokio::test]
async fn test_piscine_go_aggregate() {
    let app = app();
    let token = token_for(&app, "student", "student123").await;

    let response = graphql(
        &app,
        Some(&token),
        json!({
            "operation": "transaction_aggregate",
            "variables": {"where": {"type": {"_eq": "xp"}, "path": {"_like": "%piscine-go%"}}}
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let aggregate = &body["data"]["transaction_aggregate"]["aggregate"];
    assert_eq!(aggregate["sum"]["amount"], 17500.0);
    assert_eq!(aggregate["count"], 2);
}

#[tokio::test]
async fn test_xp_chart_feed_is_newest_first() {
    let app = app();
    let token = token_for(&app, "student", "student123").await;

    let response = graphql(
        &app,
        Some(&token),
        json!({"operation": "xp_by_project", "variables": {"limit": 3}}),
    )
    .await;
    let body = body_json(response).await;
    let names: Vec<&str> = body["data"]["xp_by_project"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["object"]["name"].as_str().unwrap())
        .collect();

    assert_eq!(names, vec!["graphql", "piscine-js", "ascii-art"]);
}

#[tokio::test]
async fn test_pass_fail_ratio() {
    let app = app();
    let token = token_for(&app, "learner", "learner123").await;

    let response = graphql(&app, Some(&token), json!({"operation": "pass_fail"})).await;
    let body = body_json(response).await;
    assert_eq!(body["data"]["pass_fail"], json!({"pass": 1, "fail": 1}));
}

#[tokio::test]
async fn test_unknown_operation_is_bad_request() {
    let app = app();
    let token = token_for(&app, "student", "student123").await;

    let response = graphql(&app, Some(&token), json!({"operation": "mutate_xp"})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["extensions"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_healthz() {
    let response = app()
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn test_client_routes_fall_back_to_index() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("index.html"), "<div id=\"root\"></div>").unwrap();
    std::fs::write(temp_dir.path().join("app.js"), "console.log('xp')").unwrap();

    let app = app_with(ServerConfig {
        static_dir: temp_dir.path().to_string_lossy().to_string(),
        ..ServerConfig::default()
    });

    for (uri, expected) in [
        ("/profile", "<div id=\"root\"></div>"),
        ("/login", "<div id=\"root\"></div>"),
        ("/app.js", "console.log('xp')"),
    ] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{}", uri);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(bytes, expected.as_bytes(), "{}", uri);
    }
}
