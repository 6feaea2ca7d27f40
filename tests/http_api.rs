//! HTTP surface tests driven through the router with `tower::ServiceExt`.

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use corpusgate::http::router;

async fn app() -> Router {
    router(common::app_state().await)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn json_request(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn authed_query(token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/query")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn login(app: &Router, username: &str, password: &str) -> Value {
    let (status, body) = send(
        app,
        json_request("/auth/login", json!({"username": username, "password": password})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    body
}

#[tokio::test]
async fn login_returns_a_bearer_token_pair() {
    let app = app().await;
    let body = login(&app, "alice", "alice-password").await;

    assert_eq!(body["token_type"], "bearer");
    assert!(body["access_token"].as_str().unwrap().len() > 20);
    assert!(body["refresh_token"].as_str().unwrap().len() > 20);
    assert_eq!(body["user"]["username"], "alice");
    assert_eq!(body["user"]["role"], "finance_analyst");
    assert!(body["expires_in"].as_u64().unwrap() >= 60);
}

#[tokio::test]
async fn login_accepts_form_encoding() {
    let app = app().await;
    let request = Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("username=alice&password=alice-password"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["username"], "alice");
}

#[tokio::test]
async fn unknown_user_and_wrong_password_responses_are_identical() {
    let app = app().await;
    let (unknown_status, unknown_body) = send(
        &app,
        json_request("/auth/login", json!({"username": "nobody", "password": "x"})),
    )
    .await;
    let (wrong_status, wrong_body) = send(
        &app,
        json_request("/auth/login", json!({"username": "alice", "password": "wrong"})),
    )
    .await;

    assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_status, wrong_status);
    assert_eq!(unknown_body, wrong_body);
    assert_eq!(unknown_body["error"], "invalid_credentials");
}

#[tokio::test]
async fn inactive_account_gets_the_same_uniform_error() {
    let app = app().await;
    let (status, body) = send(
        &app,
        json_request(
            "/auth/login",
            json!({"username": "mallory", "password": "mallory-password"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_credentials");
}

#[tokio::test]
async fn garbage_bearer_token_is_rejected_with_invalid_token() {
    let app = app().await;
    let (status, body) = send(&app, authed_query("garbage", json!({"query": "revenue"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn missing_token_is_rejected() {
    let app = app().await;
    let (status, body) = send(&app, json_request("/query", json!({"query": "revenue"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn refresh_tokens_cannot_be_used_as_access_tokens() {
    let app = app().await;
    let body = login(&app, "alice", "alice-password").await;
    let refresh_token = body["refresh_token"].as_str().unwrap();

    let (status, body) = send(&app, authed_query(refresh_token, json!({"query": "revenue"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn refresh_flow_yields_a_working_access_token() {
    let app = app().await;
    let body = login(&app, "alice", "alice-password").await;
    let refresh_token = body["refresh_token"].as_str().unwrap().to_string();

    let (status, refreshed) = send(
        &app,
        json_request("/auth/refresh", json!({"refresh_token": refresh_token})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(refreshed["token_type"], "bearer");

    let access = refreshed["access_token"].as_str().unwrap();
    let (status, result) = send(&app, authed_query(access, json!({"query": "Q4 revenue growth"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(result["results"].as_array().is_some());
}

#[tokio::test]
async fn refresh_accepts_the_token_via_bearer_header() {
    let app = app().await;
    let body = login(&app, "alice", "alice-password").await;
    let refresh_token = body["refresh_token"].as_str().unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/auth/refresh")
        .header(header::AUTHORIZATION, format!("Bearer {refresh_token}"))
        .body(Body::empty())
        .unwrap();
    let (status, refreshed) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(refreshed["access_token"].as_str().is_some());
}

#[tokio::test]
async fn query_returns_scoped_results_with_citations() {
    let app = app().await;
    let body = login(&app, "alice", "alice-password").await;
    let access = body["access_token"].as_str().unwrap();

    let (status, result) = send(
        &app,
        authed_query(access, json!({"query": "Q4 revenue growth", "top_k": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["query"], "Q4 revenue growth");
    assert!(result["normalized_query"].as_str().unwrap().contains("quarter 4"));
    assert_eq!(result["accessible_departments"], json!(["finance"]));

    let results = result["results"].as_array().unwrap();
    assert!(!results.is_empty());
    for hit in results {
        assert_eq!(hit["metadata"]["department"], "finance");
        assert!(hit["metadata"]["source_document"].as_str().is_some());
        assert!(hit["similarity"].as_f64().is_some());
    }
    assert!(result["confidence"].as_str().is_some());
}

#[tokio::test]
async fn query_validation_failures_are_400() {
    let app = app().await;
    let body = login(&app, "alice", "alice-password").await;
    let access = body["access_token"].as_str().unwrap();

    let (status, body) = send(&app, authed_query(access, json!({"query": "   "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, _) = send(
        &app,
        authed_query(access, json!({"query": "revenue", "top_k": 99})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn profile_reports_effective_permissions() {
    let app = app().await;
    let body = login(&app, "alice", "alice-password").await;
    let access = body["access_token"].as_str().unwrap();

    let request = Request::builder()
        .method("GET")
        .uri("/user/profile")
        .header(header::AUTHORIZATION, format!("Bearer {access}"))
        .body(Body::empty())
        .unwrap();
    let (status, profile) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["username"], "alice");
    assert_eq!(profile["role"], "finance_analyst");
    assert!(
        profile["permissions"]
            .as_array()
            .unwrap()
            .contains(&json!("read:finance"))
    );
}

#[tokio::test]
async fn healthz_reports_index_shape_without_auth() {
    let app = app().await;
    let request = Request::builder()
        .method("GET")
        .uri("/healthz")
        .body(Body::empty())
        .unwrap();
    let (status, health) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");
    assert!(health["index"]["total_chunks"].as_u64().unwrap() > 0);
    assert!(health["index"]["per_department"]["finance"].as_u64().unwrap() > 0);
}
