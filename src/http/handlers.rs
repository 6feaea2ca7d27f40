//! Route handlers.
//!
//! Handlers parse, authenticate, and delegate; policy lives in the RBAC
//! engine and the pipeline. Deadlines are enforced here with
//! `tokio::time::timeout` around the delegated call.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Form, FromRequest, Request, State};
use axum::http::{HeaderMap, header};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::pipeline::QueryResponse;
use crate::store::StoreStats;

use super::AppState;
use super::error::ApiError;
use super::extract::{Identity, bearer_token};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginUser {
    pub username: String,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub user: LoginUser,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub username: String,
    pub role: String,
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub index: StoreStats,
}

/// `POST /auth/login`: JSON or form-encoded credentials.
pub async fn login(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<LoginResponse>, ApiError> {
    let credentials = parse_login_body(request).await?;
    let deadline = Duration::from_millis(state.config.request_deadline_login_ms);

    let outcome = timeout(
        deadline,
        state.auth.login(&credentials.username, &credentials.password),
    )
    .await
    .map_err(|_| ApiError::Timeout)??;

    let role = outcome.roles.first().cloned().unwrap_or_default();
    Ok(Json(LoginResponse {
        access_token: outcome.access_token,
        refresh_token: outcome.refresh_token,
        token_type: "bearer",
        expires_in: outcome.expires_in,
        user: LoginUser {
            username: outcome.username,
            role,
        },
    }))
}

/// `POST /auth/refresh`: refresh token in the body or the bearer header.
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RefreshResponse>, ApiError> {
    let from_body = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<RefreshRequest>(&body)
            .map_err(|_| ApiError::Validation("malformed refresh request body".to_string()))?
            .refresh_token
    };
    let token = from_body
        .or_else(|| bearer_token(&headers).map(str::to_string))
        .ok_or(ApiError::InvalidToken)?;

    let deadline = Duration::from_millis(state.config.request_deadline_login_ms);
    let outcome = timeout(deadline, state.auth.refresh(&token))
        .await
        .map_err(|_| ApiError::Timeout)??;

    Ok(Json(RefreshResponse {
        access_token: outcome.access_token,
        token_type: "bearer",
        expires_in: outcome.expires_in,
    }))
}

/// `GET /user/profile`: the caller's resolved authority.
pub async fn profile(
    State(state): State<AppState>,
    Identity(identity): Identity,
) -> Result<Json<ProfileResponse>, ApiError> {
    let engine = state.retrieval.rbac_engine(&identity);
    let summary = engine.summary();
    Ok(Json(ProfileResponse {
        role: identity.roles.first().cloned().unwrap_or_default(),
        username: identity.username,
        permissions: summary.permissions,
    }))
}

/// `POST /query`: access-controlled retrieval.
pub async fn query(
    State(state): State<AppState>,
    Identity(identity): Identity,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let budget = Duration::from_millis(state.config.request_deadline_query_ms);
    let deadline = Instant::now() + budget;

    let response = timeout(
        budget,
        state
            .retrieval
            .query(&identity, &request.query, request.top_k, deadline),
    )
    .await
    .map_err(|_| ApiError::Timeout)??;

    Ok(Json(response))
}

/// `GET /healthz`: liveness plus index shape. Unauthenticated.
pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        index: state.retrieval.store().stats(),
    })
}

/// Login accepts both `application/json` and form encoding; everything else
/// is treated as JSON and rejected with a validation error if it isn't.
async fn parse_login_body(request: Request) -> Result<LoginRequest, ApiError> {
    let is_form = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

    if is_form {
        let Form(credentials) = Form::<LoginRequest>::from_request(request, &())
            .await
            .map_err(|_| ApiError::Validation("malformed form credentials".to_string()))?;
        Ok(credentials)
    } else {
        let Json(credentials) = Json::<LoginRequest>::from_request(request, &())
            .await
            .map_err(|_| ApiError::Validation("malformed json credentials".to_string()))?;
        Ok(credentials)
    }
}
