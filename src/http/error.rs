//! HTTP error mapping.
//!
//! The one place where typed component errors become status codes. Every
//! error body has the same shape: `{error: <short-code>, message: <human>}`.
//! Both credential failure modes share a single variant, so unknown-username
//! and wrong-password responses are byte-identical.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthError;
use crate::pipeline::PipelineError;

/// Seconds clients should wait before retrying a shed request.
const RETRY_AFTER_SECONDS: &str = "1";

/// Everything a handler can fail with.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request. 400.
    #[error("{0}")]
    Validation(String),

    /// Bad credentials. 401, uniform message.
    #[error("invalid username or password")]
    InvalidCredentials,

    /// Missing/invalid/expired bearer token. 401.
    #[error("missing, invalid, or expired token")]
    InvalidToken,

    /// Request deadline exceeded. 504.
    #[error("request deadline exceeded")]
    Timeout,

    /// Concurrency cap hit; retry later. 503.
    #[error("server is at capacity, retry shortly")]
    Overloaded,

    /// The embedder is down; nothing can be scored. 503.
    #[error("embedding backend unavailable")]
    EmbedderUnavailable,

    /// Every shard search failed. 502.
    #[error("retrieval backend unavailable: {0}")]
    Upstream(String),

    /// Anything unexpected. 500, details stay in the logs.
    #[error("internal server error")]
    Internal(String),
}

impl ApiError {
    /// Machine-readable short code for the response body.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::InvalidCredentials => "invalid_credentials",
            Self::InvalidToken => "invalid_token",
            Self::Timeout => "deadline_exceeded",
            Self::Overloaded => "overloaded",
            Self::EmbedderUnavailable => "embedder_unavailable",
            Self::Upstream(_) => "upstream_unavailable",
            Self::Internal(_) => "internal_error",
        }
    }

    /// HTTP status for this error kind.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials | Self::InvalidToken => StatusCode::UNAUTHORIZED,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Overloaded | Self::EmbedderUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            tracing::error!(%detail, "internal error");
        }

        let status = self.status();
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
        };
        let mut response = (status, Json(body)).into_response();
        if matches!(self, Self::Overloaded) {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from_static(RETRY_AFTER_SECONDS),
            );
        }
        response
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => Self::InvalidCredentials,
            AuthError::InvalidToken => Self::InvalidToken,
            AuthError::Storage { message }
            | AuthError::PasswordHash { message }
            | AuthError::TokenEncode { message } => Self::Internal(message),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Validation { message } => Self::Validation(message),
            PipelineError::Embed(_) => Self::EmbedderUnavailable,
            PipelineError::DeadlineExceeded => Self::Timeout,
            PipelineError::ShardsUnavailable => Self::Upstream("all shards failed".to_string()),
        }
    }
}
