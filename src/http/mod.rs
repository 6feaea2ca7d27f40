//! HTTP surface.
//!
//! The router wires four authenticated-service routes plus a liveness probe,
//! wrapped in three layers (outermost first):
//!
//! 1. load-shed + concurrency limit: requests beyond the configured cap are
//!    rejected with 503 instead of queueing unboundedly;
//! 2. request tracing;
//! 3. a correlation-id span attached at ingress, so every log line of a
//!    request shares one id.
//!
//! No policy logic lives here; handlers delegate to the auth service and the
//! retrieval pipeline.

pub mod error;
pub mod extract;
pub mod handlers;

use axum::Router;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::{get, post};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::AuthService;
use crate::config::ServiceConfig;
use crate::pipeline::RetrievalService;

pub use error::ApiError;

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub auth: Arc<AuthService>,
    pub retrieval: Arc<RetrievalService>,
}

/// Build the service router.
#[must_use]
pub fn router(state: AppState) -> Router {
    // The limit must be global: axum clones the service per connection, and a
    // per-clone semaphore would cap nothing.
    let governor = ServiceBuilder::new()
        .layer(axum::error_handling::HandleErrorLayer::new(
            handle_middleware_error,
        ))
        .load_shed()
        .layer(tower::limit::GlobalConcurrencyLimitLayer::new(
            state.config.max_concurrent_requests,
        ));

    Router::new()
        .route("/auth/login", post(handlers::login))
        .route("/auth/refresh", post(handlers::refresh))
        .route("/user/profile", get(handlers::profile))
        .route("/query", post(handlers::query))
        .route("/healthz", get(handlers::healthz))
        .layer(axum::middleware::from_fn(correlation_span))
        .layer(TraceLayer::new_for_http())
        .layer(governor)
        .with_state(state)
}

/// Middleware-layer failures: a shed request maps to 503, anything else is
/// an internal error.
async fn handle_middleware_error(err: tower::BoxError) -> ApiError {
    if err.is::<tower::load_shed::error::Overloaded>() {
        ApiError::Overloaded
    } else {
        ApiError::Internal(err.to_string())
    }
}

/// Attach a correlation id to the request's tracing span.
async fn correlation_span(request: Request, next: Next) -> Response {
    let correlation_id = Uuid::new_v4();
    let span = tracing::info_span!(
        "request",
        %correlation_id,
        method = %request.method(),
        path = %request.uri().path(),
    );
    next.run(request).instrument(span).await
}
