//! Router assembly: HTTP endpoints, WebSocket upgrade, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;
pub mod ws;

/// Build the application router with:
/// - WebSocket at `/ws`
/// - REST-ish API under `/api/v1/...`
/// - CORS (allow any origin/method/headers), the app is served from another origin
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // WebSocket
        .route("/ws", get(ws::ws_upgrade))
        // HTTP API
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/topics/:slug", get(http::http_get_topic))
        .route("/api/v1/runs", post(http::http_open_topic))
        .route("/api/v1/runs/:session_id", get(http::http_get_run))
        .route("/api/v1/runs/:session_id/next", post(http::http_next))
        .route("/api/v1/runs/:session_id/prev", post(http::http_prev))
        .route("/api/v1/runs/:session_id/navigation", post(http::http_set_navigation))
        .route("/api/v1/runs/:session_id/responses", post(http::http_post_response))
        .route("/api/v1/runs/:session_id/feedback", post(http::http_post_feedback))
        .route("/api/v1/reflect", post(http::http_post_reflect))
        .route("/api/v1/sessions/:session_id", delete(http::http_delete_session))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}
