//! Stepwise · Learning Session Sequencer Backend
//!
//! - Axum HTTP + WebSocket API driving learners through topic step plans
//! - Session persistence via a remote REST store or in-memory
//! - Optional OpenAI integration for exercise reflections (via environment variables)
//!
//! Important env variables:
//!   PORT                  : u16 (default 3000)
//!   SEQUENCER_CONFIG_PATH : path to TOML config (prompts, topic bank, sync and run tuning)
//!   SESSION_STORE_URL     : base URL of the REST session store (in-memory if unset)
//!   CONTENT_SOURCE_URL    : base URL of the content backend (seeds + TOML if unset)
//!   STORE_TIMEOUT_SECS    : timeout for store/content requests (default 10)
//!   OPENAI_API_KEY        : enables OpenAI reflections if present
//!   OPENAI_BASE_URL       : default "https://api.openai.com/v1"
//!   OPENAI_MODEL          : default "gpt-4o-mini"
//!   LOG_LEVEL             : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT            : "pretty" (default) or "json"

mod telemetry;
mod util;
mod error;
mod domain;
mod plan;
mod resume;
mod navigation;
mod recorder;
mod store;
mod remote;
mod sync;
mod config;
mod seeds;
mod state;
mod protocol;
mod logic;
mod openai;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Build shared application state (stores, content, OpenAI client, prompts).
  let state = Arc::new(AppState::new());
  let sweeper = state.spawn_idle_sweeper();

  // Build the HTTP router with routes, CORS and tracing layers.
  let app = build_router(state.clone());

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "stepwise_backend", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  sweeper.abort();
  state.flush_all().await;
  info!(target: "stepwise_backend", "Pending session writes flushed");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "stepwise_backend", error = %e, "Failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
  info!(target: "stepwise_backend", "Shutdown signal received");
}
