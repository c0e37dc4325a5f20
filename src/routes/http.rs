//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs parameters and basic result info.

use std::sync::Arc;
use axum::{extract::{Path, State}, http::StatusCode, Json, response::IntoResponse};
use tracing::{info, instrument};

use crate::error::SequencerError;
use crate::protocol::*;
use crate::state::AppState;
use crate::logic::*;

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state))]
pub async fn http_get_topic(
  State(state): State<Arc<AppState>>,
  Path(slug): Path<String>,
) -> Result<Json<TopicOut>, SequencerError> {
  let topic = describe_topic(&state, &slug).await?;
  info!(target: "sequencer", %slug, total_steps = topic.total_steps, "HTTP topic served");
  Ok(Json(topic))
}

#[instrument(level = "info", skip(state, body), fields(user_id = %body.user_id, slug = %body.slug))]
pub async fn http_open_topic(
  State(state): State<Arc<AppState>>,
  Json(body): Json<OpenTopicIn>,
) -> Result<Json<RunView>, SequencerError> {
  let run = open_topic(&state, &body.user_id, &body.slug).await?;
  info!(target: "sequencer", session_id = %run.session_id, step = run.current_step, "HTTP run opened");
  Ok(Json(run))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_run(
  State(state): State<Arc<AppState>>,
  Path(session_id): Path<String>,
) -> Result<Json<RunView>, SequencerError> {
  Ok(Json(current_run(&state, &session_id).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_next(
  State(state): State<Arc<AppState>>,
  Path(session_id): Path<String>,
) -> Result<Json<RunView>, SequencerError> {
  Ok(Json(advance(&state, &session_id).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_prev(
  State(state): State<Arc<AppState>>,
  Path(session_id): Path<String>,
) -> Result<Json<RunView>, SequencerError> {
  Ok(Json(retreat(&state, &session_id).await?))
}

#[instrument(level = "info", skip(state, body), fields(show = ?body.show))]
pub async fn http_set_navigation(
  State(state): State<Arc<AppState>>,
  Path(session_id): Path<String>,
  Json(body): Json<NavigationIn>,
) -> Result<Json<RunView>, SequencerError> {
  Ok(Json(set_navigation(&state, &session_id, body.show).await?))
}

#[instrument(level = "info", skip(state, body), fields(block_index = body.block_index))]
pub async fn http_post_response(
  State(state): State<Arc<AppState>>,
  Path(session_id): Path<String>,
  Json(body): Json<ResponseIn>,
) -> Result<Json<ResponseOut>, SequencerError> {
  let (saved, run) = submit_response(&state, &session_id, body.block_index, body.response).await?;
  info!(target: "sequencer", %session_id, block_index = body.block_index, %saved, "HTTP response recorded");
  Ok(Json(ResponseOut { saved, run }))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_post_feedback(
  State(state): State<Arc<AppState>>,
  Path(session_id): Path<String>,
  Json(body): Json<FeedbackIn>,
) -> Result<Json<FeedbackOut>, SequencerError> {
  let saved = save_feedback(&state, &session_id, body.feedback).await?;
  Ok(Json(FeedbackOut { saved }))
}

#[instrument(level = "info", skip(state, body), fields(session_id = %body.session_id, kind = ?body.kind))]
pub async fn http_post_reflect(
  State(state): State<Arc<AppState>>,
  Json(body): Json<ReflectIn>,
) -> Result<Json<ReflectOut>, SequencerError> {
  Ok(Json(reflect(&state, body).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_delete_session(
  State(state): State<Arc<AppState>>,
  Path(session_id): Path<String>,
) -> Result<StatusCode, SequencerError> {
  delete_session(&state, &session_id).await?;
  Ok(StatusCode::NO_CONTENT)
}
