//! Error types shared by the sequencer core and the HTTP/WS layer.

use axum::{http::StatusCode, response::IntoResponse, Json};

use crate::protocol::ErrorOut;

/// Failures talking to the session store (in-memory or remote).
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
  #[error("Session not found: {0}")]
  NotFound(String),

  #[error("Network error: {0}")]
  Network(String),

  #[error("Session store HTTP {status}: {message}")]
  Http { status: u16, message: String },

  #[error("Invalid payload: {0}")]
  Decode(String),

  #[error("Session store unavailable")]
  Unavailable,
}

#[derive(Debug, thiserror::Error)]
pub enum SequencerError {
  #[error("Topic not found: {0}")]
  TopicNotFound(String),

  #[error("Content load failed: {0}")]
  Content(String),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("Unknown run: {0}")]
  UnknownRun(String),

  #[error("Bad request: {0}")]
  BadRequest(String),
}

impl SequencerError {
  pub fn status(&self) -> StatusCode {
    match self {
      SequencerError::TopicNotFound(_) | SequencerError::UnknownRun(_) => StatusCode::NOT_FOUND,
      SequencerError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
      SequencerError::BadRequest(_) => StatusCode::BAD_REQUEST,
      SequencerError::Content(_) | SequencerError::Store(_) => StatusCode::BAD_GATEWAY,
    }
  }

  pub fn code(&self) -> &'static str {
    match self {
      SequencerError::TopicNotFound(_) => "topic_not_found",
      SequencerError::Content(_) => "content_load_failed",
      SequencerError::Store(_) => "session_store_failed",
      SequencerError::UnknownRun(_) => "unknown_run",
      SequencerError::BadRequest(_) => "bad_request",
    }
  }
}

impl IntoResponse for SequencerError {
  fn into_response(self) -> axum::response::Response {
    let body = ErrorOut { error: self.code().to_string(), message: self.to_string() };
    (self.status(), Json(body)).into_response()
  }
}
