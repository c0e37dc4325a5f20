//! WebSocket upgrade + message loop. Each client message is parsed as JSON and
//! forwarded to core logic. We reply with a single JSON message per request.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tracing::{info, error, instrument, debug};

use crate::error::SequencerError;
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::logic::*;
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "stepwise_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "stepwise_backend", "WebSocket connected");
  while let Some(Ok(msg)) = socket.recv().await {
    match msg {
      Message::Text(txt) => {
        // Parse, dispatch, serialize response.
        let reply_msg = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => {
            debug!(target: "stepwise_backend", "WS received: {:?}", &incoming);
            handle_client_ws(incoming, &state).await.unwrap_or_else(|e| ServerWsMessage::Error {
              code: e.code().to_string(),
              message: e.to_string(),
            })
          }
          Err(e) => ServerWsMessage::Error { code: "bad_request".into(), message: format!("Invalid JSON: {}", e) },
        };

        let out = serde_json::to_string(&reply_msg).unwrap_or_else(|e| {
          serde_json::json!({ "type": "error", "code": "internal", "message": format!("Serialization error: {}", e) }).to_string()
        });

        if let Err(e) = socket.send(Message::Text(out)).await {
          error!(target: "stepwise_backend", error = %e, "WS send error");
          break;
        }
      }
      Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }
  info!(target: "stepwise_backend", "WebSocket disconnected");
}

#[instrument(level = "info", skip(state))]
async fn handle_client_ws(msg: ClientWsMessage, state: &AppState) -> Result<ServerWsMessage, SequencerError> {
  Ok(match msg {
    ClientWsMessage::Ping => ServerWsMessage::Pong,

    ClientWsMessage::OpenTopic { user_id, slug } => {
      let run = open_topic(state, &user_id, &slug).await?;
      info!(target: "sequencer", session_id = %run.session_id, step = run.current_step, "WS run opened");
      ServerWsMessage::Run { run }
    }

    ClientWsMessage::Next { session_id } => ServerWsMessage::Run { run: advance(state, &session_id).await? },

    ClientWsMessage::Prev { session_id } => ServerWsMessage::Run { run: retreat(state, &session_id).await? },

    ClientWsMessage::SetNavigation { session_id, show } => {
      ServerWsMessage::Run { run: set_navigation(state, &session_id, show).await? }
    }

    ClientWsMessage::SubmitResponse { session_id, block_index, response } => {
      let (saved, run) = submit_response(state, &session_id, block_index, response).await?;
      ServerWsMessage::ResponseSaved { saved, run }
    }

    ClientWsMessage::Feedback { session_id, feedback } => {
      ServerWsMessage::FeedbackSaved { saved: save_feedback(state, &session_id, feedback).await? }
    }

    ClientWsMessage::Reflect(req) => ServerWsMessage::Reflection(reflect(state, req).await?),
  })
}
