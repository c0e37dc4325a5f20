//! REST clients for the external session store and content backend.
//!
//! Calls are instrumented and log status codes and latencies (never bodies).
//! No retries here: the sync layer owns retrying for cursor writes, and
//! fetch/create failures surface to the caller as-is.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::domain::{LearningSession, SessionPatch, Topic};
use crate::error::{SequencerError, StoreError};
use crate::store::{ContentSource, SessionStore};
use crate::util::trunc_for_log;

const UA: &str = "stepwise-backend/0.1";

#[derive(Clone)]
pub struct RemoteSessionStore {
  client: reqwest::Client,
  pub base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionBody<'a> {
  user_id: &'a str,
  topic_id: &'a str,
  topic_version_id: &'a str,
}

impl RemoteSessionStore {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StoreError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| StoreError::Network(e.to_string()))?;
    Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.base_url, path)
  }
}

/// Map non-2xx responses to `StoreError::Http` with a short body excerpt.
async fn check(res: Response) -> Result<Response, StoreError> {
  if res.status().is_success() {
    return Ok(res);
  }
  let status = res.status().as_u16();
  let body = res.text().await.unwrap_or_default();
  Err(StoreError::Http { status, message: trunc_for_log(&body, 200) })
}

async fn decode<T: DeserializeOwned>(res: Response) -> Result<T, StoreError> {
  res.json::<T>().await.map_err(|e| StoreError::Decode(e.to_string()))
}

fn net(e: reqwest::Error) -> StoreError {
  StoreError::Network(e.to_string())
}

#[async_trait]
impl SessionStore for RemoteSessionStore {
  #[instrument(level = "info", skip(self))]
  async fn get_latest_session(&self, user_id: &str, topic_id: &str) -> Result<Option<LearningSession>, StoreError> {
    let start = Instant::now();
    let res = self.client
      .get(self.url("/sessions/latest"))
      .header(USER_AGENT, UA)
      .query(&[("userId", user_id), ("topicId", topic_id)])
      .send().await.map_err(net)?;
    debug!(target: "sequencer", status = %res.status(), elapsed = ?start.elapsed(), "get_latest_session");
    if res.status() == StatusCode::NOT_FOUND || res.status() == StatusCode::NO_CONTENT {
      return Ok(None);
    }
    decode::<Option<LearningSession>>(check(res).await?).await
  }

  #[instrument(level = "info", skip(self))]
  async fn create_session(&self, user_id: &str, topic_id: &str, topic_version_id: &str) -> Result<LearningSession, StoreError> {
    let start = Instant::now();
    let body = CreateSessionBody { user_id, topic_id, topic_version_id };
    let res = self.client
      .post(self.url("/sessions"))
      .header(USER_AGENT, UA)
      .header(CONTENT_TYPE, "application/json")
      .json(&body)
      .send().await.map_err(net)?;
    debug!(target: "sequencer", status = %res.status(), elapsed = ?start.elapsed(), "create_session");
    decode(check(res).await?).await
  }

  #[instrument(level = "info", skip(self, patch), fields(patch = patch.label()))]
  async fn patch_session(&self, session_id: &str, patch: SessionPatch) -> Result<LearningSession, StoreError> {
    let start = Instant::now();
    let res = self.client
      .patch(self.url(&format!("/sessions/{session_id}")))
      .header(USER_AGENT, UA)
      .header(CONTENT_TYPE, "application/json")
      .json(&patch)
      .send().await.map_err(net)?;
    debug!(target: "sequencer", status = %res.status(), elapsed = ?start.elapsed(), "patch_session");
    if res.status() == StatusCode::NOT_FOUND {
      return Err(StoreError::NotFound(session_id.to_string()));
    }
    decode(check(res).await?).await
  }

  #[instrument(level = "info", skip(self))]
  async fn get_session_by_id(&self, session_id: &str) -> Result<Option<LearningSession>, StoreError> {
    let res = self.client
      .get(self.url(&format!("/sessions/{session_id}")))
      .header(USER_AGENT, UA)
      .send().await.map_err(net)?;
    if res.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    decode(check(res).await?).await
  }

  #[instrument(level = "info", skip(self))]
  async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
    let res = self.client
      .delete(self.url(&format!("/sessions/{session_id}")))
      .header(USER_AGENT, UA)
      .send().await.map_err(net)?;
    if res.status() == StatusCode::NOT_FOUND {
      return Err(StoreError::NotFound(session_id.to_string()));
    }
    check(res).await.map(|_| ())
  }
}

/// Topics served by the content backend at `GET {base}/topics/{slug}`.
#[derive(Clone)]
pub struct RemoteContentSource {
  client: reqwest::Client,
  pub base_url: String,
}

impl RemoteContentSource {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SequencerError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| SequencerError::Content(e.to_string()))?;
    Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
  }
}

#[async_trait]
impl ContentSource for RemoteContentSource {
  #[instrument(level = "info", skip(self))]
  async fn get_topic_by_slug(&self, slug: &str) -> Result<Topic, SequencerError> {
    let url = format!("{}/topics/{}", self.base_url, slug);
    let res = self.client
      .get(&url)
      .header(USER_AGENT, UA)
      .send().await
      .map_err(|e| SequencerError::Content(e.to_string()))?;
    if res.status() == StatusCode::NOT_FOUND {
      return Err(SequencerError::TopicNotFound(slug.to_string()));
    }
    if !res.status().is_success() {
      let status = res.status();
      warn!(target: "sequencer", %slug, %status, "Topic fetch failed");
      return Err(SequencerError::Content(format!("HTTP {status}")));
    }
    res.json::<Topic>().await.map_err(|e| SequencerError::Content(e.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  use axum::extract::{Path, Query};
  use axum::http::StatusCode as AxumStatus;
  use axum::response::{IntoResponse, Response as AxumResponse};
  use axum::routing::get;
  use axum::{Json, Router};
  use tokio::net::TcpListener;

  use crate::domain::BlockKind;

  fn session(id: &str) -> LearningSession {
    LearningSession::new(id.to_string(), "u1", "t1", "v1")
  }

  async fn latest(Query(q): Query<HashMap<String, String>>) -> AxumResponse {
    match q.get("userId").map(String::as_str) {
      Some("nobody") => AxumStatus::NOT_FOUND.into_response(),
      Some("empty") => AxumStatus::NO_CONTENT.into_response(),
      Some("broken") => (AxumStatus::BAD_GATEWAY, "x".repeat(500)).into_response(),
      _ => Json(session("s1")).into_response(),
    }
  }

  async fn by_id(Path(id): Path<String>) -> AxumResponse {
    match id.as_str() {
      "missing" => AxumStatus::NOT_FOUND.into_response(),
      _ => Json(session(&id)).into_response(),
    }
  }

  async fn patch(Path(id): Path<String>, Json(body): Json<serde_json::Value>) -> AxumResponse {
    match id.as_str() {
      "missing" => AxumStatus::NOT_FOUND.into_response(),
      "flaky" => (AxumStatus::INTERNAL_SERVER_ERROR, "database is restarting").into_response(),
      _ => {
        let mut s = session(&id);
        if let Some(page) = body.get("currentPage").and_then(|v| v.as_u64()) {
          s.current_page = page as usize;
        }
        Json(s).into_response()
      }
    }
  }

  async fn topic(Path(slug): Path<String>) -> AxumResponse {
    match slug.as_str() {
      "calm" => Json(serde_json::json!({
        "id": "t1",
        "slug": "calm",
        "title": "Calm",
        "currentVersion": { "id": "v1", "content": [{ "type": "aiQuestion", "question": "?" }] }
      }))
      .into_response(),
      "down" => AxumStatus::SERVICE_UNAVAILABLE.into_response(),
      _ => AxumStatus::NOT_FOUND.into_response(),
    }
  }

  async fn backend() -> String {
    let app = Router::new()
      .route("/sessions/latest", get(latest))
      .route("/sessions/:id", get(by_id).patch(patch))
      .route("/topics/:slug", get(topic));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
  }

  #[tokio::test]
  async fn latest_session_maps_missing_to_none() {
    let store = RemoteSessionStore::new(&backend().await, Duration::from_secs(5)).unwrap();
    assert!(store.get_latest_session("nobody", "t1").await.unwrap().is_none());
    assert!(store.get_latest_session("empty", "t1").await.unwrap().is_none());
    assert_eq!(store.get_latest_session("u1", "t1").await.unwrap().unwrap().id, "s1");
  }

  #[tokio::test]
  async fn error_status_carries_truncated_body() {
    let store = RemoteSessionStore::new(&backend().await, Duration::from_secs(5)).unwrap();
    match store.get_latest_session("broken", "t1").await {
      Err(StoreError::Http { status, message }) => {
        assert_eq!(status, 502);
        assert!(message.starts_with(&"x".repeat(200)));
        assert!(message.contains("500 bytes total"));
      }
      other => panic!("expected Http error, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn patch_maps_statuses() {
    let store = RemoteSessionStore::new(&backend().await, Duration::from_secs(5)).unwrap();
    let ok = store.patch_session("s9", SessionPatch::CurrentPage(4)).await.unwrap();
    assert_eq!(ok.current_page, 4);
    assert!(matches!(
      store.patch_session("missing", SessionPatch::CurrentPage(1)).await,
      Err(StoreError::NotFound(id)) if id == "missing"
    ));
    match store.patch_session("flaky", SessionPatch::Completed(true)).await {
      Err(StoreError::Http { status, message }) => {
        assert_eq!(status, 500);
        assert_eq!(message, "database is restarting");
      }
      other => panic!("expected Http error, got {other:?}"),
    }
    assert!(store.get_session_by_id("missing").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn unreachable_store_is_a_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let store = RemoteSessionStore::new(&url, Duration::from_secs(2)).unwrap();
    assert!(matches!(store.get_session_by_id("s1").await, Err(StoreError::Network(_))));
  }

  #[tokio::test]
  async fn topics_fetch_and_map_statuses() {
    let content = RemoteContentSource::new(&backend().await, Duration::from_secs(5)).unwrap();
    let topic = content.get_topic_by_slug("calm").await.unwrap();
    assert_eq!(topic.current_version.content[0].kind, BlockKind::AiQuestion);
    assert!(matches!(content.get_topic_by_slug("nope").await, Err(SequencerError::TopicNotFound(_))));
    assert!(matches!(content.get_topic_by_slug("down").await, Err(SequencerError::Content(_))));
  }
}
