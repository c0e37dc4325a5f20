//! Block response recorder: one stored response per block, latest submission wins.

use chrono::Utc;
use serde_json::Value;
use tracing::{instrument, warn};

use crate::domain::{BlockKind, BlockResponse, ContentBlock, LearningSession, SessionPatch};
use crate::store::SessionStore;

#[derive(Clone, Debug)]
pub struct ResponseInput {
  pub block_index: usize,
  pub block_type: BlockKind,
  pub block_key: String,
  pub block_content: Value,
  pub topic_version_id: String,
  pub response: Value,
}

impl ResponseInput {
  pub fn for_block(block_index: usize, block: &ContentBlock, topic_version_id: &str, response: Value) -> Self {
    Self {
      block_index,
      block_type: block.kind,
      block_key: block.key(block_index),
      block_content: block.to_value(),
      topic_version_id: topic_version_id.to_string(),
      response,
    }
  }
}

/// Merge `input` into the session's responses and persist the full list.
///
/// `current` skips the read when the caller already holds a fresh copy. Any store
/// failure is logged and yields `None`; nothing is retried.
#[instrument(level = "info", skip(store, current, input), fields(%session_id, block_index = input.block_index, block_type = %input.block_type))]
pub async fn record(
  store: &dyn SessionStore,
  session_id: &str,
  current: Option<LearningSession>,
  input: ResponseInput,
) -> Option<LearningSession> {
  let session = match current {
    Some(s) => s,
    None => match store.get_session_by_id(session_id).await {
      Ok(Some(s)) => s,
      Ok(None) => {
        warn!(target: "sequencer", %session_id, "Cannot record response: session not found");
        return None;
      }
      Err(e) => {
        warn!(target: "sequencer", %session_id, error = %e, "Cannot record response: session fetch failed");
        return None;
      }
    },
  };

  let responses = merge(&session.responses, input);
  match store.patch_session(session_id, SessionPatch::Responses(responses)).await {
    Ok(updated) => Some(updated),
    Err(e) => {
      warn!(target: "sequencer", %session_id, error = %e, "Response not saved");
      None
    }
  }
}

fn merge(existing: &[BlockResponse], input: ResponseInput) -> Vec<BlockResponse> {
  let mut out: Vec<BlockResponse> = existing
    .iter()
    .filter(|r| !r.targets_same_block(input.block_type, &input.block_key, &input.block_content))
    .cloned()
    .collect();
  out.push(BlockResponse {
    block_index: input.block_index,
    block_type: input.block_type,
    block_key: Some(input.block_key),
    response: input.response,
    timestamp: Utc::now(),
    topic_version_id: input.topic_version_id,
    block_content: input.block_content,
  });
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::InMemorySessionStore;
  use serde_json::json;

  fn situation_block() -> ContentBlock {
    ContentBlock::new(BlockKind::FeelingsDetective).with_field("prompt", "Describe the situation")
  }

  #[tokio::test]
  async fn resubmission_replaces_prior_response() {
    let store = InMemorySessionStore::new();
    let s = store.create_session("u1", "t1", "v1").await.unwrap();
    let block = situation_block();

    let first = ResponseInput::for_block(2, &block, "v1", json!({ "situation": "first draft" }));
    record(&store, &s.id, None, first).await.unwrap();
    let second = ResponseInput::for_block(2, &block, "v1", json!({ "situation": "edited" }));
    let updated = record(&store, &s.id, None, second).await.unwrap();

    assert_eq!(updated.responses.len(), 1);
    assert_eq!(updated.responses[0].response, json!({ "situation": "edited" }));
    assert_eq!(updated.responses[0].block_key.as_deref(), Some("block-2"));
  }

  #[tokio::test]
  async fn different_blocks_keep_separate_entries() {
    let store = InMemorySessionStore::new();
    let s = store.create_session("u1", "t1", "v1").await.unwrap();
    let a = ContentBlock::new(BlockKind::Text).with_field("body", "a");
    let b = ContentBlock::new(BlockKind::AiQuestion).with_field("question", "b");

    record(&store, &s.id, None, ResponseInput::for_block(0, &a, "v1", json!("x"))).await.unwrap();
    let updated = record(&store, &s.id, None, ResponseInput::for_block(1, &b, "v1", json!("y"))).await.unwrap();
    assert_eq!(updated.responses.len(), 2);
  }

  #[tokio::test]
  async fn legacy_entry_without_key_is_matched_by_content() {
    let store = InMemorySessionStore::new();
    let s = store.create_session("u1", "t1", "v1").await.unwrap();
    let block = situation_block();
    let legacy = BlockResponse {
      block_index: 2,
      block_type: BlockKind::FeelingsDetective,
      block_key: None,
      response: json!("old"),
      timestamp: Utc::now(),
      topic_version_id: "v1".into(),
      block_content: block.to_value(),
    };
    store.patch_session(&s.id, SessionPatch::Responses(vec![legacy])).await.unwrap();

    let updated = record(&store, &s.id, None, ResponseInput::for_block(2, &block, "v1", json!("new"))).await.unwrap();
    assert_eq!(updated.responses.len(), 1);
    assert_eq!(updated.responses[0].response, json!("new"));
  }

  #[tokio::test]
  async fn store_failure_returns_none_and_keeps_caller_state() {
    let store = InMemorySessionStore::new();
    let s = store.create_session("u1", "t1", "v1").await.unwrap();
    store.fail_next_patches(1);
    let input = ResponseInput::for_block(1, &situation_block(), "v1", json!("lost"));
    assert!(record(&store, &s.id, Some(s.clone()), input).await.is_none());
    assert!(store.get_session_by_id(&s.id).await.unwrap().unwrap().responses.is_empty());
  }

  #[tokio::test]
  async fn unknown_session_returns_none() {
    let store = InMemorySessionStore::new();
    let input = ResponseInput::for_block(0, &situation_block(), "v1", json!(1));
    assert!(record(&store, "missing", None, input).await.is_none());
  }
}
