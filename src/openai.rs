//! Minimal OpenAI client for the reflection/summary helpers used by exercise blocks.
//!
//! We only call chat.completions and request plain text.
//! Calls are instrumented and log model names, latencies, and token usage (not contents).
//!
//! NOTE: We never log the API key or learner text.

use std::time::{Duration, Instant};

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::config::Prompts;
use crate::protocol::ReflectKind;
use crate::util::fill_template;

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub model: String,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok()?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(20))
      .build()
      .ok()?;

    Some(Self { client, api_key, base_url, model })
  }

  /// Plain-text chat completion.
  #[instrument(level = "info", skip(self, system, user), fields(model = %self.model))]
  async fn chat_plain(&self, system: &str, user: &str, temperature: f32) -> Result<String, String> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
    };

    let res = self.client.post(&url)
      .header(USER_AGENT, "stepwise-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await.map_err(|e| e.to_string())?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or(body);
      return Err(format!("OpenAI HTTP {}: {}", status, msg));
    }

    let body: ChatCompletionResponse = res.json().await.map_err(|e| e.to_string())?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body.choices.first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default().trim().to_string();

    if text.is_empty() {
      return Err("OpenAI returned empty content".into());
    }
    Ok(text)
  }

  /// Reflection or summary text for an exercise block.
  #[instrument(level = "info", skip(self, prompts, question, answer, title), fields(kind = ?kind, answer_len = answer.len()))]
  pub async fn reflect(
    &self,
    prompts: &Prompts,
    kind: ReflectKind,
    title: &str,
    question: &str,
    answer: &str,
  ) -> Result<String, String> {
    let tpl = match kind {
      ReflectKind::AiQuestion => &prompts.ai_question_template,
      ReflectKind::Feelings => &prompts.feelings_reflection_template,
      ReflectKind::Summary => &prompts.summary_template,
    };
    let user = fill_template(tpl, &[("question", question), ("answer", answer), ("title", title)]);
    let start = Instant::now();
    let result = self.chat_plain(&prompts.coach_system, &user, 0.7).await;
    match &result {
      Ok(t) => info!(elapsed = ?start.elapsed(), reply_len = t.len(), "Reflection generated"),
      Err(e) => error!(elapsed = ?start.elapsed(), error = %e, "Reflection call failed"),
    }
    result
  }
}

fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct ErrBody { error: ErrInner }
  #[derive(Deserialize)]
  struct ErrInner { message: String }
  serde_json::from_str::<ErrBody>(body).ok().map(|b| b.error.message)
}

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
}

#[derive(Serialize)]
struct ChatMessageReq {
  role: String,
  content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)]
  usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
  message: ChatMessageResp,
}

#[derive(Deserialize)]
struct ChatMessageResp {
  content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
  prompt_tokens: Option<u32>,
  completion_tokens: Option<u32>,
  total_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn extracts_error_message() {
    let body = r#"{"error":{"message":"quota exceeded","type":"insufficient_quota"}}"#;
    assert_eq!(extract_openai_error(body).as_deref(), Some("quota exceeded"));
    assert!(extract_openai_error("not json").is_none());
  }
}
