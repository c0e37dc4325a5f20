//! Loading service configuration (prompts, topic bank, sync tuning) from TOML.
//!
//! See `AppConfig` and `Prompts` for expected schema. Every section is optional.
//!
//! ```toml
//! [sync]
//! max_attempts = 5
//! base_delay_ms = 200
//!
//! [runs]
//! idle_secs = 1800
//!
//! [[topics]]
//! slug = "listening-first"
//! title = "Listening first"
//! version = "3"
//!
//! [[topics.content]]
//! type = "text"
//! body = "..."
//! ```

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::{ContentBlock, Topic, TopicVersion};
use crate::state::RunsConfig;
use crate::sync::SyncConfig;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub topics: Vec<TopicCfg>,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub runs: RunsConfig,
}

/// Topic entry accepted in TOML configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct TopicCfg {
  #[serde(default)] pub id: Option<String>,
  pub slug: String,
  pub title: String,
  /// Bump whenever `content` changes so older sessions get superseded.
  #[serde(default = "default_version")] pub version: String,
  #[serde(default)] pub image: Option<String>,
  #[serde(default)] pub category_color: Option<String>,
  #[serde(default)] pub content: Vec<ContentBlock>,
}

fn default_version() -> String { "1".into() }

impl TopicCfg {
  pub fn into_topic(self) -> Topic {
    let id = self.id.unwrap_or_else(|| self.slug.clone());
    Topic {
      current_version: TopicVersion { id: format!("{}@{}", id, self.version), content: self.content },
      id,
      slug: self.slug,
      title: self.title,
      image: self.image,
      category_color: self.category_color,
    }
  }
}

/// Prompts used by the reflection client. Override them in TOML to tune tone.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub coach_system: String,
  pub ai_question_template: String,
  pub feelings_reflection_template: String,
  pub summary_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      coach_system: "You are a warm, concise communication coach grounded in nonviolent communication. Never diagnose. Reply in 2-4 sentences.".into(),
      ai_question_template: "Exercise question: {question}\nLearner answer: {answer}\nReflect back what you heard and ask one gentle follow-up question.".into(),
      feelings_reflection_template: "The learner described this situation: {answer}\nSeparate observation from evaluation and name feelings that might be present, as suggestions only.".into(),
      summary_template: "Lesson: {title}\nLearner responses (JSON): {answer}\nWrite a short encouraging summary of what the learner explored.".into(),
    }
  }
}

/// Attempt to load `AppConfig` from SEQUENCER_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_app_config_from_env() -> Option<AppConfig> {
  let path = std::env::var("SEQUENCER_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => parse_app_config(&s, &path),
    Err(e) => {
      error!(target: "stepwise_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

fn parse_app_config(s: &str, path: &str) -> Option<AppConfig> {
  match toml::from_str::<AppConfig>(s) {
    Ok(cfg) => {
      info!(target: "stepwise_backend", %path, topics = cfg.topics.len(), "Loaded service config (TOML)");
      Some(cfg)
    }
    Err(e) => {
      error!(target: "stepwise_backend", %path, error = %e, "Failed to parse TOML config");
      None
    }
  }
}
