//! Domain models: topics and their content blocks, learning sessions, responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Every kind of authored block a topic outline may contain.
///
/// Step count and navigation ownership live on the variant (see [`BlockKind::spec`]),
/// so plan building and navigation dispatch read the same table.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum BlockKind {
  Text,
  Heading,
  List,
  Breathe,
  Audio,
  AiQuestion,
  FeelingsDetective,
  NeedsDetective,
  NeedsRubiksCube,
  Sortable,
  MultipleChoice,
  Timer,
  Bodymap,
  Task,
  Image,
}

/// Who drives next/previous while a block is on screen.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Navigation {
  /// Generic parent-level controls are shown.
  Parent,
  /// The block renders its own controls and calls advance/retreat itself.
  SelfManaged,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockSpec {
  pub steps: usize,
  pub navigation: Navigation,
}

impl BlockKind {
  pub const fn spec(self) -> BlockSpec {
    use Navigation::*;
    match self {
      // ask, then AI-assisted follow-up
      BlockKind::AiQuestion => BlockSpec { steps: 2, navigation: SelfManaged },
      // situation, AI reflection, thoughts, feelings selection, summary
      BlockKind::FeelingsDetective => BlockSpec { steps: 5, navigation: SelfManaged },
      BlockKind::NeedsDetective
      | BlockKind::NeedsRubiksCube
      | BlockKind::Sortable => BlockSpec { steps: 1, navigation: SelfManaged },
      BlockKind::Text
      | BlockKind::Heading
      | BlockKind::List
      | BlockKind::Breathe
      | BlockKind::Audio
      | BlockKind::MultipleChoice
      | BlockKind::Timer
      | BlockKind::Bodymap
      | BlockKind::Task
      | BlockKind::Image => BlockSpec { steps: 1, navigation: Parent },
    }
  }

  pub const fn step_count(self) -> usize { self.spec().steps }

  pub const fn navigation(self) -> Navigation { self.spec().navigation }

  pub fn as_str(self) -> &'static str {
    match self {
      BlockKind::Text => "text",
      BlockKind::Heading => "heading",
      BlockKind::List => "list",
      BlockKind::Breathe => "breathe",
      BlockKind::Audio => "audio",
      BlockKind::AiQuestion => "aiQuestion",
      BlockKind::FeelingsDetective => "feelingsDetective",
      BlockKind::NeedsDetective => "needsDetective",
      BlockKind::NeedsRubiksCube => "needsRubiksCube",
      BlockKind::Sortable => "sortable",
      BlockKind::MultipleChoice => "multipleChoice",
      BlockKind::Timer => "timer",
      BlockKind::Bodymap => "bodymap",
      BlockKind::Task => "task",
      BlockKind::Image => "image",
    }
  }
}

impl std::fmt::Display for BlockKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One authored unit of a topic outline. Everything except `type` and the optional
/// authored `id` is opaque to the sequencer and forwarded to renderers untouched.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ContentBlock {
  #[serde(rename = "type")]
  pub kind: BlockKind,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(flatten)]
  pub fields: Map<String, Value>,
}

impl ContentBlock {
  pub fn new(kind: BlockKind) -> Self {
    Self { kind, id: None, fields: Map::new() }
  }

  pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
    self.fields.insert(key.to_string(), value.into());
    self
  }

  /// Stable identity inside a topic version: authored id, else the outline position.
  pub fn key(&self, index: usize) -> String {
    match &self.id {
      Some(id) if !id.is_empty() => id.clone(),
      _ => format!("block-{index}"),
    }
  }

  /// Content as persisted alongside a response.
  pub fn to_value(&self) -> Value {
    serde_json::to_value(self).unwrap_or(Value::Null)
  }
}

/// Immutable snapshot of a topic's outline; sessions target exactly one.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicVersion {
  pub id: String,
  #[serde(default)]
  pub content: Vec<ContentBlock>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
  pub id: String,
  pub slug: String,
  pub title: String,
  #[serde(default)] pub image: Option<String>,
  #[serde(default)] pub category_color: Option<String>,
  pub current_version: TopicVersion,
}

/// A single stored answer for one block of a session.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlockResponse {
  pub block_index: usize,
  pub block_type: BlockKind,
  #[serde(default)]
  pub block_key: Option<String>,
  pub response: Value,
  pub timestamp: DateTime<Utc>,
  pub topic_version_id: String,
  pub block_content: Value,
}

impl BlockResponse {
  /// Same block if the stable keys agree, or (for entries stored without a key)
  /// if the authored content is deep-equal.
  pub fn targets_same_block(&self, kind: BlockKind, key: &str, content: &Value) -> bool {
    if self.block_type != kind {
      return false;
    }
    match &self.block_key {
      Some(k) if k == key => true,
      _ => &self.block_content == content,
    }
  }
}

/// Persisted per-(user, topic) progress record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LearningSession {
  pub id: String,
  pub user_id: String,
  pub topic_id: String,
  pub topic_version_id: String,
  #[serde(default)]
  pub current_page: usize,
  #[serde(default)]
  pub completed: bool,
  #[serde(default)]
  pub responses: Vec<BlockResponse>,
  #[serde(default)]
  pub feedback: Option<Value>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl LearningSession {
  pub fn new(id: String, user_id: &str, topic_id: &str, topic_version_id: &str) -> Self {
    let now = Utc::now();
    Self {
      id,
      user_id: user_id.to_string(),
      topic_id: topic_id.to_string(),
      topic_version_id: topic_version_id.to_string(),
      current_page: 0,
      completed: false,
      responses: Vec::new(),
      feedback: None,
      created_at: now,
      updated_at: now,
    }
  }

  pub fn apply(&mut self, patch: &SessionPatch) {
    match patch {
      SessionPatch::CurrentPage(p) => self.current_page = *p,
      SessionPatch::Responses(r) => self.responses = r.clone(),
      SessionPatch::Completed(c) => self.completed = *c,
      SessionPatch::Feedback(f) => self.feedback = Some(f.clone()),
    }
    self.updated_at = Utc::now();
  }
}

/// Partial update sent to the session store. Serializes as `{"currentPage": 3}` etc.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum SessionPatch {
  CurrentPage(usize),
  Responses(Vec<BlockResponse>),
  Completed(bool),
  Feedback(Value),
}

impl SessionPatch {
  pub fn label(&self) -> &'static str {
    match self {
      SessionPatch::CurrentPage(_) => "current_page",
      SessionPatch::Responses(_) => "responses",
      SessionPatch::Completed(_) => "completed",
      SessionPatch::Feedback(_) => "feedback",
    }
  }
}
