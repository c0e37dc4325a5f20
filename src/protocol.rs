//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and app independently.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{ContentBlock, Topic};
use crate::navigation::NavEvent;
use crate::plan::{StepPlan, StepPlanEntry};
use crate::resume::ResumeOutcome;
use crate::sync::SyncStatus;

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    OpenTopic {
        #[serde(rename = "userId")]
        user_id: String,
        slug: String,
    },
    Next {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Prev {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    SetNavigation {
        #[serde(rename = "sessionId")]
        session_id: String,
        show: Option<bool>,
    },
    SubmitResponse {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "blockIndex")]
        block_index: usize,
        response: Value,
    },
    Feedback {
        #[serde(rename = "sessionId")]
        session_id: String,
        feedback: Value,
    },
    Reflect(ReflectIn),
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Run {
        run: RunView,
    },
    ResponseSaved {
        saved: bool,
        run: RunView,
    },
    FeedbackSaved {
        saved: bool,
    },
    Reflection(ReflectOut),
    Error {
        code: String,
        message: String,
    },
}

/// Snapshot of a learning run as seen by the app after every operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunView {
    pub session_id: String,
    pub topic_slug: String,
    pub version_id: String,
    pub current_step: usize,
    pub total_steps: usize,
    pub entry: StepPlanEntry,
    /// The block behind the current step, if it is not title/summary.
    pub block: Option<ContentBlock>,
    pub show_navigation: bool,
    /// Visibility preference the active block asserted, if any.
    pub nav_override: Option<bool>,
    pub completed: bool,
    pub generation: u64,
    pub response_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ResumeOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<NavEvent>,
    pub sync: SyncStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicOut {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub image: Option<String>,
    pub category_color: Option<String>,
    pub version_id: String,
    pub total_steps: usize,
    pub plan: StepPlan,
    pub content: Vec<ContentBlock>,
}

impl TopicOut {
    pub fn new(t: &Topic, plan: StepPlan) -> Self {
        Self {
            id: t.id.clone(),
            slug: t.slug.clone(),
            title: t.title.clone(),
            image: t.image.clone(),
            category_color: t.category_color.clone(),
            version_id: t.current_version.id.clone(),
            total_steps: plan.total_steps(),
            plan,
            content: t.current_version.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReflectKind {
    /// Follow-up for the second step of an aiQuestion block.
    AiQuestion,
    /// Reflection step of the feelings detective.
    Feelings,
    /// End-of-topic summary.
    Summary,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectIn {
    pub session_id: String,
    pub kind: ReflectKind,
    #[serde(default)]
    pub block_index: Option<usize>,
    #[serde(default)]
    pub answer: Value,
    /// Run generation the block observed when it started the call.
    pub generation: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectOut {
    pub ok: bool,
    /// The learner moved on before the reply arrived; the text must not be applied.
    pub discarded: bool,
    pub text: String,
    pub message: Option<String>,
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenTopicIn {
    pub user_id: String,
    pub slug: String,
}

#[derive(Debug, Deserialize)]
pub struct NavigationIn {
    pub show: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseIn {
    pub block_index: usize,
    pub response: Value,
}

#[derive(Serialize)]
pub struct ResponseOut {
    pub saved: bool,
    pub run: RunView,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackIn {
    pub feedback: Value,
}

#[derive(Serialize)]
pub struct FeedbackOut {
    pub saved: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorOut {
    pub error: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}
