//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - Opening a topic (plan + resumption) and registering the run
//!   - Next/previous with background persistence of the cursor
//!   - Block-driven navigation visibility overrides
//!   - Recording block responses and completion feedback
//!   - Reflection/summary text for exercise blocks, dropped if the learner moved on

use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{LearningSession, SessionPatch};
use crate::error::SequencerError;
use crate::navigation::{NavEvent, NavigationController};
use crate::plan::build_plan;
use crate::protocol::{ReflectIn, ReflectKind, ReflectOut, RunView, TopicOut};
use crate::recorder::{record, ResponseInput};
use crate::resume::{resolve, ResumeOutcome};
use crate::state::{AppState, Run};
use crate::sync::SyncHandle;
use crate::util::payload_text;

pub fn run_view(run: &Run, outcome: Option<ResumeOutcome>, event: Option<NavEvent>) -> RunView {
  let entry = *run.nav.current_entry();
  let block = entry
    .block_index
    .and_then(|i| run.topic.current_version.content.get(i))
    .cloned();
  RunView {
    session_id: run.session.id.clone(),
    topic_slug: run.topic.slug.clone(),
    version_id: run.topic.current_version.id.clone(),
    current_step: run.nav.current_step(),
    total_steps: run.nav.plan().total_steps(),
    entry,
    block,
    show_navigation: run.nav.show_navigation(),
    nav_override: run.nav.nav_override(),
    completed: run.nav.is_completed(),
    generation: run.nav.generation(),
    response_count: run.session.responses.len(),
    outcome,
    event,
    sync: run.sync.status(),
  }
}

#[instrument(level = "info", skip(state))]
pub async fn describe_topic(state: &AppState, slug: &str) -> Result<TopicOut, SequencerError> {
  let topic = state.content.get_topic_by_slug(slug).await?;
  let plan = build_plan(&topic.current_version.content);
  Ok(TopicOut::new(&topic, plan))
}

#[instrument(level = "info", skip(state))]
pub async fn open_topic(state: &AppState, user_id: &str, slug: &str) -> Result<RunView, SequencerError> {
  let topic = state.content.get_topic_by_slug(slug).await?;

  // A live run holds the authoritative cursor; the store may still lag behind it.
  if let Some(live) = state.find_run(user_id, &topic.id).await {
    let run = live.lock().await;
    if run.topic.current_version.id == topic.current_version.id {
      let outcome = if run.nav.is_completed() { ResumeOutcome::AlreadyCompleted } else { ResumeOutcome::Resumed };
      info!(target: "sequencer", session_id = %run.session.id, %slug, step = run.nav.current_step(), "Live run reopened");
      return Ok(run_view(&run, Some(outcome), None));
    }
  }

  let plan = build_plan(&topic.current_version.content);
  let resumption = resolve(state.store.as_ref(), user_id, &topic, &plan).await?;

  let session = resumption.session;
  let nav = NavigationController::new(plan, resumption.initial_step, session.completed);
  let sync = SyncHandle::spawn(state.store.clone(), session.id.clone(), state.sync_cfg.clone());
  info!(
    target: "sequencer",
    session_id = %session.id, %slug, step = resumption.initial_step,
    total = nav.plan().total_steps(), outcome = ?resumption.outcome,
    "Topic opened"
  );

  let run = state.insert_run(Run { topic, session, nav, sync }).await;
  let run = run.lock().await;
  Ok(run_view(&run, Some(resumption.outcome), None))
}

#[instrument(level = "debug", skip(state))]
pub async fn current_run(state: &AppState, session_id: &str) -> Result<RunView, SequencerError> {
  let run = state.get_run(session_id).await?;
  let run = run.lock().await;
  Ok(run_view(&run, None, None))
}

/// Move forward; on the summary step this finishes the run instead.
/// The cursor moves locally even if the store is unreachable.
#[instrument(level = "info", skip(state))]
pub async fn advance(state: &AppState, session_id: &str) -> Result<RunView, SequencerError> {
  let run = state.get_run(session_id).await?;
  let mut run = run.lock().await;
  let event = run.nav.advance();
  apply_nav_event(&mut run, event);
  Ok(run_view(&run, None, Some(event)))
}

#[instrument(level = "info", skip(state))]
pub async fn retreat(state: &AppState, session_id: &str) -> Result<RunView, SequencerError> {
  let run = state.get_run(session_id).await?;
  let mut run = run.lock().await;
  let event = run.nav.retreat();
  apply_nav_event(&mut run, event);
  Ok(run_view(&run, None, Some(event)))
}

fn apply_nav_event(run: &mut Run, event: NavEvent) {
  match event {
    NavEvent::Moved { from, to } => {
      run.session.current_page = to;
      run.sync.push_cursor(to);
      debug!(target: "sequencer", session_id = %run.session.id, from, to, "Cursor moved");
    }
    NavEvent::Completed => {
      run.session.completed = true;
      run.sync.push_completed();
      info!(target: "sequencer", session_id = %run.session.id, "Run completed");
    }
    NavEvent::Stayed => {}
  }
}

#[instrument(level = "debug", skip(state))]
pub async fn set_navigation(state: &AppState, session_id: &str, show: Option<bool>) -> Result<RunView, SequencerError> {
  let run = state.get_run(session_id).await?;
  let mut run = run.lock().await;
  run.nav.set_nav_override(show);
  Ok(run_view(&run, None, None))
}

/// Store the learner's input for a block. A failed save is reported as `saved = false`
/// and never blocks navigation.
#[instrument(level = "info", skip(state, response))]
pub async fn submit_response(
  state: &AppState,
  session_id: &str,
  block_index: usize,
  response: Value,
) -> Result<(bool, RunView), SequencerError> {
  let run = state.get_run(session_id).await?;
  let mut run = run.lock().await;
  let block = run
    .topic
    .current_version
    .content
    .get(block_index)
    .ok_or_else(|| SequencerError::BadRequest(format!("no block at index {block_index}")))?;
  let input = ResponseInput::for_block(block_index, block, &run.topic.current_version.id, response);

  let saved = match record(state.store.as_ref(), session_id, Some(run.session.clone()), input).await {
    Some(updated) => {
      // cursor and completion stay local-authoritative; only take the responses
      run.session.responses = updated.responses;
      true
    }
    None => false,
  };
  Ok((saved, run_view(&run, None, None)))
}

#[instrument(level = "info", skip(state, feedback))]
pub async fn save_feedback(state: &AppState, session_id: &str, feedback: Value) -> Result<bool, SequencerError> {
  let run = state.get_run(session_id).await?;
  let mut run = run.lock().await;
  match state.store.patch_session(session_id, SessionPatch::Feedback(feedback.clone())).await {
    Ok(_) => {
      run.session.feedback = Some(feedback);
      Ok(true)
    }
    Err(e) => {
      warn!(target: "sequencer", %session_id, error = %e, "Feedback not saved");
      Ok(false)
    }
  }
}

#[instrument(level = "info", skip(state))]
pub async fn delete_session(state: &AppState, session_id: &str) -> Result<(), SequencerError> {
  state.store.delete_session(session_id).await?;
  state.remove_run(session_id).await;
  info!(target: "sequencer", %session_id, "Session deleted by user");
  Ok(())
}

/// Reflection/summary text for the block that asked for it.
///
/// The reply is only applied if the run is still on the step (same generation) that
/// started the call; otherwise it comes back with `discarded = true`.
#[instrument(level = "info", skip(state, req), fields(session_id = %req.session_id, kind = ?req.kind, generation = req.generation))]
pub async fn reflect(state: &AppState, req: ReflectIn) -> Result<ReflectOut, SequencerError> {
  let run = state.get_run(&req.session_id).await?;
  let (title, question, responses) = {
    let run = run.lock().await;
    if !run.nav.is_current(req.generation) {
      return Ok(discarded());
    }
    let question = req
      .block_index
      .and_then(|i| run.topic.current_version.content.get(i))
      .and_then(|b| b.fields.get("question").or_else(|| b.fields.get("prompt")))
      .map(payload_text)
      .unwrap_or_default();
    (run.topic.title.clone(), question, summary_payload(&run.session))
  };
  let answer = match req.kind {
    ReflectKind::Summary => responses,
    _ => payload_text(&req.answer),
  };

  let result = match &state.openai {
    Some(oa) => oa.reflect(&state.prompts, req.kind, &title, &question, &answer).await,
    None => Ok(reflect_local(req.kind, &title, &answer)),
  };

  let still_current = run.lock().await.nav.is_current(req.generation);
  if !still_current {
    debug!(target: "sequencer", session_id = %req.session_id, "Reflection arrived after navigation; discarded");
    return Ok(discarded());
  }

  Ok(match result {
    Ok(text) => ReflectOut { ok: true, discarded: false, text, message: None },
    Err(e) => {
      error!(target: "sequencer", session_id = %req.session_id, error = %e, "Reflection failed");
      ReflectOut { ok: false, discarded: false, text: String::new(), message: Some("Reflection unavailable, please retry.".into()) }
    }
  })
}

fn discarded() -> ReflectOut {
  ReflectOut { ok: false, discarded: true, text: String::new(), message: None }
}

fn summary_payload(session: &LearningSession) -> String {
  let items: Vec<Value> = session
    .responses
    .iter()
    .map(|r| serde_json::json!({ "block": r.block_type, "response": r.response }))
    .collect();
  Value::Array(items).to_string()
}

// -------- Local fallbacks --------

fn reflect_local(kind: ReflectKind, title: &str, answer: &str) -> String {
  let answer = answer.trim();
  match kind {
    ReflectKind::AiQuestion if answer.is_empty() => "Take a moment and write what comes up for you; there are no wrong answers.".into(),
    ReflectKind::AiQuestion => format!("It sounds like this mattered to you: \"{}\". What did you most need in that moment?", first_sentence(answer)),
    ReflectKind::Feelings => "Try to describe only what a camera would have recorded. Which feelings come up when you read it back: tense, sad, confused, hopeful?".into(),
    ReflectKind::Summary => format!("You finished \"{}\". Noticing feelings and needs is a skill; each practice makes the next conversation a little easier.", title),
  }
}

fn first_sentence(s: &str) -> String {
  let cut = s.find(['.', '!', '?']).map(|i| i + 1).unwrap_or(s.len());
  s[..cut].chars().take(160).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  use crate::config::Prompts;
  use crate::domain::{BlockKind, ContentBlock, Topic, TopicVersion};
  use crate::store::{InMemoryContentSource, InMemorySessionStore, SessionStore};
  use crate::sync::SyncConfig;
  use serde_json::json;

  fn topic(version: &str) -> Topic {
    Topic {
      id: "t1".into(),
      slug: "calm".into(),
      title: "Calm".into(),
      image: None,
      category_color: None,
      current_version: TopicVersion {
        id: version.into(),
        content: vec![
          ContentBlock::new(BlockKind::Text),
          ContentBlock::new(BlockKind::AiQuestion).with_field("question", "What happened?"),
          ContentBlock::new(BlockKind::FeelingsDetective),
        ],
      },
    }
  }

  fn app() -> (AppState, InMemorySessionStore, InMemoryContentSource) {
    let store = InMemorySessionStore::new();
    let content = InMemoryContentSource::new([topic("v1")]);
    let cfg = SyncConfig { max_attempts: 2, base_delay_ms: 1, max_delay_ms: 2, shutdown_grace_ms: 1_000 };
    let state = AppState::with_parts(Arc::new(store.clone()), Arc::new(content.clone()), None, Prompts::default(), cfg);
    (state, store, content)
  }

  #[tokio::test]
  async fn open_then_navigate_persists_cursor() {
    let (state, store, _) = app();
    let view = open_topic(&state, "u1", "calm").await.unwrap();
    assert_eq!(view.outcome, Some(ResumeOutcome::Created));
    assert_eq!(view.total_steps, 10);
    assert!(!view.show_navigation);

    advance(&state, &view.session_id).await.unwrap();
    advance(&state, &view.session_id).await.unwrap();
    let v = advance(&state, &view.session_id).await.unwrap();
    assert_eq!(v.current_step, 3);
    assert_eq!(v.entry.internal_step, 1);

    let run = state.get_run(&view.session_id).await.unwrap();
    let status = run.lock().await.sync.flushed().await;
    assert_eq!(status.synced_page, Some(3));
    assert_eq!(store.get_session_by_id(&view.session_id).await.unwrap().unwrap().current_page, 3);
  }

  #[tokio::test]
  async fn reopening_resumes_where_left() {
    let (state, _, _) = app();
    let view = open_topic(&state, "u1", "calm").await.unwrap();
    advance(&state, &view.session_id).await.unwrap();
    advance(&state, &view.session_id).await.unwrap();
    state.get_run(&view.session_id).await.unwrap().lock().await.sync.flushed().await;
    state.remove_run(&view.session_id).await;

    let again = open_topic(&state, "u1", "calm").await.unwrap();
    assert_eq!(again.session_id, view.session_id);
    assert_eq!(again.outcome, Some(ResumeOutcome::Resumed));
    assert_eq!(again.current_step, 2);
  }

  #[tokio::test]
  async fn new_version_starts_fresh_session() {
    let (state, _, content) = app();
    let view = open_topic(&state, "u1", "calm").await.unwrap();
    advance(&state, &view.session_id).await.unwrap();
    content.upsert(topic("v2")).await;

    let again = open_topic(&state, "u1", "calm").await.unwrap();
    assert_eq!(again.outcome, Some(ResumeOutcome::Superseded));
    assert_ne!(again.session_id, view.session_id);
    assert_eq!(again.current_step, 0);
  }

  #[tokio::test]
  async fn advancing_past_summary_completes_even_if_store_fails() {
    let (state, store, _) = app();
    let view = open_topic(&state, "u1", "calm").await.unwrap();
    for _ in 0..9 {
      advance(&state, &view.session_id).await.unwrap();
    }
    state.get_run(&view.session_id).await.unwrap().lock().await.sync.flushed().await;
    store.fail_next_patches(usize::MAX);

    let v = advance(&state, &view.session_id).await.unwrap();
    assert_eq!(v.event, Some(NavEvent::Completed));
    assert!(v.completed);
    assert_eq!(v.current_step, 9);

    let status = state.get_run(&view.session_id).await.unwrap().lock().await.sync.flushed().await;
    assert!(status.unsynced);
  }

  #[tokio::test]
  async fn failed_completion_lands_before_shutdown_without_more_input() {
    let (state, store, _) = app();
    let view = open_topic(&state, "u1", "calm").await.unwrap();
    for _ in 0..9 {
      advance(&state, &view.session_id).await.unwrap();
    }
    state.get_run(&view.session_id).await.unwrap().lock().await.sync.flushed().await;
    store.fail_next_patches(3);

    let v = advance(&state, &view.session_id).await.unwrap();
    assert_eq!(v.event, Some(NavEvent::Completed));

    state.flush_all().await;
    let stored = store.get_session_by_id(&view.session_id).await.unwrap().unwrap();
    assert!(stored.completed);
    let run = state.get_run(&view.session_id).await.unwrap();
    assert!(!run.lock().await.sync.status().unsynced);
  }

  #[tokio::test]
  async fn reopening_keeps_local_cursor_while_writes_lag() {
    let (state, store, _) = app();
    let view = open_topic(&state, "u1", "calm").await.unwrap();
    store.fail_next_patches(usize::MAX);
    for _ in 0..3 {
      advance(&state, &view.session_id).await.unwrap();
    }

    let again = open_topic(&state, "u1", "calm").await.unwrap();
    assert_eq!(again.session_id, view.session_id);
    assert_eq!(again.outcome, Some(ResumeOutcome::Resumed));
    assert_eq!(again.current_step, 3);
    assert_eq!(state.run_count().await, 1);

    store.fail_next_patches(0);
    state.flush_all().await;
    assert_eq!(store.get_session_by_id(&view.session_id).await.unwrap().unwrap().current_page, 3);
    assert_eq!(current_run(&state, &view.session_id).await.unwrap().current_step, 3);
  }

  #[tokio::test]
  async fn superseded_sessions_do_not_keep_runs() {
    let (state, _, content) = app();
    open_topic(&state, "u1", "calm").await.unwrap();
    content.upsert(topic("v2")).await;
    open_topic(&state, "u1", "calm").await.unwrap();
    content.upsert(topic("v3")).await;
    let latest = open_topic(&state, "u1", "calm").await.unwrap();

    assert_eq!(latest.outcome, Some(ResumeOutcome::Superseded));
    assert_eq!(state.run_count().await, 1);
    assert!(current_run(&state, &latest.session_id).await.is_ok());
  }

  #[tokio::test]
  async fn response_resubmission_keeps_one_entry() {
    let (state, _, _) = app();
    let view = open_topic(&state, "u1", "calm").await.unwrap();
    let (saved, _) = submit_response(&state, &view.session_id, 2, json!("first")).await.unwrap();
    assert!(saved);
    let (saved, v) = submit_response(&state, &view.session_id, 2, json!("second")).await.unwrap();
    assert!(saved);
    assert_eq!(v.response_count, 1);

    let err = submit_response(&state, &view.session_id, 7, json!("x")).await.unwrap_err();
    assert!(matches!(err, SequencerError::BadRequest(_)));
  }

  #[tokio::test]
  async fn failed_response_save_reports_unsaved() {
    let (state, store, _) = app();
    let view = open_topic(&state, "u1", "calm").await.unwrap();
    store.fail_next_patches(1);
    let (saved, v) = submit_response(&state, &view.session_id, 0, json!("lost")).await.unwrap();
    assert!(!saved);
    assert_eq!(v.response_count, 0);
  }

  #[tokio::test]
  async fn block_override_resets_on_step_change() {
    let (state, _, _) = app();
    let view = open_topic(&state, "u1", "calm").await.unwrap();
    let v = advance(&state, &view.session_id).await.unwrap();
    assert!(v.show_navigation);
    let v = set_navigation(&state, &view.session_id, Some(false)).await.unwrap();
    assert!(!v.show_navigation);
    let v = retreat(&state, &view.session_id).await.unwrap();
    let v2 = advance(&state, &v.session_id).await.unwrap();
    assert!(v2.show_navigation);
  }

  #[tokio::test]
  async fn stale_reflection_is_discarded() {
    let (state, _, _) = app();
    let view = open_topic(&state, "u1", "calm").await.unwrap();
    let at_question = advance(&state, &view.session_id).await.unwrap();
    let at_question = advance(&state, &at_question.session_id).await.unwrap();

    let fresh = reflect(&state, ReflectIn {
      session_id: view.session_id.clone(),
      kind: ReflectKind::AiQuestion,
      block_index: Some(1),
      answer: json!("My friend ignored my message."),
      generation: at_question.generation,
    }).await.unwrap();
    assert!(fresh.ok);
    assert!(!fresh.discarded);
    assert!(fresh.text.contains("My friend ignored my message."));

    advance(&state, &view.session_id).await.unwrap();
    let stale = reflect(&state, ReflectIn {
      session_id: view.session_id.clone(),
      kind: ReflectKind::AiQuestion,
      block_index: Some(1),
      answer: json!("late"),
      generation: at_question.generation,
    }).await.unwrap();
    assert!(stale.discarded);
    assert!(stale.text.is_empty());
  }

  #[tokio::test]
  async fn feedback_and_delete() {
    let (state, store, _) = app();
    let view = open_topic(&state, "u1", "calm").await.unwrap();
    assert!(save_feedback(&state, &view.session_id, json!({ "rating": 5 })).await.unwrap());
    let stored = store.get_session_by_id(&view.session_id).await.unwrap().unwrap();
    assert_eq!(stored.feedback, Some(json!({ "rating": 5 })));

    delete_session(&state, &view.session_id).await.unwrap();
    assert!(matches!(current_run(&state, &view.session_id).await, Err(SequencerError::UnknownRun(_))));
  }

  #[tokio::test]
  async fn unknown_topic_is_an_error() {
    let (state, _, _) = app();
    let err = open_topic(&state, "u1", "nope").await.unwrap_err();
    assert!(matches!(err, SequencerError::TopicNotFound(_)));
  }
}
