//! Resumption: reconcile the stored session for (user, topic) with the freshly built plan.
//!
//! Rules, first match wins:
//!   1. no session                      -> create one at step 0
//!   2. session targets another version -> create a new one at step 0 (old one untouched)
//!   3. completed                       -> open on the summary step
//!   4. cursor parked on summary        -> mark completed (optimistically) and open on summary
//!   5. cursor inside the plan          -> resume there
//!   6. cursor outside the plan         -> restart at 0
//!
//! Fetch/create failures are returned to the caller and never retried here.

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::domain::{LearningSession, SessionPatch, Topic};
use crate::error::SequencerError;
use crate::plan::StepPlan;
use crate::store::SessionStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeOutcome {
  Created,
  Superseded,
  Resumed,
  FinalizedOnSummary,
  AlreadyCompleted,
  Restarted,
}

#[derive(Clone, Debug)]
pub struct Resumption {
  pub session: LearningSession,
  pub initial_step: usize,
  pub outcome: ResumeOutcome,
}

#[instrument(level = "info", skip(store, topic, plan), fields(%user_id, topic = %topic.slug, version = %topic.current_version.id))]
pub async fn resolve(
  store: &dyn SessionStore,
  user_id: &str,
  topic: &Topic,
  plan: &StepPlan,
) -> Result<Resumption, SequencerError> {
  let version_id = &topic.current_version.id;
  let existing = store.get_latest_session(user_id, &topic.id).await?;

  let mut session = match existing {
    None => {
      let session = store.create_session(user_id, &topic.id, version_id).await?;
      info!(target: "sequencer", session_id = %session.id, "No prior session; created");
      return Ok(Resumption { session, initial_step: 0, outcome: ResumeOutcome::Created });
    }
    Some(s) if &s.topic_version_id != version_id => {
      let stale = s.id;
      let session = store.create_session(user_id, &topic.id, version_id).await?;
      info!(target: "sequencer", %stale, session_id = %session.id, "Topic content revised; superseding session");
      return Ok(Resumption { session, initial_step: 0, outcome: ResumeOutcome::Superseded });
    }
    Some(s) => s,
  };

  let last = plan.last_index();

  if session.completed {
    return Ok(Resumption { session, initial_step: last, outcome: ResumeOutcome::AlreadyCompleted });
  }

  if session.current_page == last {
    match store.patch_session(&session.id, SessionPatch::Completed(true)).await {
      Ok(updated) => session = updated,
      Err(e) => {
        warn!(target: "sequencer", session_id = %session.id, error = %e, "Completion patch failed; treating session as completed locally");
        session.completed = true;
      }
    }
    return Ok(Resumption { session, initial_step: last, outcome: ResumeOutcome::FinalizedOnSummary });
  }

  if plan.contains(session.current_page) {
    let step = session.current_page;
    return Ok(Resumption { session, initial_step: step, outcome: ResumeOutcome::Resumed });
  }

  warn!(target: "sequencer", session_id = %session.id, stored = session.current_page, total = plan.total_steps(), "Stored cursor outside plan; restarting");
  match store.patch_session(&session.id, SessionPatch::CurrentPage(0)).await {
    Ok(updated) => session = updated,
    Err(e) => {
      warn!(target: "sequencer", session_id = %session.id, error = %e, "Cursor reset not persisted");
      session.current_page = 0;
    }
  }
  Ok(Resumption { session, initial_step: 0, outcome: ResumeOutcome::Restarted })
}
