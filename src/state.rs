//! Application state: session store, content source, active runs, prompts, OpenAI client.
//!
//! This module owns:
//!   - the session store (remote REST when SESSION_STORE_URL is set, else in-memory)
//!   - the content source (remote when CONTENT_SOURCE_URL is set, else seeds + TOML bank)
//!   - the active runs: one navigation controller + sync worker per open session,
//!     at most one per (user, topic), evicted once idle and fully synced
//!   - the prompts struct (from TOML or defaults) and the optional OpenAI client

use std::sync::atomic::{AtomicU64, Ordering};
use std::{collections::HashMap, sync::Arc, time::Duration};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{load_app_config_from_env, Prompts};
use crate::domain::{LearningSession, Topic};
use crate::error::SequencerError;
use crate::navigation::NavigationController;
use crate::openai::OpenAI;
use crate::remote::{RemoteContentSource, RemoteSessionStore};
use crate::seeds::seed_topics;
use crate::store::{ContentSource, InMemoryContentSource, InMemorySessionStore, SessionStore};
use crate::sync::{SyncConfig, SyncHandle};

/// A learner's open topic: local authoritative cursor plus its background sync.
pub struct Run {
    pub topic: Topic,
    pub session: LearningSession,
    pub nav: NavigationController,
    pub sync: SyncHandle,
}

/// Lifetime of registered runs.
#[derive(Clone, Debug, Deserialize)]
pub struct RunsConfig {
    /// A run untouched for this long is dropped once its writes have landed.
    #[serde(default = "default_idle_secs")]
    pub idle_secs: u64,
    #[serde(default = "default_sweep_secs")]
    pub sweep_secs: u64,
}

fn default_idle_secs() -> u64 { 30 * 60 }
fn default_sweep_secs() -> u64 { 60 }

impl Default for RunsConfig {
    fn default() -> Self {
        Self { idle_secs: default_idle_secs(), sweep_secs: default_sweep_secs() }
    }
}

// Owner and sync handle live outside the run mutex so lookups and sweeps never wait on a busy run.
struct RunSlot {
    user_id: String,
    topic_id: String,
    touched_ms: AtomicU64,
    sync: SyncHandle,
    run: Arc<Mutex<Run>>,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SessionStore>,
    pub content: Arc<dyn ContentSource>,
    runs: Arc<RwLock<HashMap<String, RunSlot>>>,
    epoch: Instant,
    pub openai: Option<OpenAI>,
    pub prompts: Prompts,
    pub sync_cfg: SyncConfig,
    pub runs_cfg: RunsConfig,
}

impl AppState {
    /// Build state from env: load config, pick store/content backends, init OpenAI.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let cfg = load_app_config_from_env().unwrap_or_default();
        let timeout = Duration::from_secs(
            std::env::var("STORE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(10),
        );

        let store: Arc<dyn SessionStore> = match std::env::var("SESSION_STORE_URL") {
            Ok(url) => match RemoteSessionStore::new(&url, timeout) {
                Ok(remote) => {
                    info!(target: "stepwise_backend", base_url = %remote.base_url, "Using remote session store.");
                    Arc::new(remote)
                }
                Err(e) => {
                    error!(target: "stepwise_backend", error = %e, "Remote session store unavailable; using in-memory store.");
                    Arc::new(InMemorySessionStore::new())
                }
            },
            Err(_) => {
                info!(target: "stepwise_backend", "SESSION_STORE_URL not set; using in-memory session store.");
                Arc::new(InMemorySessionStore::new())
            }
        };

        let remote_content = std::env::var("CONTENT_SOURCE_URL")
            .ok()
            .and_then(|url| match RemoteContentSource::new(&url, timeout) {
                Ok(src) => Some(src),
                Err(e) => {
                    error!(target: "stepwise_backend", error = %e, "Remote content source unavailable; using local topics.");
                    None
                }
            });
        let content: Arc<dyn ContentSource> = match remote_content {
            Some(src) => {
                info!(target: "stepwise_backend", base_url = %src.base_url, "Using remote content source.");
                Arc::new(src)
            }
            None => {
                // Config-bank topics replace seeds that share a slug.
                let mut by_slug: HashMap<String, Topic> =
                    seed_topics().into_iter().map(|t| (t.slug.clone(), t)).collect();
                for t in cfg.topics.iter().cloned().map(|c| c.into_topic()) {
                    by_slug.insert(t.slug.clone(), t);
                }
                info!(target: "stepwise_backend", topics = by_slug.len(), "Local topic inventory");
                Arc::new(InMemoryContentSource::new(by_slug.into_values()))
            }
        };

        let openai = OpenAI::from_env();
        if let Some(oa) = &openai {
            info!(target: "stepwise_backend", base_url = %oa.base_url, model = %oa.model, "OpenAI enabled.");
        } else {
            info!(target: "stepwise_backend", "OpenAI disabled (no OPENAI_API_KEY). Using local reflections.");
        }

        let mut state = Self::with_parts(store, content, openai, cfg.prompts, cfg.sync);
        state.runs_cfg = cfg.runs;
        state
    }

    pub fn with_parts(
        store: Arc<dyn SessionStore>,
        content: Arc<dyn ContentSource>,
        openai: Option<OpenAI>,
        prompts: Prompts,
        sync_cfg: SyncConfig,
    ) -> Self {
        Self {
            store,
            content,
            runs: Arc::new(RwLock::new(HashMap::new())),
            epoch: Instant::now(),
            openai,
            prompts,
            sync_cfg,
            runs_cfg: RunsConfig::default(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Register a run, replacing any previous run for the same session and dropping
    /// runs of older sessions for the same (user, topic).
    pub async fn insert_run(&self, run: Run) -> Arc<Mutex<Run>> {
        let id = run.session.id.clone();
        let slot = RunSlot {
            user_id: run.session.user_id.clone(),
            topic_id: run.session.topic_id.clone(),
            touched_ms: AtomicU64::new(self.now_ms()),
            sync: run.sync.clone(),
            run: Arc::new(Mutex::new(run)),
        };
        let run = slot.run.clone();
        let mut runs = self.runs.write().await;
        let before = runs.len();
        runs.retain(|other, s| other == &id || s.user_id != slot.user_id || s.topic_id != slot.topic_id);
        if runs.len() < before {
            debug!(target: "sequencer", session_id = %id, evicted = before - runs.len(), "Dropped runs of older sessions");
        }
        runs.insert(id, slot);
        run
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn get_run(&self, session_id: &str) -> Result<Arc<Mutex<Run>>, SequencerError> {
        let runs = self.runs.read().await;
        let slot = runs
            .get(session_id)
            .ok_or_else(|| SequencerError::UnknownRun(session_id.to_string()))?;
        slot.touched_ms.store(self.now_ms(), Ordering::Relaxed);
        Ok(slot.run.clone())
    }

    /// The registered run for (user, topic), if any.
    pub async fn find_run(&self, user_id: &str, topic_id: &str) -> Option<Arc<Mutex<Run>>> {
        let runs = self.runs.read().await;
        let slot = runs.values().find(|s| s.user_id == user_id && s.topic_id == topic_id)?;
        slot.touched_ms.store(self.now_ms(), Ordering::Relaxed);
        Some(slot.run.clone())
    }

    pub async fn remove_run(&self, session_id: &str) {
        self.runs.write().await.remove(session_id);
    }

    #[cfg(test)]
    pub async fn run_count(&self) -> usize {
        self.runs.read().await.len()
    }

    /// Drop runs untouched for longer than `max_idle` whose writes have all landed.
    /// Dropping the run stops its sync worker.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = self.now_ms();
        let max_idle = max_idle.as_millis() as u64;
        let mut runs = self.runs.write().await;
        let before = runs.len();
        runs.retain(|_, s| now.saturating_sub(s.touched_ms.load(Ordering::Relaxed)) <= max_idle || !s.sync.is_idle());
        let evicted = before - runs.len();
        if evicted > 0 {
            info!(target: "sequencer", evicted, remaining = runs.len(), "Idle runs evicted");
        }
        evicted
    }

    /// Periodically evict idle runs per `runs_cfg`.
    pub fn spawn_idle_sweeper(&self) -> JoinHandle<()> {
        let state = self.clone();
        tokio::spawn(async move {
            let max_idle = Duration::from_secs(state.runs_cfg.idle_secs);
            let mut tick = tokio::time::interval(Duration::from_secs(state.runs_cfg.sweep_secs.max(1)));
            tick.tick().await;
            loop {
                tick.tick().await;
                state.evict_idle(max_idle).await;
            }
        })
    }

    /// Wait for every run's queued and carried writes, bounded by the shutdown grace period.
    pub async fn flush_all(&self) {
        let handles: Vec<(String, SyncHandle)> =
            self.runs.read().await.iter().map(|(id, s)| (id.clone(), s.sync.clone())).collect();
        let grace = Duration::from_millis(self.sync_cfg.shutdown_grace_ms);
        for (session_id, sync) in handles {
            let status = sync.drained(grace).await;
            if status.unsynced || status.pending > 0 {
                warn!(target: "sync", %session_id, pending = status.pending, carried = status.carried, error = ?status.last_error, "Run left unsynced at shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BlockKind, ContentBlock, TopicVersion};
    use crate::plan::build_plan;

    fn state() -> (AppState, InMemorySessionStore) {
        let store = InMemorySessionStore::new();
        let cfg = SyncConfig { max_attempts: 1, base_delay_ms: 1, max_delay_ms: 2, shutdown_grace_ms: 1_000 };
        let state = AppState::with_parts(
            Arc::new(store.clone()),
            Arc::new(InMemoryContentSource::new([])),
            None,
            Prompts::default(),
            cfg,
        );
        (state, store)
    }

    fn run(state: &AppState, session: LearningSession) -> Run {
        let topic = Topic {
            id: session.topic_id.clone(),
            slug: "calm".into(),
            title: "Calm".into(),
            image: None,
            category_color: None,
            current_version: TopicVersion {
                id: session.topic_version_id.clone(),
                content: vec![ContentBlock::new(BlockKind::Text)],
            },
        };
        let nav = NavigationController::new(build_plan(&topic.current_version.content), 0, false);
        let sync = SyncHandle::spawn(state.store.clone(), session.id.clone(), state.sync_cfg.clone());
        Run { topic, session, nav, sync }
    }

    #[tokio::test]
    async fn one_run_per_user_and_topic() {
        let (state, store) = state();
        let a = store.create_session("u1", "t1", "v1").await.unwrap();
        let b = store.create_session("u1", "t1", "v2").await.unwrap();
        let other = store.create_session("u2", "t1", "v2").await.unwrap();

        state.insert_run(run(&state, a.clone())).await;
        state.insert_run(run(&state, other.clone())).await;
        state.insert_run(run(&state, b.clone())).await;

        assert_eq!(state.run_count().await, 2);
        assert!(state.get_run(&a.id).await.is_err());
        assert!(state.get_run(&b.id).await.is_ok());
        assert!(state.find_run("u2", "t1").await.is_some());
    }

    #[tokio::test]
    async fn idle_runs_are_evicted_unless_writes_are_outstanding() {
        let (state, store) = state();
        let quiet = store.create_session("u1", "t1", "v1").await.unwrap();
        let stuck = store.create_session("u2", "t1", "v1").await.unwrap();
        state.insert_run(run(&state, quiet.clone())).await;
        let stuck_run = state.insert_run(run(&state, stuck.clone())).await;

        store.fail_next_patches(usize::MAX);
        let sync = stuck_run.lock().await.sync.clone();
        sync.push_cursor(1);
        assert!(sync.flushed().await.unsynced);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(state.evict_idle(Duration::from_secs(60)).await, 0);
        assert_eq!(state.evict_idle(Duration::from_millis(10)).await, 1);
        assert!(state.get_run(&quiet.id).await.is_err());
        assert!(state.get_run(&stuck.id).await.is_ok());
    }
}
