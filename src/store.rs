//! Session store and content source seams, plus their in-memory implementations.
//!
//! The sequencer only talks to these traits. The in-memory store backs local runs
//! and tests (test builds add failure injection); `remote::RemoteSessionStore`
//! forwards to the REST backend.

use std::collections::HashMap;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::{LearningSession, SessionPatch, Topic};
use crate::error::{SequencerError, StoreError};

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Most recently created session for this (user, topic), any version.
    async fn get_latest_session(&self, user_id: &str, topic_id: &str) -> Result<Option<LearningSession>, StoreError>;

    async fn create_session(&self, user_id: &str, topic_id: &str, topic_version_id: &str) -> Result<LearningSession, StoreError>;

    async fn patch_session(&self, session_id: &str, patch: SessionPatch) -> Result<LearningSession, StoreError>;

    async fn get_session_by_id(&self, session_id: &str) -> Result<Option<LearningSession>, StoreError>;

    /// User-initiated removal; the sequencer itself never deletes.
    async fn delete_session(&self, session_id: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn get_topic_by_slug(&self, slug: &str) -> Result<Topic, SequencerError>;
}

#[derive(Default)]
struct Sessions {
    by_id: HashMap<String, LearningSession>,
    // creation order; "latest" is the last matching id
    order: Vec<String>,
}

#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    inner: Arc<RwLock<Sessions>>,
    #[cfg(test)]
    faults: Faults,
}

/// Failure injection and a patch log for tests.
#[cfg(test)]
#[derive(Clone, Default)]
struct Faults {
    failing_patches: Arc<AtomicUsize>,
    failing_reads: Arc<AtomicUsize>,
    patch_log: Arc<RwLock<Vec<(String, SessionPatch)>>>,
}

#[cfg(test)]
impl Faults {
    fn take(counter: &AtomicUsize) -> Result<(), StoreError> {
        match counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)) {
            Ok(_) => Err(StoreError::Unavailable),
            Err(_) => Ok(()),
        }
    }
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` patch calls fail with `StoreError::Unavailable`.
    #[cfg(test)]
    pub fn fail_next_patches(&self, n: usize) {
        self.faults.failing_patches.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` read calls fail with `StoreError::Unavailable`.
    #[cfg(test)]
    pub fn fail_next_reads(&self, n: usize) {
        self.faults.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Successfully applied patches, in order.
    #[cfg(test)]
    pub async fn applied_patches(&self) -> Vec<(String, SessionPatch)> {
        self.faults.patch_log.read().await.clone()
    }

    /// Insert a session as-is (tests and fixtures).
    #[cfg(test)]
    pub async fn insert(&self, session: LearningSession) {
        let mut s = self.inner.write().await;
        s.order.push(session.id.clone());
        s.by_id.insert(session.id.clone(), session);
    }

    #[cfg(test)]
    fn injected_read_failure(&self) -> Result<(), StoreError> {
        Faults::take(&self.faults.failing_reads)
    }

    #[cfg(not(test))]
    fn injected_read_failure(&self) -> Result<(), StoreError> {
        Ok(())
    }

    #[cfg(test)]
    fn injected_patch_failure(&self) -> Result<(), StoreError> {
        Faults::take(&self.faults.failing_patches)
    }

    #[cfg(not(test))]
    fn injected_patch_failure(&self) -> Result<(), StoreError> {
        Ok(())
    }

    #[cfg(test)]
    async fn log_patch(&self, session_id: &str, patch: SessionPatch) {
        self.faults.patch_log.write().await.push((session_id.to_string(), patch));
    }

    #[cfg(not(test))]
    async fn log_patch(&self, _session_id: &str, _patch: SessionPatch) {}
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    #[instrument(level = "debug", skip(self))]
    async fn get_latest_session(&self, user_id: &str, topic_id: &str) -> Result<Option<LearningSession>, StoreError> {
        self.injected_read_failure()?;
        let s = self.inner.read().await;
        let latest = s
            .order
            .iter()
            .rev()
            .filter_map(|id| s.by_id.get(id))
            .find(|sess| sess.user_id == user_id && sess.topic_id == topic_id)
            .cloned();
        Ok(latest)
    }

    #[instrument(level = "debug", skip(self))]
    async fn create_session(&self, user_id: &str, topic_id: &str, topic_version_id: &str) -> Result<LearningSession, StoreError> {
        let session = LearningSession::new(Uuid::new_v4().to_string(), user_id, topic_id, topic_version_id);
        let mut s = self.inner.write().await;
        s.order.push(session.id.clone());
        s.by_id.insert(session.id.clone(), session.clone());
        debug!(target: "sequencer", session_id = %session.id, "Session created (memory)");
        Ok(session)
    }

    #[instrument(level = "debug", skip(self, patch), fields(patch = patch.label()))]
    async fn patch_session(&self, session_id: &str, patch: SessionPatch) -> Result<LearningSession, StoreError> {
        self.injected_patch_failure()?;
        let updated = {
            let mut s = self.inner.write().await;
            let session = s
                .by_id
                .get_mut(session_id)
                .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;
            session.apply(&patch);
            session.clone()
        };
        self.log_patch(session_id, patch).await;
        Ok(updated)
    }

    #[instrument(level = "debug", skip(self))]
    async fn get_session_by_id(&self, session_id: &str) -> Result<Option<LearningSession>, StoreError> {
        self.injected_read_failure()?;
        Ok(self.inner.read().await.by_id.get(session_id).cloned())
    }

    #[instrument(level = "debug", skip(self))]
    async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        let mut s = self.inner.write().await;
        if s.by_id.remove(session_id).is_none() {
            return Err(StoreError::NotFound(session_id.to_string()));
        }
        s.order.retain(|id| id != session_id);
        Ok(())
    }
}

/// Topics keyed by slug, loaded once at startup.
#[derive(Clone, Default)]
pub struct InMemoryContentSource {
    by_slug: Arc<RwLock<HashMap<String, Topic>>>,
}

impl InMemoryContentSource {
    pub fn new(topics: impl IntoIterator<Item = Topic>) -> Self {
        let map = topics.into_iter().map(|t| (t.slug.clone(), t)).collect();
        Self { by_slug: Arc::new(RwLock::new(map)) }
    }

    /// Insert or replace a topic; replacing with a new version id invalidates older sessions.
    #[cfg(test)]
    pub async fn upsert(&self, topic: Topic) {
        self.by_slug.write().await.insert(topic.slug.clone(), topic);
    }
}

#[async_trait]
impl ContentSource for InMemoryContentSource {
    async fn get_topic_by_slug(&self, slug: &str) -> Result<Topic, SequencerError> {
        self.by_slug
            .read()
            .await
            .get(slug)
            .cloned()
            .ok_or_else(|| SequencerError::TopicNotFound(slug.to_string()))
    }
}
