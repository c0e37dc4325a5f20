//! Background reconciliation of the local cursor with the session store.
//!
//! The in-memory cursor is authoritative. Each run owns one `SyncHandle`; writes are
//! queued and applied by a single worker in issue order, so the stored cursor always
//! converges to the last value the user reached. Pending cursor writes coalesce,
//! failures retry with exponential backoff plus jitter, and writes that exhaust their
//! attempts are carried: replayed ahead of the next batch, or in the background after
//! a backoff if the learner stays idle. `SyncStatus` is the non-blocking "unsynced"
//! indicator shown to clients.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, instrument, warn};

use crate::domain::SessionPatch;
use crate::store::SessionStore;

#[derive(Clone, Debug, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// How long shutdown waits for carried writes to land.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_max_attempts() -> u32 { 5 }
fn default_base_delay_ms() -> u64 { 200 }
fn default_max_delay_ms() -> u64 { 5_000 }
fn default_shutdown_grace_ms() -> u64 { 5_000 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl SyncConfig {
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_delay_ms.saturating_mul(1u64 << attempt.min(16));
        let capped = exp.min(self.max_delay_ms);
        let jitter = if self.base_delay_ms > 1 {
            rand::thread_rng().gen_range(0..self.base_delay_ms / 2 + 1)
        } else {
            0
        };
        Duration::from_millis(capped + jitter)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Writes queued or in flight.
    pub pending: usize,
    /// The store is known to lag the local state.
    pub unsynced: bool,
    pub last_error: Option<String>,
    /// Writes that exhausted their attempts and wait for a background replay.
    pub carried: usize,
    /// Last cursor value the store acknowledged.
    pub synced_page: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SyncOp {
    Cursor(usize),
    Complete,
}

impl SyncOp {
    fn patch(self) -> SessionPatch {
        match self {
            SyncOp::Cursor(p) => SessionPatch::CurrentPage(p),
            SyncOp::Complete => SessionPatch::Completed(true),
        }
    }
}

#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::UnboundedSender<SyncOp>,
    status: Arc<watch::Sender<SyncStatus>>,
}

impl SyncHandle {
    pub fn spawn(store: Arc<dyn SessionStore>, session_id: String, cfg: SyncConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = Arc::new(watch::Sender::new(SyncStatus::default()));
        let worker = Worker { store, session_id, cfg, status: status.clone(), carry: Vec::new(), replays: 0 };
        tokio::spawn(worker.run(rx));
        Self { tx, status }
    }

    pub fn push_cursor(&self, page: usize) {
        self.push(SyncOp::Cursor(page));
    }

    pub fn push_completed(&self) {
        self.push(SyncOp::Complete);
    }

    fn push(&self, op: SyncOp) {
        self.status.send_modify(|s| s.pending += 1);
        if self.tx.send(op).is_err() {
            // worker gone; nothing will drain this op
            self.status.send_modify(|s| {
                s.pending = s.pending.saturating_sub(1);
                s.unsynced = true;
                s.last_error = Some("sync worker stopped".into());
            });
        }
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Wait until every queued write has either landed or exhausted its retries.
    pub async fn flushed(&self) -> SyncStatus {
        let mut rx = self.status.subscribe();
        let out = match rx.wait_for(|s| s.pending == 0).await {
            Ok(s) => s.clone(),
            Err(_) => self.status(),
        };
        out
    }

    /// Wait until nothing is queued or carried, or `deadline` passes.
    pub async fn drained(&self, deadline: Duration) -> SyncStatus {
        let mut rx = self.status.subscribe();
        let settled = tokio::time::timeout(deadline, rx.wait_for(|s| s.pending == 0 && s.carried == 0)).await;
        let out = match settled {
            Ok(Ok(s)) => s.clone(),
            _ => self.status(),
        };
        out
    }

    /// Nothing queued, in flight or carried.
    pub fn is_idle(&self) -> bool {
        let s = self.status.borrow();
        s.pending == 0 && s.carried == 0
    }
}

struct Worker {
    store: Arc<dyn SessionStore>,
    session_id: String,
    cfg: SyncConfig,
    status: Arc<watch::Sender<SyncStatus>>,
    // ops that exhausted their retries, replayed ahead of the next batch
    carry: Vec<SyncOp>,
    // background replays since the carry was last empty
    replays: u32,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SyncOp>) {
        loop {
            let next = if self.carry.is_empty() {
                rx.recv().await
            } else {
                tokio::select! {
                    op = rx.recv() => op,
                    _ = tokio::time::sleep(self.cfg.backoff(self.replays)) => {
                        self.replays = self.replays.saturating_add(1);
                        debug!(target: "sync", session_id = %self.session_id, carried = self.carry.len(), replay = self.replays, "Replaying carried writes");
                        self.process(Vec::new()).await;
                        continue;
                    }
                }
            };
            let Some(first) = next else { break };
            let mut batch = vec![first];
            while let Ok(op) = rx.try_recv() {
                batch.push(op);
            }
            self.process(batch).await;
        }
        if !self.carry.is_empty() {
            // handle dropped; one last attempt before the task ends
            self.process(Vec::new()).await;
            if !self.carry.is_empty() {
                warn!(target: "sync", session_id = %self.session_id, carried = self.carry.len(), "Sync worker stopped with unsynced writes");
            }
        }
        debug!(target: "sync", session_id = %self.session_id, "Sync worker stopped");
    }

    async fn process(&mut self, batch: Vec<SyncOp>) {
        let received = batch.len();
        let mut ops = std::mem::take(&mut self.carry);
        ops.extend(batch);
        let ops = coalesce(ops);
        debug!(target: "sync", session_id = %self.session_id, received, sending = ops.len(), "Sync batch");

        for op in ops {
            if !self.send(op).await {
                self.carry.push(op);
            }
        }
        if self.carry.is_empty() {
            self.replays = 0;
        }
        let carried = self.carry.len();
        self.status.send_modify(|s| {
            s.pending = s.pending.saturating_sub(received);
            s.carried = carried;
            if carried == 0 {
                s.unsynced = false;
            }
        });
    }

    #[instrument(level = "debug", skip(self), fields(session_id = %self.session_id))]
    async fn send(&self, op: SyncOp) -> bool {
        for attempt in 0..self.cfg.max_attempts {
            match self.store.patch_session(&self.session_id, op.patch()).await {
                Ok(_) => {
                    self.status.send_modify(|s| {
                        if let SyncOp::Cursor(p) = op {
                            s.synced_page = Some(p);
                        }
                        s.last_error = None;
                    });
                    return true;
                }
                Err(e) => {
                    warn!(target: "sync", session_id = %self.session_id, ?op, attempt, error = %e, "Session write failed");
                    self.status.send_modify(|s| {
                        s.unsynced = true;
                        s.last_error = Some(e.to_string());
                    });
                    if attempt + 1 < self.cfg.max_attempts {
                        tokio::time::sleep(self.cfg.backoff(attempt)).await;
                    }
                }
            }
        }
        error!(target: "sync", session_id = %self.session_id, ?op, "Write still failing; carrying it");
        false
    }
}

/// Keep only the newest cursor write, followed by a completion if one was requested.
fn coalesce(ops: Vec<SyncOp>) -> Vec<SyncOp> {
    let cursor = ops.iter().rev().find_map(|op| match op {
        SyncOp::Cursor(p) => Some(*p),
        SyncOp::Complete => None,
    });
    let complete = ops.contains(&SyncOp::Complete);
    let mut out = Vec::with_capacity(2);
    if let Some(p) = cursor {
        out.push(SyncOp::Cursor(p));
    }
    if complete {
        out.push(SyncOp::Complete);
    }
    out
}
