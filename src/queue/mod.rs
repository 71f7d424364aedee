//! Pending/in-progress queue with heartbeat-based visibility timeout.
//!
//! Unlike the store, [`FlowQueue`] holds no run payloads — only ids and
//! liveness timestamps. Its operations are total: popping from an empty
//! queue, resetting the heartbeat of an absent id, and so on are all no-ops
//! rather than errors.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

struct State {
    pending: VecDeque<Uuid>,
    in_progress: HashMap<Uuid, DateTime<Utc>>,
}

/// FIFO pending queue plus an in-progress set with per-entry heartbeats.
pub struct FlowQueue {
    state: Mutex<State>,
    visibility_timeout: Duration,
}

impl FlowQueue {
    /// Default visibility timeout: 30 seconds.
    pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                pending: VecDeque::new(),
                in_progress: HashMap::new(),
            }),
            visibility_timeout,
        }
    }

    /// Enqueue at the tail of the pending FIFO.
    pub fn push_pending(&self, id: Uuid) {
        self.state.lock().pending.push_back(id);
    }

    /// Atomically dequeue the head of pending and move it to in-progress with
    /// a fresh heartbeat. Returns `None` if pending is empty; on empty,
    /// in-progress is left untouched.
    pub fn pop_pending(&self) -> Option<Uuid> {
        let mut state = self.state.lock();
        let id = state.pending.pop_front()?;
        state.in_progress.insert(id, Utc::now());
        Some(id)
    }

    /// Insert directly into in-progress with a fresh heartbeat.
    pub fn push_in_progress(&self, id: Uuid) {
        self.state.lock().in_progress.insert(id, Utc::now());
    }

    /// Remove from in-progress. Idempotent: absent ids are a no-op.
    pub fn pop_in_progress(&self, id: Uuid) {
        self.state.lock().in_progress.remove(&id);
    }

    /// Refresh an in-progress entry's heartbeat. No-op if absent.
    pub fn reset_heartbeat(&self, id: Uuid) {
        let mut state = self.state.lock();
        if let Some(ts) = state.in_progress.get_mut(&id) {
            *ts = Utc::now();
        }
    }

    /// Move every in-progress entry whose heartbeat is older than the
    /// visibility timeout back to the tail of pending. Returns the ids that
    /// were requeued.
    pub fn requeue_expired(&self) -> Vec<Uuid> {
        let now = Utc::now();
        let mut state = self.state.lock();
        let timeout = self.visibility_timeout;
        let expired: Vec<Uuid> = state
            .in_progress
            .iter()
            .filter(|(_, last_heartbeat)| {
                now.signed_duration_since(**last_heartbeat)
                    .to_std()
                    .map(|age| age > timeout)
                    .unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            state.in_progress.remove(id);
            state.pending.push_back(*id);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "requeued expired in-progress entries");
        }
        expired
    }

    /// Number of ids currently pending dispatch.
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Number of ids currently believed to be in progress.
    pub fn in_progress_len(&self) -> usize {
        self.state.lock().in_progress.len()
    }
}

impl Default for FlowQueue {
    fn default() -> Self {
        Self::new(Self::DEFAULT_VISIBILITY_TIMEOUT)
    }
}
