//! In-memory [`FlowStore`] implementation. Not durable across restarts.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{FlowElement, FlowRun, FlowRunStatus, FlowStore, StoreError};

#[derive(Default)]
struct State {
    runs: HashMap<Uuid, FlowRun>,
    elements: HashMap<Uuid, Vec<FlowElement>>,
}

/// Reference [`FlowStore`] backed by in-process hash maps behind a
/// `parking_lot::RwLock`. Used by the default engine setup and by tests.
pub struct InMemoryFlowStore {
    state: RwLock<State>,
}

impl Default for InMemoryFlowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFlowStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    /// Total number of runs currently held, for tests and diagnostics.
    pub fn run_count(&self) -> usize {
        self.state.read().runs.len()
    }

    /// Remove all state. Test-only convenience.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.runs.clear();
        state.elements.clear();
    }
}

#[async_trait]
impl FlowStore for InMemoryFlowStore {
    async fn save_run(&self, run: FlowRun) -> Result<Uuid, StoreError> {
        let id = run.id;
        debug!(%id, flow_name = %run.flow_name, "saving new flow run");
        self.state.write().runs.insert(id, run);
        Ok(id)
    }

    async fn get_run(&self, id: Uuid) -> Result<FlowRun, StoreError> {
        self.state
            .read()
            .runs
            .get(&id)
            .cloned()
            .ok_or(StoreError::RunNotFound(id))
    }

    async fn list_runs_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<FlowRun>, StoreError> {
        let state = self.state.read();
        let mut runs: Vec<FlowRun> = state
            .runs
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs.truncate(limit);
        Ok(runs)
    }

    async fn update_run_status(&self, id: Uuid, status: FlowRunStatus) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let Some(run) = state.runs.get_mut(&id) else {
            warn!(%id, "update_run_status on missing run");
            return Ok(());
        };
        if run.status.is_terminal() {
            debug!(%id, current = %run.status, requested = %status, "ignoring transition out of terminal status");
            return Ok(());
        }
        run.status = status;
        if status.is_terminal() {
            run.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn update_run_completion_time(
        &self,
        id: Uuid,
        completed_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError> {
        if let Some(run) = self.state.write().runs.get_mut(&id) {
            run.completed_at = Some(completed_at);
        }
        Ok(())
    }

    async fn update_run_error_message(&self, id: Uuid, message: &str) -> Result<(), StoreError> {
        if let Some(run) = self.state.write().runs.get_mut(&id) {
            run.error_message = Some(message.to_string());
        }
        Ok(())
    }

    async fn save_element(&self, element: FlowElement) -> Result<Uuid, StoreError> {
        let id = element.id;
        self.state
            .write()
            .elements
            .entry(element.flow_run_id)
            .or_default()
            .push(element);
        Ok(id)
    }

    async fn get_elements(&self, run_id: Uuid) -> Result<Vec<FlowElement>, StoreError> {
        Ok(self
            .state
            .read()
            .elements
            .get(&run_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_result(&self, run_id: Uuid, result: serde_json::Value) -> Result<(), StoreError> {
        if let Some(run) = self.state.write().runs.get_mut(&run_id) {
            run.result = Some(result);
        }
        Ok(())
    }

    async fn get_result(&self, run_id: Uuid) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self
            .state
            .read()
            .runs
            .get(&run_id)
            .and_then(|r| r.result.clone()))
    }

    async fn count_runs_by_status(&self) -> Result<HashMap<FlowRunStatus, usize>, StoreError> {
        let mut counts = HashMap::new();
        for run in self.state.read().runs.values() {
            *counts.entry(run.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
