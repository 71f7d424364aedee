//! Persistence layer: run records, ordered elements, and results.
//!
//! This module provides:
//! - [`FlowStore`] trait for run/element/result persistence
//! - [`InMemoryFlowStore`] for the reference (in-process, non-durable) implementation

mod memory;
mod types;

pub use memory::InMemoryFlowStore;
pub use types::{FlowElement, FlowRun, FlowRunStatus, StoreError};

use async_trait::async_trait;
use uuid::Uuid;

/// Store for flow run metadata, elements, and results.
///
/// Implementations must be thread-safe and support concurrent access from the
/// dispatcher, workers, and external readers at once.
#[async_trait]
pub trait FlowStore: Send + Sync + 'static {
    // =========================================================================
    // Run operations
    // =========================================================================

    /// Persist a newly submitted run. `run.id` must be unique.
    async fn save_run(&self, run: FlowRun) -> Result<Uuid, StoreError>;

    /// Fetch a run record by id.
    async fn get_run(&self, id: Uuid) -> Result<FlowRun, StoreError>;

    /// List the most recent runs for a user, newest first.
    async fn list_runs_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<FlowRun>, StoreError>;

    /// Transition a run's status. Idempotent: transitions away from a
    /// terminal status are silently ignored. Setting a terminal status also
    /// sets `completed_at`.
    async fn update_run_status(&self, id: Uuid, status: FlowRunStatus) -> Result<(), StoreError>;

    /// Set `completed_at` explicitly.
    async fn update_run_completion_time(
        &self,
        id: Uuid,
        completed_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError>;

    /// Set `error_message` on a run.
    async fn update_run_error_message(&self, id: Uuid, message: &str) -> Result<(), StoreError>;

    // =========================================================================
    // Element operations
    // =========================================================================

    /// Append an element to a run's ordered element sequence.
    async fn save_element(&self, element: FlowElement) -> Result<Uuid, StoreError>;

    /// Fetch all elements for a run, ordered by creation time ascending.
    async fn get_elements(&self, run_id: Uuid) -> Result<Vec<FlowElement>, StoreError>;

    // =========================================================================
    // Result operations
    // =========================================================================

    /// Record the terminal result payload for a run.
    async fn save_result(&self, run_id: Uuid, result: serde_json::Value) -> Result<(), StoreError>;

    /// Fetch the terminal result payload for a run, if any.
    async fn get_result(&self, run_id: Uuid) -> Result<Option<serde_json::Value>, StoreError>;

    // =========================================================================
    // Diagnostics (optional, default no-op)
    // =========================================================================

    /// Count runs grouped by status. Ambient operator-visibility accessor;
    /// implementations that cannot do this cheaply may return an empty map.
    async fn count_runs_by_status(&self) -> Result<std::collections::HashMap<FlowRunStatus, usize>, StoreError> {
        Ok(std::collections::HashMap::new())
    }
}
