//! Data types persisted by a [`super::FlowStore`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a flow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowRunStatus {
    /// Submitted, not yet picked up by a worker.
    Pending,
    /// A worker is currently driving this run's element stream.
    Running,
    /// Finished normally; `result` may be set.
    Completed,
    /// Finished with an error; `error_message` is set.
    Failed,
    /// Cancelled while running.
    Canceled,
}

impl FlowRunStatus {
    /// A status is terminal once no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

impl std::fmt::Display for FlowRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// A single submission: its identity, status, and payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRun {
    pub id: Uuid,
    pub flow_name: String,
    pub user_id: String,
    pub status: FlowRunStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub input: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

impl FlowRun {
    /// Construct a freshly submitted run in `Pending` status.
    pub fn new(flow_name: impl Into<String>, user_id: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            flow_name: flow_name.into(),
            user_id: user_id.into(),
            status: FlowRunStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            input,
            result: None,
            error_message: None,
        }
    }
}

/// One intermediate value emitted by a running flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowElement {
    pub id: Uuid,
    pub flow_run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub content: serde_json::Value,
}

impl FlowElement {
    pub fn new(flow_run_id: Uuid, content: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            flow_run_id,
            created_at: Utc::now(),
            content,
        }
    }
}

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Run not found.
    #[error("flow run not found: {0}")]
    RunNotFound(Uuid),

    /// Internal error (serialization, lock poisoning, etc).
    #[error("store internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_run_is_pending() {
        let run = FlowRun::new("echo", "user-1", serde_json::json!({"msg": "hi"}));
        assert_eq!(run.status, FlowRunStatus::Pending);
        assert!(run.completed_at.is_none());
        assert!(run.result.is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(FlowRunStatus::Completed.is_terminal());
        assert!(FlowRunStatus::Failed.is_terminal());
        assert!(FlowRunStatus::Canceled.is_terminal());
        assert!(!FlowRunStatus::Pending.is_terminal());
        assert!(!FlowRunStatus::Running.is_terminal());
    }

    #[test]
    fn status_display() {
        assert_eq!(FlowRunStatus::Running.to_string(), "running");
    }
}
