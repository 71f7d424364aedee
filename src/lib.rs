//! # Flow Execution Engine
//!
//! A durable-within-process, concurrency-limited execution engine for
//! long-running, multi-step flows that each stream intermediate elements and
//! an optional terminal result.
//!
//! ## Features
//!
//! - **Streaming runs**: a flow lazily produces elements as it goes; callers
//!   can poll the ordered element sequence without waiting for completion
//! - **Visibility-timeout requeue**: a stuck run's in-progress entry expires
//!   and is handed to a fresh worker without losing elements already persisted
//! - **Bounded concurrency**: a single dispatcher loop pops pending runs under
//!   a global semaphore, so bursty submission never exceeds `max_concurrent`
//! - **Cooperative cancellation**: a per-run `Arc<AtomicBool>` handle, signalled
//!   by `Cancel` and observed by the flow at its own suspension points
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      QueuedExecutor                          │
//! │  (dispatcher loop + per-run workers driving registered Flows)│
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              ┌───────────────┼────────────────┐
//!              ▼               ▼                ▼
//! ┌───────────────────┐ ┌─────────────┐ ┌───────────────────┐
//! │      FlowQueue      │ │ FlowStore   │ │   FlowRegistry     │
//! │ (pending FIFO +     │ │ (runs,      │ │ (name -> Flow      │
//! │  in-progress set,   │ │  elements,  │ │  lookup, read-only │
//! │  heartbeat timeout) │ │  results)   │ │  once started)     │
//! └───────────────────┘ └─────────────┘ └───────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use flowrun::prelude::*;
//!
//! struct EchoFlow;
//!
//! #[async_trait::async_trait]
//! impl Flow for EchoFlow {
//!     const NAME: &'static str = "echo";
//!     type Input = serde_json::Value;
//!     type Element = String;
//!     type Result = String;
//!
//!     async fn run(&self, input: Self::Input, context: FlowRunContext<Self::Result>) -> FlowElementStream<Self::Element> {
//!         context.set_result("done".to_string());
//!         Box::pin(futures::stream::iter(vec![Ok("hello".to_string())]))
//!     }
//! }
//!
//! # async fn example() {
//! let mut registry = FlowRegistry::new();
//! registry.register(EchoFlow);
//! let store = std::sync::Arc::new(InMemoryFlowStore::new());
//! let executor = QueuedExecutor::new(store, registry, ExecutorConfig::default());
//! executor.start().await;
//! let run_id = executor.submit("echo", serde_json::json!({}), "user-1").await.unwrap();
//! # }
//! ```

pub mod engine;
pub mod flow;
pub mod queue;
pub mod store;

/// Prelude for common imports
pub mod prelude {
    pub use crate::engine::{CancellationHandle, ExecutorConfig, ExecutorError, FlowRegistry, QueuedExecutor};
    pub use crate::flow::{Flow, FlowElementStream, FlowError, FlowRunContext};
    pub use crate::queue::FlowQueue;
    pub use crate::store::{FlowElement, FlowRun, FlowRunStatus, FlowStore, InMemoryFlowStore, StoreError};
}

// Re-export key types at crate root
pub use engine::{CancellationHandle, ExecutorConfig, ExecutorError, FlowRegistry, QueuedExecutor};
pub use flow::{Flow, FlowElementStream, FlowError, FlowRunContext};
pub use queue::FlowQueue;
pub use store::{FlowElement, FlowRun, FlowRunStatus, FlowStore, InMemoryFlowStore, StoreError};
