//! The [`Flow`] trait: a stateless, named procedure that streams elements and
//! optionally sets one terminal result.

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A lazy sequence of fallible elements produced by a running flow.
pub type FlowElementStream<E> = Pin<Box<dyn Stream<Item = Result<E, FlowError>> + Send>>;

/// A user-registered, named procedure.
///
/// A flow consumes a typed input, lazily produces a stream of intermediate
/// elements, and may set one terminal result through the [`FlowRunContext`]
/// it is handed. Flows are stateless: the engine never reconstructs one from
/// a serialized input after the fact, it simply calls `run` once per
/// submission.
#[async_trait]
pub trait Flow: Send + Sync + 'static {
    /// Unique name this flow is registered under.
    const NAME: &'static str;

    /// Input payload type.
    type Input: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Element type streamed while the flow runs.
    type Element: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Terminal result type, set at most once via `context.set_result`.
    type Result: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Drive the flow to completion, yielding elements as they are produced.
    ///
    /// Implementations should check `context.is_cancelled()` (or await
    /// `context.cancelled()`) between suspension points so cancellation takes
    /// effect promptly.
    async fn run(
        &self,
        input: Self::Input,
        context: FlowRunContext<Self::Result>,
    ) -> FlowElementStream<Self::Element>;
}

/// Handle passed to a running flow: lets it set a terminal result and
/// observe cancellation requests.
///
/// Cancellation is a shared `Arc<AtomicBool>` flipped by the executor when a
/// caller requests `Cancel`. Flows observe it cooperatively; there is no way
/// to force-stop a non-cooperative flow.
pub struct FlowRunContext<R> {
    result: Arc<Mutex<Option<R>>>,
    cancelled: Arc<AtomicBool>,
}

impl<R> FlowRunContext<R> {
    pub(crate) fn new(cancelled: Arc<AtomicBool>) -> Self {
        Self {
            result: Arc::new(Mutex::new(None)),
            cancelled,
        }
    }

    /// Set the terminal result. Last write wins if called more than once.
    pub fn set_result(&self, value: R) {
        *self.result.lock() = Some(value);
    }

    /// Returns true if cancellation has been requested for this run.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once cancellation has been requested for this run.
    ///
    /// Polls on a short interval rather than using a notify primitive,
    /// matching the rest of this engine's cooperative-cancellation idiom.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub(crate) fn take_result(self) -> Option<R> {
        self.result.lock().take()
    }
}

impl<R: Serialize> FlowRunContext<R> {
    /// Serialize the result set so far, without consuming the context.
    pub(crate) fn result_as_json(&self) -> Option<serde_json::Value> {
        self.result
            .lock()
            .as_ref()
            .map(|r| serde_json::to_value(r).unwrap_or(serde_json::Value::Null))
    }
}

impl<R> Clone for FlowRunContext<R> {
    fn clone(&self) -> Self {
        Self {
            result: self.result.clone(),
            cancelled: self.cancelled.clone(),
        }
    }
}

/// Error produced by a flow while it runs.
#[derive(Debug, Clone)]
pub struct FlowError {
    pub message: String,
}

impl FlowError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for FlowError {}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}
