//! Flow registry for type-erased flow lookup.
//!
//! The registry maps flow names to ready-to-run flow instances, type-erased
//! behind [`AnyFlow`] so the executor can drive any registered flow without
//! knowing its concrete types. Unlike a replay-rebuilt workflow, a flow is
//! stateless, so the registry stores the flow instance itself rather than a
//! factory that reconstructs one per invocation.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::flow::{Flow, FlowError, FlowRunContext};

use super::cancellation::CancellationHandle;

/// One flow invocation, fully type-erased to JSON.
pub struct ErasedFlowRun {
    pub stream: Pin<Box<dyn Stream<Item = Result<serde_json::Value, FlowError>> + Send>>,
    result: Box<dyn Fn() -> Option<serde_json::Value> + Send + Sync>,
}

impl ErasedFlowRun {
    /// The result set so far (valid to call any time, typically after the
    /// stream has been fully drained).
    pub fn result(&self) -> Option<serde_json::Value> {
        (self.result)()
    }
}

/// Type-erased flow interface.
#[async_trait]
pub trait AnyFlow: Send + Sync {
    /// The flow's registered name.
    fn name(&self) -> &'static str;

    /// Start the flow against an opaque JSON input, returning its erased
    /// element stream and a result accessor.
    async fn run(
        &self,
        input: serde_json::Value,
        cancellation: CancellationHandle,
    ) -> Result<ErasedFlowRun, FlowError>;
}

struct FlowWrapper<F: Flow> {
    inner: F,
}

#[async_trait]
impl<F: Flow> AnyFlow for FlowWrapper<F> {
    fn name(&self) -> &'static str {
        F::NAME
    }

    async fn run(
        &self,
        input: serde_json::Value,
        cancellation: CancellationHandle,
    ) -> Result<ErasedFlowRun, FlowError> {
        let typed_input: F::Input = serde_json::from_value(input)?;
        let context = FlowRunContext::<F::Result>::new(cancellation.flag());
        let result_context = context.clone();

        let stream = self.inner.run(typed_input, context).await;
        let erased = stream.map(|item| {
            item.and_then(|element| serde_json::to_value(element).map_err(FlowError::from))
        });

        Ok(ErasedFlowRun {
            stream: Box::pin(erased),
            result: Box::new(move || result_context.result_as_json()),
        })
    }
}

/// Registry of flows, keyed by name, read-only once the executor starts.
pub struct FlowRegistry {
    flows: HashMap<String, Arc<dyn AnyFlow>>,
}

impl Default for FlowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self {
            flows: HashMap::new(),
        }
    }

    /// Register a flow under its `Flow::NAME`.
    pub fn register<F: Flow>(&mut self, flow: F) {
        self.flows
            .insert(F::NAME.to_string(), Arc::new(FlowWrapper { inner: flow }));
    }

    /// True if a flow with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.flows.contains_key(name)
    }

    /// Look up a flow by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn AnyFlow>> {
        self.flows.get(name).cloned()
    }

    /// Number of registered flows.
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    /// True if no flows are registered.
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// All registered flow names.
    pub fn flow_names(&self) -> impl Iterator<Item = &str> {
        self.flows.keys().map(|s| s.as_str())
    }
}

impl fmt::Debug for FlowRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowRegistry")
            .field("flow_names", &self.flows.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct EchoInput {
        msg: String,
    }

    struct EchoFlow;

    #[async_trait]
    impl Flow for EchoFlow {
        const NAME: &'static str = "echo";
        type Input = EchoInput;
        type Element = String;
        type Result = String;

        async fn run(
            &self,
            input: Self::Input,
            context: FlowRunContext<Self::Result>,
        ) -> crate::flow::FlowElementStream<Self::Element> {
            context.set_result(format!("done: {}", input.msg));
            Box::pin(stream::iter(vec![Ok(input.msg)]))
        }
    }

    #[tokio::test]
    async fn register_and_run() {
        let mut registry = FlowRegistry::new();
        registry.register(EchoFlow);

        assert!(registry.contains("echo"));
        assert!(!registry.contains("missing"));

        let flow = registry.get("echo").expect("registered");
        let mut run = flow
            .run(serde_json::json!({"msg": "hi"}), CancellationHandle::new())
            .await
            .expect("should start");

        let elements: Vec<_> = run.stream.by_ref().collect().await;
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].as_ref().unwrap(), &serde_json::json!("hi"));
        assert_eq!(run.result(), Some(serde_json::json!("done: hi")));
    }

    #[tokio::test]
    async fn invalid_input_surfaces_as_flow_error() {
        let mut registry = FlowRegistry::new();
        registry.register(EchoFlow);

        let flow = registry.get("echo").unwrap();
        let result = flow
            .run(serde_json::json!({}), CancellationHandle::new())
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn registry_debug_lists_names() {
        let mut registry = FlowRegistry::new();
        registry.register(EchoFlow);
        let debug = format!("{:?}", registry);
        assert!(debug.contains("echo"));
    }

    #[test]
    fn flow_names_iterator() {
        let mut registry = FlowRegistry::new();
        registry.register(EchoFlow);
        let names: Vec<_> = registry.flow_names().collect();
        assert_eq!(names, vec!["echo"]);
    }
}
