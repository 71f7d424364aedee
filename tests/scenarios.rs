//! End-to-end scenarios driven purely through the public executor contract,
//! exercising guarantees that span the queue, store, and dispatcher together
//! rather than any single module in isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flowrun::{
    ExecutorConfig, Flow, FlowElementStream, FlowRegistry, FlowRunContext, FlowRunStatus,
    InMemoryFlowStore, QueuedExecutor,
};
use futures::stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Initialize a `tracing` subscriber once per test binary so dispatcher and
/// worker events are visible with `cargo test -- --nocapture`. Safe to call
/// from every test; only the first call wins.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn wait_for_status(
    executor: &QueuedExecutor,
    id: Uuid,
    target: FlowRunStatus,
    timeout: Duration,
) -> FlowRunStatus {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let status = executor.get_status(id).await;
        if status == target || tokio::time::Instant::now() >= deadline {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// A flow that sleeps once for a long time without producing any elements in
/// between, so its heartbeat is never reset mid-stream. Counts how many times
/// it was actually driven, so a test can assert a requeue never double-runs
/// the same submission.
struct StuckFlow {
    sleep: Duration,
    invocations: Arc<AtomicUsize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Empty {}

#[async_trait]
impl Flow for StuckFlow {
    const NAME: &'static str = "stuck";
    type Input = Empty;
    type Element = String;
    type Result = String;

    async fn run(
        &self,
        _input: Self::Input,
        _context: FlowRunContext<Self::Result>,
    ) -> FlowElementStream<Self::Element> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let sleep = self.sleep;
        Box::pin(stream::once(async move {
            tokio::time::sleep(sleep).await;
            Ok("done".to_string())
        }))
    }
}

/// A run that outlives the visibility timeout is requeued while its original
/// worker is still driving it. The second dispatch sees `status = Running` at
/// its preflight check and exits without touching the flow, so the run
/// completes exactly once.
#[tokio::test]
async fn visibility_timeout_requeue_does_not_double_run() {
    init_tracing();
    let store = Arc::new(InMemoryFlowStore::new());
    let invocations = Arc::new(AtomicUsize::new(0));
    let mut registry = FlowRegistry::new();
    registry.register(StuckFlow {
        sleep: Duration::from_millis(1500),
        invocations: invocations.clone(),
    });

    let config = ExecutorConfig::default()
        .with_visibility_timeout_seconds(1)
        .with_dispatcher_idle_interval_ms(50);
    let executor = QueuedExecutor::new(store, registry, config);
    executor.start().await;

    let id = executor
        .submit("stuck", serde_json::json!({}), "user-1")
        .await
        .unwrap();

    wait_for_status(&executor, id, FlowRunStatus::Running, Duration::from_secs(1)).await;
    // Past the 1s visibility timeout, but before the flow's own 1.5s sleep
    // resolves: the dispatcher's RequeueExpired should have fired at least
    // once by now, yet the run is still only Running, never re-entered.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(executor.get_status(id).await, FlowRunStatus::Running);

    let status = wait_for_status(&executor, id, FlowRunStatus::Completed, Duration::from_secs(3)).await;
    assert_eq!(status, FlowRunStatus::Completed);
    assert_eq!(
        invocations.load(Ordering::SeqCst),
        1,
        "a requeued-but-still-running id must not be driven twice"
    );

    executor.stop().await;
}

/// Under a concurrency cap, runs still complete in the order they were
/// submitted once the cap admits them in FIFO order.
#[tokio::test]
async fn concurrency_cap_preserves_fifo_completion_order() {
    init_tracing();
    struct OrderedFlow {
        invocations: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Flow for OrderedFlow {
        const NAME: &'static str = "ordered";
        type Input = Empty;
        type Element = usize;
        type Result = ();

        async fn run(
            &self,
            _input: Self::Input,
            _context: FlowRunContext<Self::Result>,
        ) -> FlowElementStream<Self::Element> {
            let order = self.invocations.fetch_add(1, Ordering::SeqCst);
            Box::pin(stream::once(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(order)
            }))
        }
    }

    let store = Arc::new(InMemoryFlowStore::new());
    let invocations = Arc::new(AtomicUsize::new(0));
    let mut registry = FlowRegistry::new();
    registry.register(OrderedFlow {
        invocations: invocations.clone(),
    });
    let config = ExecutorConfig::default().with_max_concurrent(1);
    let executor = QueuedExecutor::new(store, registry, config);
    executor.start().await;

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(
            executor
                .submit("ordered", serde_json::json!({}), "user-1")
                .await
                .unwrap(),
        );
    }

    for id in &ids {
        wait_for_status(&executor, *id, FlowRunStatus::Completed, Duration::from_secs(3)).await;
    }

    for (expected_order, id) in ids.iter().enumerate() {
        let elements = executor.get_elements(*id).await.unwrap();
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].content, serde_json::json!(expected_order));
    }

    executor.stop().await;
}

/// A submission for an unregistered flow name must not leave any trace in
/// the store: no run appears for that user afterward.
#[tokio::test]
async fn unknown_flow_submission_leaves_no_run_behind() {
    let store = Arc::new(InMemoryFlowStore::new());
    let registry = FlowRegistry::new();
    let executor = QueuedExecutor::new(store, registry, ExecutorConfig::default());

    let err = executor
        .submit("missing", serde_json::json!({}), "user-1")
        .await
        .unwrap_err();
    assert!(matches!(err, flowrun::ExecutorError::UnknownFlow(_)));

    let runs = executor.list_runs_for_user("user-1", 10).await.unwrap();
    assert!(runs.is_empty());
}
