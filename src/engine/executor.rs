//! The queued executor: a background dispatcher plus per-run workers that
//! drive registered flows to completion under a global concurrency cap.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::queue::FlowQueue;
use crate::store::{FlowElement, FlowRun, FlowRunStatus, FlowStore, StoreError};

use super::cancellation::CancellationHandle;
use super::registry::FlowRegistry;

/// Tunable parameters for a [`QueuedExecutor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Upper bound on simultaneously running workers.
    pub max_concurrent: usize,
    /// Seconds an in-progress run may go without a heartbeat before it is
    /// requeued.
    pub visibility_timeout_seconds: u64,
    /// Dispatcher sleep between cycles when nothing was dispatched.
    pub dispatcher_idle_interval_ms: u64,
    /// Dispatcher sleep after an internal error, before retrying.
    pub dispatcher_error_backoff_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            visibility_timeout_seconds: 30,
            dispatcher_idle_interval_ms: 100,
            dispatcher_error_backoff_ms: 1000,
        }
    }
}

impl ExecutorConfig {
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_visibility_timeout_seconds(mut self, seconds: u64) -> Self {
        self.visibility_timeout_seconds = seconds;
        self
    }

    pub fn with_dispatcher_idle_interval_ms(mut self, ms: u64) -> Self {
        self.dispatcher_idle_interval_ms = ms;
        self
    }

    pub fn with_dispatcher_error_backoff_ms(mut self, ms: u64) -> Self {
        self.dispatcher_error_backoff_ms = ms;
        self
    }

    /// Overlay `FLOW_*` environment variables on top of the defaults.
    ///
    /// A variable that is set but fails to parse is logged at `warn` and the
    /// default for that field is kept rather than panicking.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.max_concurrent = env_override("FLOW_MAX_CONCURRENT", config.max_concurrent);
        config.visibility_timeout_seconds =
            env_override("FLOW_VISIBILITY_TIMEOUT_SECONDS", config.visibility_timeout_seconds);
        config.dispatcher_idle_interval_ms =
            env_override("FLOW_DISPATCHER_IDLE_INTERVAL_MS", config.dispatcher_idle_interval_ms);
        config.dispatcher_error_backoff_ms =
            env_override("FLOW_DISPATCHER_ERROR_BACKOFF_MS", config.dispatcher_error_backoff_ms);
        config
    }

    fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }
}

fn env_override<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "failed to parse environment override, using default");
            default
        }),
        Err(_) => default,
    }
}

/// Errors surfaced by [`QueuedExecutor`]'s public contract.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// `Submit` referenced a flow name that is not registered.
    #[error("unknown flow: {0}")]
    UnknownFlow(String),

    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

struct Inner {
    store: Arc<dyn FlowStore>,
    queue: FlowQueue,
    registry: FlowRegistry,
    config: ExecutorConfig,
    semaphore: Arc<Semaphore>,
    cancellations: DashMap<Uuid, CancellationHandle>,
    shutdown_tx: watch::Sender<bool>,
}

/// Background dispatcher and worker pool driving registered flows.
///
/// Construct with [`QueuedExecutor::new`], then call [`QueuedExecutor::start`]
/// to spawn the dispatcher loop. [`QueuedExecutor::stop`] cancels the
/// dispatcher and awaits its exit; in-flight workers are not force-cancelled.
pub struct QueuedExecutor {
    inner: Arc<Inner>,
    dispatcher: AsyncMutex<Option<JoinHandle<()>>>,
}

impl QueuedExecutor {
    pub fn new(store: Arc<dyn FlowStore>, registry: FlowRegistry, config: ExecutorConfig) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let inner = Inner {
            queue: FlowQueue::new(config.visibility_timeout()),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            cancellations: DashMap::new(),
            store,
            registry,
            config,
            shutdown_tx,
        };
        Self {
            inner: Arc::new(inner),
            dispatcher: AsyncMutex::new(None),
        }
    }

    /// Spawn the background dispatcher loop. Calling this more than once
    /// without an intervening `stop()` is a no-op.
    pub async fn start(&self) {
        let mut slot = self.dispatcher.lock().await;
        if slot.is_some() {
            return;
        }
        let inner = self.inner.clone();
        let shutdown_rx = inner.shutdown_tx.subscribe();
        *slot = Some(tokio::spawn(dispatcher_loop(inner, shutdown_rx)));
        info!("dispatcher started");
    }

    /// Submit a new run. Fails if `flow_name` is not registered.
    #[instrument(skip(self, input), fields(flow_name = %flow_name))]
    pub async fn submit(
        &self,
        flow_name: &str,
        input: serde_json::Value,
        user_id: &str,
    ) -> Result<Uuid, ExecutorError> {
        if !self.inner.registry.contains(flow_name) {
            return Err(ExecutorError::UnknownFlow(flow_name.to_string()));
        }
        let run = FlowRun::new(flow_name, user_id, input);
        let id = run.id;
        self.inner.store.save_run(run).await?;
        self.inner.queue.push_pending(id);
        debug!(%id, "run submitted");
        Ok(id)
    }

    /// Current status of a run. Unknown ids are reported as `Pending` so
    /// callers that poll immediately after `submit` never observe a
    /// not-found error for a run that genuinely exists.
    pub async fn get_status(&self, run_id: Uuid) -> FlowRunStatus {
        match self.inner.store.get_run(run_id).await {
            Ok(run) => run.status,
            Err(StoreError::RunNotFound(_)) => FlowRunStatus::Pending,
            Err(_) => FlowRunStatus::Pending,
        }
    }

    /// Full run record.
    pub async fn get_run(&self, run_id: Uuid) -> Result<FlowRun, ExecutorError> {
        Ok(self.inner.store.get_run(run_id).await?)
    }

    /// All elements emitted so far, in order.
    pub async fn get_elements(&self, run_id: Uuid) -> Result<Vec<FlowElement>, ExecutorError> {
        Ok(self.inner.store.get_elements(run_id).await?)
    }

    /// Terminal result, if the run completed and set one.
    pub async fn get_result(&self, run_id: Uuid) -> Result<Option<serde_json::Value>, ExecutorError> {
        Ok(self.inner.store.get_result(run_id).await?)
    }

    /// Most recent runs submitted by a user.
    pub async fn list_runs_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<FlowRun>, ExecutorError> {
        Ok(self.inner.store.list_runs_for_user(user_id, limit).await?)
    }

    /// Names of all registered flows.
    pub fn registered_flow_names(&self) -> Vec<String> {
        self.inner.registry.flow_names().map(str::to_string).collect()
    }

    /// Request cancellation of a run. Returns `true` only if a worker was
    /// actively driving this run at the time of the call; cancelling a
    /// `Pending` (not yet dispatched) or already-terminal run returns `false`.
    #[instrument(skip(self))]
    pub async fn cancel(&self, run_id: Uuid) -> bool {
        let Some(handle) = self.inner.cancellations.get(&run_id).map(|h| h.value().clone()) else {
            return false;
        };
        handle.cancel();
        if let Err(err) = self.inner.store.update_run_status(run_id, FlowRunStatus::Canceled).await {
            warn!(%run_id, %err, "failed to persist cancellation");
        }
        info!(%run_id, "cancellation requested");
        true
    }

    /// Stop the dispatcher and await its exit. In-flight workers are left to
    /// run to completion.
    pub async fn stop(&self) {
        let _ = self.inner.shutdown_tx.send(true);
        let mut slot = self.dispatcher.lock().await;
        if let Some(handle) = slot.take() {
            let _ = handle.await;
        }
        info!("dispatcher stopped");
    }
}

#[instrument(skip(inner, shutdown_rx))]
async fn dispatcher_loop(inner: Arc<Inner>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        let sleep_ms = match dispatch_one_cycle(&inner).await {
            Ok(()) => inner.config.dispatcher_idle_interval_ms,
            Err(err) => {
                error!(error = format!("{err:#}"), "dispatcher cycle failed");
                inner.config.dispatcher_error_backoff_ms
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return;
                }
            }
        }
    }
}

/// Runs one dispatcher cycle. Returns `anyhow::Error` rather than a typed
/// error: this is the loop-catch boundary, so callers only need to log and
/// back off, not match on a specific failure kind.
async fn dispatch_one_cycle(inner: &Arc<Inner>) -> anyhow::Result<()> {
    let requeued = inner.queue.requeue_expired();
    if !requeued.is_empty() {
        info!(count = requeued.len(), "requeued stalled runs");
    }

    if inner.semaphore.available_permits() == 0 {
        return Ok(());
    }

    if let Some(run_id) = inner.queue.pop_pending() {
        let inner = inner.clone();
        tokio::spawn(async move {
            run_worker(inner, run_id).await;
        });
    }

    Ok(())
}

#[instrument(skip(inner))]
async fn run_worker(inner: Arc<Inner>, run_id: Uuid) {
    let Ok(permit) = inner.semaphore.clone().acquire_owned().await else {
        return;
    };

    let run = match inner.store.get_run(run_id).await {
        Ok(run) => run,
        Err(_) => {
            warn!(%run_id, "worker could not load run, dropping");
            inner.queue.pop_in_progress(run_id);
            return;
        }
    };

    if run.status != FlowRunStatus::Pending {
        debug!(%run_id, status = %run.status, "skipping run not in pending state");
        return;
    }

    let Some(flow) = inner.registry.get(&run.flow_name) else {
        error!(%run_id, flow_name = %run.flow_name, "flow not found at dispatch time");
        let _ = inner
            .store
            .update_run_error_message(run_id, &format!("Flow type '{}' not found", run.flow_name))
            .await;
        let _ = inner.store.update_run_status(run_id, FlowRunStatus::Failed).await;
        inner.queue.pop_in_progress(run_id);
        return;
    };

    let cancellation = CancellationHandle::new();
    inner.cancellations.insert(run_id, cancellation.clone());
    inner.queue.reset_heartbeat(run_id);

    let _ = inner.store.update_run_status(run_id, FlowRunStatus::Running).await;
    info!(%run_id, flow_name = %run.flow_name, "run started");

    let outcome = drive_flow(&inner, run_id, flow, run.input, &cancellation).await;

    match outcome {
        DriveOutcome::Completed { result } => {
            if let Some(result) = result {
                let _ = inner.store.save_result(run_id, result).await;
            }
            let _ = inner.store.update_run_status(run_id, FlowRunStatus::Completed).await;
            info!(%run_id, "run completed");
        }
        DriveOutcome::Cancelled => {
            let _ = inner.store.update_run_status(run_id, FlowRunStatus::Canceled).await;
            info!(%run_id, "run cancelled");
        }
        DriveOutcome::Failed { message } => {
            let _ = inner.store.update_run_error_message(run_id, &message).await;
            let _ = inner.store.update_run_status(run_id, FlowRunStatus::Failed).await;
            warn!(%run_id, error = %message, "run failed");
        }
    }

    inner.queue.pop_in_progress(run_id);
    inner.cancellations.remove(&run_id);
    drop(permit);
}

enum DriveOutcome {
    Completed { result: Option<serde_json::Value> },
    Cancelled,
    Failed { message: String },
}

async fn drive_flow(
    inner: &Arc<Inner>,
    run_id: Uuid,
    flow: Arc<dyn super::registry::AnyFlow>,
    input: serde_json::Value,
    cancellation: &CancellationHandle,
) -> DriveOutcome {
    let mut erased = match flow.run(input, cancellation.clone()).await {
        Ok(erased) => erased,
        Err(err) => return DriveOutcome::Failed { message: err.to_string() },
    };

    loop {
        if cancellation.is_cancelled() {
            return DriveOutcome::Cancelled;
        }

        match erased.stream.next().await {
            Some(Ok(content)) => {
                let _ = inner.store.save_element(FlowElement::new(run_id, content)).await;
                inner.queue.reset_heartbeat(run_id);
            }
            Some(Err(err)) => return DriveOutcome::Failed { message: err.to_string() },
            None => break,
        }
    }

    DriveOutcome::Completed { result: erased.result() }
}
