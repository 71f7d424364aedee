//! Flow execution engine: registry, cancellation, and the queued executor.

mod cancellation;
mod executor;
mod registry;

pub use cancellation::CancellationHandle;
pub use executor::{ExecutorConfig, ExecutorError, QueuedExecutor};
pub use registry::{AnyFlow, ErasedFlowRun, FlowRegistry};
