//! Action execution engine.
//!
//! This module runs validated actions against hosts: step executors,
//! the concurrent dispatcher and the result aggregator it reports through.

mod aggregator;
mod dispatcher;
mod step;

pub use aggregator::{HostError, HostRun, ResultAggregator, TaskResultBuilder};
pub use dispatcher::{
    CancelHandle, DEFAULT_MAX_CONCURRENCY, DispatchConfig, DispatchError, Dispatcher,
};
pub use step::{
    CommandExecutor, CommandFailurePolicy, CopyExecutor, StepExecutor, StepOutcome, executor_for,
};
