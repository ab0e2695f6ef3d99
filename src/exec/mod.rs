// src/exec/mod.rs

//! Task execution layer.
//!
//! - [`task`] defines tasks, operations, retry policies and per-task results.
//! - [`infer`] holds the parallelizable heuristic for tasks that leave it unset.
//! - [`bounded`] provides the `BoundedExecutor` concurrency seam and its
//!   semaphore-backed default.
//! - [`rate`] provides the optional `RateGate` pacing seam.
//! - [`events`] defines `TaskEvent` and best-effort delivery to subscribers.
//! - [`runner`] owns the per-task attempt loop (cancel, rate gate, timeout,
//!   retry with linear backoff).
//! - [`executor`] orchestrates whole batches phase by phase.
//! - [`command`] builds shell-command task bodies.

pub mod bounded;
pub mod command;
pub mod events;
pub mod executor;
pub mod infer;
pub mod rate;
pub mod runner;
pub mod task;

pub use bounded::{BoundedExecutor, SemaphoreExecutor, Slot};
pub use events::{ChannelSink, EventBus, EventSink, FnSink, TaskEvent, TracingSink};
pub use executor::{
    BatchResult, DEFAULT_GROUP, DEFAULT_TIMEOUT, ExecutorConfig, ExecutorStats, ParallelExecutor,
    partition_by_group,
};
pub use rate::{RateGate, RateLimit, WindowRateGate};
pub use runner::{ExecutionContext, TaskRunner};
pub use task::{
    BoxFuture, Operation, RetryPolicy, Task, TaskId, TaskResult, TaskStatus, operation,
};
