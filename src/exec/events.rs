// src/exec/events.rs

//! Structured task/batch events and best-effort delivery to subscribers.
//!
//! Delivery never affects execution: a sink that returns an error or panics
//! is logged and skipped.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::TaskError;

use super::task::TaskId;

/// Events emitted while a batch runs.
///
/// Per task: `TaskStart`, then zero or more `TaskRetry`, then exactly one of
/// `TaskComplete` / `TaskError` / `TaskCancelled`. `TaskCancelled` is emitted
/// when cancellation lands between attempts and carries the last attempt's
/// error. A task cancelled before its first attempt emits nothing. `BatchStart` precedes everything of a batch and
/// `BatchComplete` follows everything.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    BatchStart {
        batch_id: String,
        task_count: usize,
        phase_count: usize,
    },
    TaskStart {
        batch_id: String,
        task_id: TaskId,
    },
    TaskRetry {
        batch_id: String,
        task_id: TaskId,
        attempt: u32,
        delay: Duration,
        error: TaskError,
    },
    TaskComplete {
        batch_id: String,
        task_id: TaskId,
        attempts: u32,
        duration: Duration,
    },
    TaskError {
        batch_id: String,
        task_id: TaskId,
        attempts: u32,
        error: TaskError,
    },
    TaskCancelled {
        batch_id: String,
        task_id: TaskId,
        attempts: u32,
        last_error: Option<TaskError>,
    },
    BatchComplete {
        batch_id: String,
        success_count: usize,
        failure_count: usize,
        duration: Duration,
    },
}

impl TaskEvent {
    /// Dotted event name (`task.start`, `batch.complete`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::BatchStart { .. } => "batch.start",
            TaskEvent::TaskStart { .. } => "task.start",
            TaskEvent::TaskRetry { .. } => "task.retry",
            TaskEvent::TaskComplete { .. } => "task.complete",
            TaskEvent::TaskError { .. } => "task.error",
            TaskEvent::TaskCancelled { .. } => "task.cancelled",
            TaskEvent::BatchComplete { .. } => "batch.complete",
        }
    }

    /// Task the event is about, if it is a task-level event.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            TaskEvent::TaskStart { task_id, .. }
            | TaskEvent::TaskRetry { task_id, .. }
            | TaskEvent::TaskComplete { task_id, .. }
            | TaskEvent::TaskError { task_id, .. }
            | TaskEvent::TaskCancelled { task_id, .. } => Some(task_id),
            TaskEvent::BatchStart { .. } | TaskEvent::BatchComplete { .. } => None,
        }
    }

    pub fn batch_id(&self) -> &str {
        match self {
            TaskEvent::BatchStart { batch_id, .. }
            | TaskEvent::TaskStart { batch_id, .. }
            | TaskEvent::TaskRetry { batch_id, .. }
            | TaskEvent::TaskComplete { batch_id, .. }
            | TaskEvent::TaskError { batch_id, .. }
            | TaskEvent::TaskCancelled { batch_id, .. }
            | TaskEvent::BatchComplete { batch_id, .. } => batch_id,
        }
    }
}

/// Receives task events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &TaskEvent) -> anyhow::Result<()>;
}

/// Adapts a closure into an [`EventSink`].
pub struct FnSink<F>(F);

impl<F> FnSink<F>
where
    F: Fn(&TaskEvent) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventSink for FnSink<F>
where
    F: Fn(&TaskEvent) + Send + Sync,
{
    fn emit(&self, event: &TaskEvent) -> anyhow::Result<()> {
        (self.0)(event);
        Ok(())
    }
}

/// Forwards events into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<TaskEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<TaskEvent>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &TaskEvent) -> anyhow::Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| anyhow!("event receiver dropped"))
    }
}

/// Writes events to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &TaskEvent) -> anyhow::Result<()> {
        match event {
            TaskEvent::BatchStart {
                batch_id,
                task_count,
                phase_count,
            } => info!(%batch_id, task_count, phase_count, "batch started"),
            TaskEvent::TaskStart { task_id, .. } => info!(task = %task_id, "task started"),
            TaskEvent::TaskRetry {
                task_id,
                attempt,
                delay,
                error,
                ..
            } => warn!(task = %task_id, attempt, ?delay, %error, "task attempt failed; retrying"),
            TaskEvent::TaskComplete {
                task_id,
                attempts,
                duration,
                ..
            } => info!(task = %task_id, attempts, ?duration, "task completed"),
            TaskEvent::TaskError {
                task_id,
                attempts,
                error,
                ..
            } => warn!(task = %task_id, attempts, %error, "task failed"),
            TaskEvent::TaskCancelled {
                task_id,
                attempts,
                last_error,
                ..
            } => info!(task = %task_id, attempts, ?last_error, "task cancelled between attempts"),
            TaskEvent::BatchComplete {
                batch_id,
                success_count,
                failure_count,
                duration,
            } => info!(%batch_id, success_count, failure_count, ?duration, "batch finished"),
        }
        Ok(())
    }
}

/// Observer list with best-effort, failure-isolated delivery.
#[derive(Clone, Default)]
pub struct EventBus {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn emit(&self, event: TaskEvent) {
        for sink in &self.sinks {
            match catch_unwind(AssertUnwindSafe(|| sink.emit(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    debug!(event = event.name(), error = %err, "event sink returned an error; ignoring");
                }
                Err(_) => {
                    warn!(event = event.name(), "event sink panicked; ignoring");
                }
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
