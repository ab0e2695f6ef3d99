// src/exec/runner.rs

//! Per-task execution loop.
//!
//! State machine: `pending -> running -> completed | failed | cancelled`.
//! Each attempt:
//! 1. bail out as `cancelled` if the batch has been cancelled
//! 2. wait for the rate gate, if any
//! 3. race the operation against the effective timeout
//! 4. on success, finish `completed`
//! 5. on failure, sleep `backoff_base * attempt` and retry if the policy
//!    allows it, otherwise finish `failed`
//!
//! A task cancelled between attempts emits `TaskCancelled` as its terminal
//! event.
//!
//! Each attempt runs in its own tokio task. On timeout that task is aborted,
//! which only takes effect at the operation's next `.await`; anything the
//! operation spawned by itself keeps running. Timeouts do not reclaim
//! resources beyond that.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinError;
use tracing::{debug, warn};

use crate::errors::TaskError;

use super::bounded::BoundedExecutor;
use super::events::{EventBus, TaskEvent};
use super::rate::RateGate;
use super::task::{Operation, Task, TaskResult};

/// Everything a task run needs from its batch, passed explicitly.
#[derive(Clone)]
pub struct ExecutionContext {
    pub batch_id: String,
    pub cancelled: Arc<AtomicBool>,
    pub events: Arc<EventBus>,
    pub bounded: Arc<dyn BoundedExecutor>,
    pub rate_gate: Option<Arc<dyn RateGate>>,
    pub default_timeout: Option<Duration>,
}

impl ExecutionContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("batch_id", &self.batch_id)
            .field("cancelled", &self.is_cancelled())
            .field("events", &self.events)
            .field("rate_gated", &self.rate_gate.is_some())
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

/// Runs single tasks under an [`ExecutionContext`].
#[derive(Debug, Clone)]
pub struct TaskRunner {
    ctx: ExecutionContext,
}

impl TaskRunner {
    pub fn new(ctx: ExecutionContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// Run `task` to a terminal state inside one bounded-executor slot.
    ///
    /// The slot is held across retries and backoff sleeps. If the bounded
    /// executor has been shut down the task ends `cancelled` without running.
    pub async fn run<T: Send + 'static>(&self, task: Task<T>) -> TaskResult<T> {
        let slot = match self.ctx.bounded.acquire().await {
            Ok(slot) => slot,
            Err(err) => {
                debug!(task = %task.id, error = %err, "no executor slot; marking cancelled");
                return TaskResult::not_started(task.id);
            }
        };

        let result = self.attempt_loop(task).await;
        drop(slot);
        result
    }

    async fn attempt_loop<T: Send + 'static>(&self, task: Task<T>) -> TaskResult<T> {
        let ctx = &self.ctx;
        let policy = task.retry.clone().unwrap_or_default();
        let timeout = task.timeout.or(ctx.default_timeout);

        let mut started_at: Option<DateTime<Utc>> = None;
        let mut attempts: u32 = 0;
        let mut last_error: Option<TaskError> = None;

        loop {
            if ctx.is_cancelled() {
                debug!(task = %task.id, attempts, "batch cancelled; not starting attempt");
                if attempts > 0 {
                    ctx.events.emit(TaskEvent::TaskCancelled {
                        batch_id: ctx.batch_id.clone(),
                        task_id: task.id.clone(),
                        attempts,
                        last_error,
                    });
                }
                return TaskResult::cancelled(
                    task.id,
                    attempts,
                    started_at.unwrap_or_else(Utc::now),
                );
            }

            if let Some(gate) = &ctx.rate_gate {
                gate.acquire().await;
            }

            attempts += 1;
            let started = *started_at.get_or_insert_with(Utc::now);
            if attempts == 1 {
                ctx.events.emit(TaskEvent::TaskStart {
                    batch_id: ctx.batch_id.clone(),
                    task_id: task.id.clone(),
                });
            }
            debug!(task = %task.id, attempt = attempts, ?timeout, "running attempt");

            match run_attempt(&task.operation, timeout).await {
                Ok(value) => {
                    let result = TaskResult::completed(task.id, value, attempts, started);
                    ctx.events.emit(TaskEvent::TaskComplete {
                        batch_id: ctx.batch_id.clone(),
                        task_id: result.task_id.clone(),
                        attempts,
                        duration: result.duration,
                    });
                    return result;
                }
                Err(error) if policy.allows_retry(attempts, &error) => {
                    let delay = policy.delay_after(attempts);
                    warn!(
                        task = %task.id,
                        attempt = attempts,
                        max_attempts = policy.max_attempts,
                        ?delay,
                        %error,
                        "attempt failed; backing off before retry"
                    );
                    ctx.events.emit(TaskEvent::TaskRetry {
                        batch_id: ctx.batch_id.clone(),
                        task_id: task.id.clone(),
                        attempt: attempts,
                        delay,
                        error: error.clone(),
                    });
                    last_error = Some(error);
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    warn!(task = %task.id, attempts, %error, "task failed");
                    ctx.events.emit(TaskEvent::TaskError {
                        batch_id: ctx.batch_id.clone(),
                        task_id: task.id.clone(),
                        attempts,
                        error: error.clone(),
                    });
                    return TaskResult::failed(task.id, error, attempts, started);
                }
            }
        }
    }
}

/// One attempt: spawn the operation and race it against `timeout`.
async fn run_attempt<T: Send + 'static>(
    operation: &Operation<T>,
    timeout: Option<Duration>,
) -> Result<T, TaskError> {
    let mut handle = tokio::spawn(operation());

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                handle.abort();
                return Err(TaskError::Timeout(limit));
            }
        },
        None => handle.await,
    };

    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TaskError::from_anyhow(&err)),
        Err(join_err) => Err(join_error_to_task_error(join_err)),
    }
}

pub(crate) fn join_error_to_task_error(err: JoinError) -> TaskError {
    if err.is_panic() {
        TaskError::Panicked(panic_message(err.into_panic()))
    } else {
        TaskError::Failed("operation was aborted".to_string())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
