// src/exec/task.rs

//! Task definitions and per-task results.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::TaskError;

/// Canonical task identifier type.
pub type TaskId = String;

/// Boxed, sendable future used at the trait-object seams of the executor.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An opaque asynchronous task body.
///
/// Invoked once per attempt; every call must produce a fresh future.
pub type Operation<T> = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// Predicate deciding whether a failed attempt may be retried.
pub type RetryPredicate = Arc<dyn Fn(&TaskError) -> bool + Send + Sync>;

/// Wrap a closure returning a future into an [`Operation`].
pub fn operation<T, F, Fut>(f: F) -> Operation<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// Lifecycle state of a task within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.pad(s)
    }
}

/// Retry behaviour for a single task.
///
/// The delay before attempt `n + 1` is `backoff_base * n` (linear). A non-zero
/// `jitter` stretches that delay by a random fraction in `[0, jitter]`.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub jitter: f64,
    should_retry: Option<RetryPredicate>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
            jitter: 0.0,
            should_retry: None,
        }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&TaskError) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    /// Whether the error from attempt number `attempt` (1-based) allows another try.
    pub fn allows_retry(&self, attempt: u32, error: &TaskError) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        match &self.should_retry {
            Some(predicate) => predicate(error),
            None => true,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = self.backoff_base.saturating_mul(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let stretch = rand::random::<f64>() * self.jitter;
        base + base.mul_f64(stretch)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff_base", &self.backoff_base)
            .field("jitter", &self.jitter)
            .field("custom_predicate", &self.should_retry.is_some())
            .finish()
    }
}

/// A unit of submitted work.
pub struct Task<T> {
    pub id: TaskId,
    pub label: Option<String>,
    pub operation: Operation<T>,
    pub dependencies: Vec<TaskId>,
    pub priority: i32,
    /// `None` means "let the executor decide".
    pub parallelizable: Option<bool>,
    pub group: Option<String>,
    pub timeout: Option<Duration>,
    pub retry: Option<RetryPolicy>,
}

impl<T> Task<T> {
    pub fn new<F, Fut>(id: impl Into<TaskId>, f: F) -> Self
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::from_operation(id, operation(f))
    }

    pub fn from_operation(id: impl Into<TaskId>, operation: Operation<T>) -> Self {
        Self {
            id: id.into(),
            label: None,
            operation,
            dependencies: Vec::new(),
            priority: 0,
            parallelizable: None,
            group: None,
            timeout: None,
            retry: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Add dependencies; repeated ids are kept once.
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        for dep in deps {
            let dep = dep.into();
            if !self.dependencies.contains(&dep) {
                self.dependencies.push(dep);
            }
        }
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn parallelizable(mut self, parallelizable: bool) -> Self {
        self.parallelizable = Some(parallelizable);
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Label if set, id otherwise.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            label: self.label.clone(),
            operation: Arc::clone(&self.operation),
            dependencies: self.dependencies.clone(),
            priority: self.priority,
            parallelizable: self.parallelizable,
            group: self.group.clone(),
            timeout: self.timeout,
            retry: self.retry.clone(),
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("dependencies", &self.dependencies)
            .field("priority", &self.priority)
            .field("parallelizable", &self.parallelizable)
            .field("group", &self.group)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Outcome of one task in a batch.
///
/// `value` is present iff `status == Completed`, `error` iff `status == Failed`.
/// A task cancelled before its first attempt reports `attempts == 0`; the
/// error of a task cancelled between attempts is only reported through
/// [`TaskEvent::TaskCancelled`](super::events::TaskEvent::TaskCancelled).
#[derive(Debug, Clone)]
pub struct TaskResult<T> {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub value: Option<T>,
    pub error: Option<TaskError>,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration: Duration,
}

impl<T> TaskResult<T> {
    pub(crate) fn completed(
        task_id: TaskId,
        value: T,
        attempts: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self::finish(task_id, TaskStatus::Completed, Some(value), None, attempts, started_at)
    }

    pub(crate) fn failed(
        task_id: TaskId,
        error: TaskError,
        attempts: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self::finish(task_id, TaskStatus::Failed, None, Some(error), attempts, started_at)
    }

    pub(crate) fn cancelled(task_id: TaskId, attempts: u32, started_at: DateTime<Utc>) -> Self {
        Self::finish(task_id, TaskStatus::Cancelled, None, None, attempts, started_at)
    }

    /// A task that never got to run at all.
    pub(crate) fn not_started(task_id: TaskId) -> Self {
        Self::cancelled(task_id, 0, Utc::now())
    }

    fn finish(
        task_id: TaskId,
        status: TaskStatus,
        value: Option<T>,
        error: Option<TaskError>,
        attempts: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        let completed_at = Utc::now();
        let duration = (completed_at - started_at).to_std().unwrap_or(Duration::ZERO);
        Self {
            task_id,
            status,
            value,
            error,
            attempts,
            started_at,
            completed_at,
            duration,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == TaskStatus::Failed
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == TaskStatus::Cancelled
    }

    pub fn duration_ms(&self) -> u128 {
        self.duration.as_millis()
    }
}
