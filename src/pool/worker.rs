// src/pool/worker.rs

use std::sync::Arc;

use serde::Deserialize;

use crate::exec::{BoundedExecutor, Operation, SemaphoreExecutor, operation};
use crate::types::BalanceStrategy;

/// Declarative description of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkerConfig {
    pub id: String,
    pub max_concurrency: usize,
}

impl WorkerConfig {
    pub fn new(id: impl Into<String>, max_concurrency: usize) -> Self {
        Self {
            id: id.into(),
            max_concurrency,
        }
    }
}

/// Pool construction parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct PoolConfig {
    pub workers: Vec<WorkerConfig>,
    #[serde(default)]
    pub balance_strategy: BalanceStrategy,
}

/// A named bounded executor.
#[derive(Clone)]
pub struct Worker {
    pub id: String,
    pub executor: Arc<dyn BoundedExecutor>,
}

impl Worker {
    pub fn new(id: impl Into<String>, executor: Arc<dyn BoundedExecutor>) -> Self {
        Self {
            id: id.into(),
            executor,
        }
    }

    pub(crate) fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            config.id.clone(),
            Arc::new(SemaphoreExecutor::new(config.max_concurrency)),
        )
    }

    pub fn active(&self) -> usize {
        self.executor.active()
    }

    pub fn pending(&self) -> usize {
        self.executor.pending()
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            id: self.id.clone(),
            active: self.executor.active(),
            pending: self.executor.pending(),
            max_concurrency: self.executor.max_concurrency(),
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("active", &self.active())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Live counters of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    pub id: String,
    pub active: usize,
    pub pending: usize,
    pub max_concurrency: usize,
}

/// Independent unit of work for a [`WorkerPool`](super::WorkerPool).
pub struct WorkItem<T> {
    pub id: String,
    pub operation: Operation<T>,
    /// Higher-priority items are dispatched first by `submit_all`.
    pub priority: i32,
}

impl<T> WorkItem<T> {
    pub fn new<F, Fut>(id: impl Into<String>, f: F) -> Self
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            id: id.into(),
            operation: operation(f),
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl<T> std::fmt::Debug for WorkItem<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}
