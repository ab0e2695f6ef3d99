// src/pool/mod.rs

//! Routing of independent work items across several bounded workers.
//!
//! Items have no dependency relationships. Each item is routed to one worker
//! by the pool's [`BalanceStrategy`] and runs on that worker's
//! [`BoundedExecutor`](crate::exec::BoundedExecutor). Selection happens per
//! item at dispatch time, so a burst of items can pile onto one worker before
//! its active count moves.

pub mod worker;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::anyhow;
use rand::Rng;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::errors::{FlowdagError, Result};
use crate::types::BalanceStrategy;

pub use worker::{PoolConfig, WorkItem, Worker, WorkerConfig, WorkerStats};

#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<Worker>,
    strategy: BalanceStrategy,
    next: AtomicUsize,
}

impl WorkerPool {
    /// Build a pool of semaphore-backed workers.
    pub fn new(config: PoolConfig) -> Result<Self> {
        if let Some(w) = config.workers.iter().find(|w| w.max_concurrency == 0) {
            return Err(FlowdagError::ConfigError(format!(
                "worker '{}' must allow at least one concurrent item",
                w.id
            )));
        }
        let workers = config.workers.iter().map(Worker::from_config).collect();
        Self::from_workers(workers, config.balance_strategy)
    }

    /// Build a pool over caller-supplied workers.
    pub fn from_workers(workers: Vec<Worker>, strategy: BalanceStrategy) -> Result<Self> {
        if workers.is_empty() {
            return Err(FlowdagError::ConfigError(
                "worker pool needs at least one worker".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for w in &workers {
            if !seen.insert(w.id.as_str()) {
                return Err(FlowdagError::ConfigError(format!(
                    "duplicate worker id '{}'",
                    w.id
                )));
            }
        }

        info!(workers = workers.len(), ?strategy, "worker pool created");
        Ok(Self {
            workers,
            strategy,
            next: AtomicUsize::new(0),
        })
    }

    pub fn strategy(&self) -> BalanceStrategy {
        self.strategy
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn worker(&self, id: &str) -> Option<&Worker> {
        self.workers.iter().find(|w| w.id == id)
    }

    /// Pick the worker for the next item according to the strategy.
    pub fn select_worker(&self) -> &Worker {
        let idx = match self.strategy {
            BalanceStrategy::RoundRobin => {
                self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len()
            }
            BalanceStrategy::Random => rand::rng().random_range(0..self.workers.len()),
            // `min_by_key` keeps the first of equal minima.
            BalanceStrategy::LeastBusy => self
                .workers
                .iter()
                .enumerate()
                .min_by_key(|(_, w)| w.active())
                .map(|(i, _)| i)
                .unwrap_or(0),
        };
        &self.workers[idx]
    }

    /// Run `item` on the worker chosen by the strategy.
    pub async fn submit<T: Send + 'static>(&self, item: WorkItem<T>) -> Result<T> {
        let worker = self.select_worker().clone();
        run_on(worker, item).await
    }

    /// Run `item` on a specific worker.
    pub async fn submit_to<T: Send + 'static>(&self, worker_id: &str, item: WorkItem<T>) -> Result<T> {
        let worker = self
            .worker(worker_id)
            .cloned()
            .ok_or_else(|| FlowdagError::WorkerNotFound(worker_id.to_string()))?;
        run_on(worker, item).await
    }

    /// Run all items concurrently; results come back in input order.
    ///
    /// Workers are selected in priority order (highest first, input order
    /// among equals).
    pub async fn submit_all<T: Send + 'static>(&self, items: Vec<WorkItem<T>>) -> Vec<Result<T>> {
        let mut indexed: Vec<(usize, WorkItem<T>)> = items.into_iter().enumerate().collect();
        indexed.sort_by_key(|(idx, item)| (std::cmp::Reverse(item.priority), *idx));

        let mut slots: Vec<Option<Result<T>>> = (0..indexed.len()).map(|_| None).collect();
        let mut ids: Vec<String> = vec![String::new(); indexed.len()];
        let mut join_set = JoinSet::new();
        let mut spawned = std::collections::HashMap::new();

        for (idx, item) in indexed {
            let worker = self.select_worker().clone();
            ids[idx] = item.id.clone();
            let handle = join_set.spawn(run_on(worker, item));
            spawned.insert(handle.id(), idx);
        }

        while let Some(joined) = join_set.join_next_with_id().await {
            let (task_id, outcome) = match joined {
                Ok((task_id, outcome)) => (task_id, outcome),
                Err(err) => {
                    let task_id = err.id();
                    let id = spawned.get(&task_id).map(|&i| ids[i].clone()).unwrap_or_default();
                    (
                        task_id,
                        Err(FlowdagError::WorkItemFailed {
                            id,
                            source: anyhow!("dispatch task terminated: {err}"),
                        }),
                    )
                }
            };
            if let Some(&idx) = spawned.get(&task_id) {
                slots[idx] = Some(outcome);
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.unwrap_or_else(|| {
                    Err(FlowdagError::WorkItemFailed {
                        id: ids[idx].clone(),
                        source: anyhow!("work item was never dispatched"),
                    })
                })
            })
            .collect()
    }

    pub fn stats(&self) -> Vec<WorkerStats> {
        self.workers.iter().map(Worker::stats).collect()
    }

    pub fn total_active(&self) -> usize {
        self.workers.iter().map(Worker::active).sum()
    }

    pub fn total_pending(&self) -> usize {
        self.workers.iter().map(Worker::pending).sum()
    }
}

/// Hold a slot on `worker` while the item's operation runs in its own task.
async fn run_on<T: Send + 'static>(worker: Worker, item: WorkItem<T>) -> Result<T> {
    let _slot = worker.executor.acquire().await?;
    debug!(worker = %worker.id, item = %item.id, "running work item");

    match tokio::spawn((item.operation)()).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => {
            warn!(worker = %worker.id, item = %item.id, error = %source, "work item failed");
            Err(FlowdagError::WorkItemFailed {
                id: item.id,
                source,
            })
        }
        Err(err) => {
            warn!(worker = %worker.id, item = %item.id, error = %err, "work item panicked");
            Err(FlowdagError::WorkItemFailed {
                id: item.id,
                source: anyhow!("operation panicked: {err}"),
            })
        }
    }
}
