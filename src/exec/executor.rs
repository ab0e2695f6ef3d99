// src/exec/executor.rs

//! Batch orchestration: plan phases, run them one after another, aggregate.
//!
//! Phase readiness is computed optimistically (a placed task counts as done),
//! so by default a task whose dependency failed in an earlier phase is still
//! invoked normally. Set [`ExecutorConfig::skip_dependents_of_failed`] to
//! cancel such tasks instead, or turn off
//! [`ExecutorConfig::continue_on_failure`] to stop after the first failing
//! phase.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dag::{DependencyGraph, ExecutionPlan, GraphNode};
use crate::errors::{Result, TaskError};
use crate::types::{DanglingPolicy, DuplicatePolicy};

use super::bounded::{BoundedExecutor, SemaphoreExecutor};
use super::events::{EventBus, EventSink, TaskEvent};
use super::infer::resolve_parallelizable;
use super::rate::{RateGate, RateLimit, WindowRateGate};
use super::runner::{ExecutionContext, TaskRunner, join_error_to_task_error};
use super::task::{Task, TaskId, TaskResult, TaskStatus};

/// Per-attempt timeout applied when neither the task nor the config sets one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Group name used by [`ParallelExecutor::execute_by_group`] for ungrouped tasks.
pub const DEFAULT_GROUP: &str = "__default__";

/// Split tasks into their `group`s, in execution order: ungrouped tasks first
/// as [`DEFAULT_GROUP`], then named groups in first-seen order. Empty groups
/// are omitted.
pub fn partition_by_group<T>(tasks: Vec<Task<T>>) -> Vec<(String, Vec<Task<T>>)> {
    let mut default_group = Vec::new();
    let mut named: Vec<(String, Vec<Task<T>>)> = Vec::new();

    for task in tasks {
        match task.group.clone() {
            None => default_group.push(task),
            Some(group) => match named.iter_mut().find(|(name, _)| *name == group) {
                Some((_, members)) => members.push(task),
                None => named.push((group, vec![task])),
            },
        }
    }

    let mut batches = Vec::with_capacity(named.len() + 1);
    if !default_group.is_empty() {
        batches.push((DEFAULT_GROUP.to_string(), default_group));
    }
    batches.extend(named);
    batches
}

/// Executor configuration. Every field has a default.
#[derive(Clone)]
pub struct ExecutorConfig {
    pub max_concurrency: usize,
    /// Floor applied to every concurrency value, including `map` overrides.
    pub min_concurrency: usize,
    pub default_timeout: Option<Duration>,
    pub auto_detect_parallel: bool,
    pub continue_on_failure: bool,
    pub skip_dependents_of_failed: bool,
    pub duplicate_policy: DuplicatePolicy,
    pub dangling_policy: DanglingPolicy,
    pub rate_limit: Option<RateLimit>,
    /// Takes precedence over `rate_limit`.
    pub rate_gate: Option<Arc<dyn RateGate>>,
    /// Takes precedence over `max_concurrency`.
    pub bounded: Option<Arc<dyn BoundedExecutor>>,
    pub on_task_event: Option<Arc<dyn EventSink>>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            min_concurrency: 1,
            default_timeout: Some(DEFAULT_TIMEOUT),
            auto_detect_parallel: true,
            continue_on_failure: true,
            skip_dependents_of_failed: false,
            duplicate_policy: DuplicatePolicy::default(),
            dangling_policy: DanglingPolicy::default(),
            rate_limit: None,
            rate_gate: None,
            bounded: None,
            on_task_event: None,
        }
    }
}

impl ExecutorConfig {
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_min_concurrency(mut self, min_concurrency: usize) -> Self {
        self.min_concurrency = min_concurrency;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_auto_detect_parallel(mut self, enabled: bool) -> Self {
        self.auto_detect_parallel = enabled;
        self
    }

    pub fn with_continue_on_failure(mut self, enabled: bool) -> Self {
        self.continue_on_failure = enabled;
        self
    }

    pub fn with_skip_dependents_of_failed(mut self, enabled: bool) -> Self {
        self.skip_dependents_of_failed = enabled;
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn with_dangling_policy(mut self, policy: DanglingPolicy) -> Self {
        self.dangling_policy = policy;
        self
    }

    pub fn with_rate_limit(mut self, limit: RateLimit) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    pub fn with_rate_gate(mut self, gate: Arc<dyn RateGate>) -> Self {
        self.rate_gate = Some(gate);
        self
    }

    pub fn with_bounded_executor(mut self, bounded: Arc<dyn BoundedExecutor>) -> Self {
        self.bounded = Some(bounded);
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.on_task_event = Some(sink);
        self
    }

    /// `max_concurrency` with the floor applied.
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrency.max(self.min_concurrency).max(1)
    }
}

impl std::fmt::Debug for ExecutorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorConfig")
            .field("max_concurrency", &self.max_concurrency)
            .field("min_concurrency", &self.min_concurrency)
            .field("default_timeout", &self.default_timeout)
            .field("auto_detect_parallel", &self.auto_detect_parallel)
            .field("continue_on_failure", &self.continue_on_failure)
            .field("skip_dependents_of_failed", &self.skip_dependents_of_failed)
            .field("duplicate_policy", &self.duplicate_policy)
            .field("dangling_policy", &self.dangling_policy)
            .field("rate_limit", &self.rate_limit)
            .field("custom_rate_gate", &self.rate_gate.is_some())
            .field("custom_bounded", &self.bounded.is_some())
            .field("event_sink", &self.on_task_event.is_some())
            .finish()
    }
}

/// Aggregated outcome of one `execute` call.
#[derive(Debug, Clone)]
pub struct BatchResult<T> {
    pub batch_id: String,
    /// One entry per distinct task id, in submission order.
    pub results: Vec<TaskResult<T>>,
    pub total_duration: Duration,
    pub success_count: usize,
    pub failure_count: usize,
    pub cancelled_count: usize,
    /// Largest number of tasks launched together in one phase.
    pub max_observed_parallelism: usize,
}

impl<T> BatchResult<T> {
    pub fn result(&self, id: &str) -> Option<&TaskResult<T>> {
        self.results.iter().find(|r| r.task_id == id)
    }

    /// Every task completed.
    pub fn is_success(&self) -> bool {
        self.success_count == self.results.len()
    }

    pub fn total_duration_ms(&self) -> u128 {
        self.total_duration.as_millis()
    }
}

/// Snapshot returned by [`ParallelExecutor::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorStats {
    pub active: usize,
    pub pending: usize,
    pub results_count: usize,
}

/// Runs batches of dependent tasks phase by phase.
pub struct ParallelExecutor {
    config: ExecutorConfig,
    bounded: Arc<dyn BoundedExecutor>,
    rate_gate: Option<Arc<dyn RateGate>>,
    events: Arc<EventBus>,
    cancelled: Arc<AtomicBool>,
    results_count: AtomicUsize,
}

impl ParallelExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let bounded: Arc<dyn BoundedExecutor> = match &config.bounded {
            Some(bounded) => Arc::clone(bounded),
            None => Arc::new(SemaphoreExecutor::new(config.effective_concurrency())),
        };

        let rate_gate: Option<Arc<dyn RateGate>> = match (&config.rate_gate, config.rate_limit) {
            (Some(gate), _) => Some(Arc::clone(gate)),
            (None, Some(limit)) => Some(Arc::new(WindowRateGate::new(limit))),
            (None, None) => None,
        };

        let mut events = EventBus::new();
        if let Some(sink) = &config.on_task_event {
            events.subscribe(Arc::clone(sink));
        }

        Self {
            config,
            bounded,
            rate_gate,
            events: Arc::new(events),
            cancelled: Arc::new(AtomicBool::new(false)),
            results_count: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Add another event subscriber.
    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        Arc::make_mut(&mut self.events).subscribe(sink);
    }

    /// Resolve flags and compute phases without running anything.
    pub fn plan<T>(&self, tasks: &[Task<T>]) -> Result<ExecutionPlan> {
        let (graph, phases) = self.build_phases(tasks)?;
        let sequential = graph
            .nodes()
            .filter(|n| !n.parallelizable)
            .map(|n| n.id.clone())
            .collect();
        Ok(ExecutionPlan::new(phases, sequential))
    }

    fn build_phases<T>(&self, tasks: &[Task<T>]) -> Result<(DependencyGraph, Vec<Vec<TaskId>>)> {
        let mut graph =
            DependencyGraph::with_policies(self.config.duplicate_policy, self.config.dangling_policy);
        for task in tasks {
            graph.add(GraphNode {
                id: task.id.clone(),
                dependencies: task.dependencies.clone(),
                priority: task.priority,
                parallelizable: resolve_parallelizable(task, self.config.auto_detect_parallel),
            })?;
        }
        let phases = graph.execution_phases()?;
        Ok((graph, phases))
    }

    /// Run a batch to completion.
    ///
    /// Fails only on a graph fault, before any task is started. Task failures,
    /// timeouts and cancellations are reported inside the [`BatchResult`].
    pub async fn execute<T: Send + 'static>(&self, tasks: Vec<Task<T>>) -> Result<BatchResult<T>> {
        let batch_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        let phases = match self.build_phases(&tasks) {
            Ok((_, phases)) => phases,
            Err(err) => {
                warn!(%batch_id, error = %err, "batch rejected during planning");
                return Err(err);
            }
        };

        // Later definitions win when duplicates are allowed; position is first-seen.
        let mut order: Vec<TaskId> = Vec::with_capacity(tasks.len());
        let mut pending: HashMap<TaskId, Task<T>> = HashMap::with_capacity(tasks.len());
        for task in tasks {
            if !pending.contains_key(&task.id) {
                order.push(task.id.clone());
            }
            pending.insert(task.id.clone(), task);
        }

        info!(%batch_id, tasks = order.len(), phases = phases.len(), "batch started");
        self.events.emit(TaskEvent::BatchStart {
            batch_id: batch_id.clone(),
            task_count: order.len(),
            phase_count: phases.len(),
        });

        let runner = TaskRunner::new(ExecutionContext {
            batch_id: batch_id.clone(),
            cancelled: Arc::clone(&self.cancelled),
            events: Arc::clone(&self.events),
            bounded: Arc::clone(&self.bounded),
            rate_gate: self.rate_gate.clone(),
            default_timeout: self.config.default_timeout,
        });

        let mut results: HashMap<TaskId, TaskResult<T>> = HashMap::with_capacity(order.len());
        let mut unfinished: HashSet<TaskId> = HashSet::new();
        let mut halted = false;
        let mut max_parallelism = 0;

        for (phase_idx, phase) in phases.iter().enumerate() {
            if halted || self.is_cancelled() {
                debug!(%batch_id, phase = phase_idx, "phase not started; cancelling its tasks");
                for id in phase {
                    if pending.remove(id).is_some() {
                        self.record(&mut results, TaskResult::not_started(id.clone()));
                    }
                }
                continue;
            }

            let mut join_set = JoinSet::new();
            let mut spawned: HashMap<tokio::task::Id, TaskId> = HashMap::new();

            for id in phase {
                let Some(task) = pending.remove(id) else {
                    continue;
                };

                if self.config.skip_dependents_of_failed
                    && task.dependencies.iter().any(|d| unfinished.contains(d))
                {
                    debug!(%batch_id, task = %id, "dependency did not complete; skipping");
                    unfinished.insert(id.clone());
                    self.record(&mut results, TaskResult::not_started(id.clone()));
                    continue;
                }

                let runner = runner.clone();
                let handle = join_set.spawn(async move { runner.run(task).await });
                spawned.insert(handle.id(), id.clone());
            }

            let launched = spawned.len();
            max_parallelism = max_parallelism.max(launched);
            info!(%batch_id, phase = phase_idx, tasks = launched, "phase started");

            let mut phase_failed = false;
            while let Some(joined) = join_set.join_next_with_id().await {
                let result = match joined {
                    Ok((_, result)) => result,
                    Err(err) => {
                        let id = spawned.get(&err.id()).cloned().unwrap_or_default();
                        warn!(%batch_id, task = %id, error = %err, "task runner terminated abnormally");
                        TaskResult::failed(id, join_error_to_task_error(err), 1, chrono::Utc::now())
                    }
                };

                if result.status != TaskStatus::Completed {
                    unfinished.insert(result.task_id.clone());
                }
                phase_failed |= result.is_failed();
                self.record(&mut results, result);
            }

            info!(%batch_id, phase = phase_idx, failed = phase_failed, "phase finished");

            if phase_failed && !self.config.continue_on_failure {
                warn!(%batch_id, phase = phase_idx, "phase had failures; remaining phases will not run");
                halted = true;
            }
        }

        let ordered: Vec<TaskResult<T>> = order
            .iter()
            .filter_map(|id| results.remove(id))
            .collect();

        let success_count = ordered.iter().filter(|r| r.is_completed()).count();
        let failure_count = ordered.iter().filter(|r| r.is_failed()).count();
        let cancelled_count = ordered.iter().filter(|r| r.is_cancelled()).count();
        let total_duration = started.elapsed();

        info!(
            %batch_id,
            success_count,
            failure_count,
            cancelled_count,
            ?total_duration,
            "batch finished"
        );
        self.events.emit(TaskEvent::BatchComplete {
            batch_id: batch_id.clone(),
            success_count,
            failure_count,
            duration: total_duration,
        });

        Ok(BatchResult {
            batch_id,
            results: ordered,
            total_duration,
            success_count,
            failure_count,
            cancelled_count,
            max_observed_parallelism: max_parallelism,
        })
    }

    fn record<T>(&self, results: &mut HashMap<TaskId, TaskResult<T>>, result: TaskResult<T>) {
        self.results_count.fetch_add(1, Ordering::SeqCst);
        results.insert(result.task_id.clone(), result);
    }

    /// Run ungrouped tasks first (as [`DEFAULT_GROUP`]), then each named group
    /// in first-seen order, one `execute` call per group.
    ///
    /// Every group is planned before any group runs, so a graph fault in any
    /// group fails the call before a single task has started.
    ///
    /// Dependencies across groups are not tracked: within a group's batch they
    /// are dangling references and follow the configured [`DanglingPolicy`].
    pub async fn execute_by_group<T: Send + 'static>(
        &self,
        tasks: Vec<Task<T>>,
    ) -> Result<BTreeMap<String, BatchResult<T>>> {
        let groups = partition_by_group(tasks);
        for (group, members) in &groups {
            if let Err(err) = self.build_phases(members) {
                warn!(group = %group, error = %err, "group rejected during planning; nothing was run");
                return Err(err);
            }
        }

        let mut out = BTreeMap::new();
        for (group, members) in groups {
            info!(group = %group, tasks = members.len(), "running group");
            let result = self.execute(members).await?;
            out.insert(group, result);
        }
        Ok(out)
    }

    /// Apply `f` to every item with bounded concurrency; results keep input order.
    ///
    /// `concurrency` defaults to the executor's own bounded executor; an
    /// explicit value gets a fresh limiter (floored by `min_concurrency`).
    /// No dependency, retry, or cancellation handling.
    pub async fn map<I, T, F, Fut>(
        &self,
        items: Vec<I>,
        f: F,
        concurrency: Option<usize>,
    ) -> Vec<std::result::Result<T, TaskError>>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let bounded: Arc<dyn BoundedExecutor> = match concurrency {
            Some(limit) => Arc::new(SemaphoreExecutor::new(
                limit.max(self.config.min_concurrency),
            )),
            None => Arc::clone(&self.bounded),
        };
        let f = Arc::new(f);

        let mut slots: Vec<Option<std::result::Result<T, TaskError>>> =
            (0..items.len()).map(|_| None).collect();
        let mut join_set = JoinSet::new();
        let mut spawned: HashMap<tokio::task::Id, usize> = HashMap::new();

        for (idx, item) in items.into_iter().enumerate() {
            let bounded = Arc::clone(&bounded);
            let f = Arc::clone(&f);
            let handle = join_set.spawn(async move {
                let _slot = bounded
                    .acquire()
                    .await
                    .map_err(|err| TaskError::Failed(err.to_string()))?;
                f(item).await.map_err(|err| TaskError::from_anyhow(&err))
            });
            spawned.insert(handle.id(), idx);
        }

        while let Some(joined) = join_set.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok((id, outcome)) => (id, outcome),
                Err(err) => (err.id(), Err(join_error_to_task_error(err))),
            };
            if let Some(&idx) = spawned.get(&id) {
                slots[idx] = Some(outcome);
            }
        }

        slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(TaskError::Failed("item did not run".into()))))
            .collect()
    }

    /// Request cooperative cancellation of the current and future batches
    /// until [`reset`](Self::reset).
    pub fn cancel(&self) {
        info!("cancellation requested");
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear cancellation and result bookkeeping.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
        self.results_count.store(0, Ordering::SeqCst);
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            active: self.bounded.active(),
            pending: self.bounded.pending(),
            results_count: self.results_count.load(Ordering::SeqCst),
        }
    }
}

impl Default for ParallelExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl std::fmt::Debug for ParallelExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelExecutor")
            .field("config", &self.config)
            .field("cancelled", &self.is_cancelled())
            .field("stats", &self.stats())
            .finish()
    }
}
