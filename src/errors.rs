// src/errors.rs

//! Crate-wide error types.
//!
//! - [`FlowdagError`] is what fallible library calls return.
//! - [`GraphFault`] covers batch-level faults found while planning; a batch
//!   that hits one never starts any task.
//! - [`TaskError`] is the failure recorded on a single task result. It never
//!   escapes `execute`; it only shows up inside a `TaskResult`.

use std::time::Duration;

use thiserror::Error;

use crate::exec::TaskId;

#[derive(Error, Debug)]
pub enum FlowdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Graph fault: {0}")]
    Graph(#[from] GraphFault),

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Work item '{id}' failed: {source:#}")]
    WorkItemFailed {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Bounded executor is closed")]
    ExecutorClosed,

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Faults in the dependency graph of a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphFault {
    #[error("circular dependency detected involving task '{0}'")]
    CircularDependency(TaskId),

    #[error("unable to place remaining tasks into a phase: {0:?}")]
    Unresolvable(Vec<TaskId>),

    #[error("duplicate task id '{0}'")]
    DuplicateTask(TaskId),

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: TaskId, dependency: TaskId },
}

/// Why a single task attempt (and ultimately the task) failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Failed(String),

    #[error("panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Render an operation error with its full context chain.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        TaskError::Failed(format!("{err:#}"))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout(_))
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FlowdagError>;
