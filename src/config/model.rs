// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::exec::command::shell_operation;
use crate::exec::{ExecutorConfig, RateLimit, RetryPolicy, Task};
use crate::types::DanglingPolicy;

/// Manifest exactly as deserialized from TOML, before validation.
///
/// ```toml
/// [config]
/// max_concurrency = 4
/// default_timeout = "30s"   # "none" disables it; unset means 300s
///
/// [default.retry]
/// max_attempts = 2
/// backoff = "100ms"
///
/// [task.build]
/// cmd = "cargo build"
/// after = ["fetch"]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawManifest {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub default: DefaultSection,

    /// Keyed by task id.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// `[config]` section: executor-wide behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_min_concurrency")]
    pub min_concurrency: usize,

    /// Duration string, or `"none"` for no timeout. Unset means
    /// [`DEFAULT_TIMEOUT`](crate::exec::DEFAULT_TIMEOUT).
    #[serde(default)]
    pub default_timeout: Option<String>,

    #[serde(default = "default_true")]
    pub continue_on_failure: bool,

    #[serde(default = "default_true")]
    pub auto_detect_parallel: bool,

    #[serde(default)]
    pub skip_dependents_of_failed: bool,

    /// Reject `after` entries naming tasks that do not exist.
    #[serde(default)]
    pub strict_dependencies: bool,

    #[serde(default)]
    pub rate_limit: Option<RateLimitSection>,
}

fn default_max_concurrency() -> usize {
    5
}

fn default_min_concurrency() -> usize {
    1
}

fn default_true() -> bool {
    true
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            min_concurrency: default_min_concurrency(),
            default_timeout: None,
            continue_on_failure: true,
            auto_detect_parallel: true,
            skip_dependents_of_failed: false,
            strict_dependencies: false,
            rate_limit: None,
        }
    }
}

/// `[config.rate_limit]`
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    pub max_requests: u32,
    pub window: String,
}

/// `[default]` section: values applied to tasks that do not set their own.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DefaultSection {
    #[serde(default)]
    pub retry: Option<RetrySection>,
}

/// Retry table, used both as `[default.retry]` and inline per task.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub backoff: Option<String>,

    #[serde(default)]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    1
}

/// `[task.<id>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Shell command to run.
    pub cmd: String,

    #[serde(default)]
    pub label: Option<String>,

    /// Dependency list: this task waits for every task listed here.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub priority: i32,

    /// Unset lets the executor apply its heuristic.
    #[serde(default)]
    pub parallel: Option<bool>,

    #[serde(default)]
    pub group: Option<String>,

    #[serde(default)]
    pub timeout: Option<String>,

    #[serde(default)]
    pub retry: Option<RetrySection>,
}

/// Validated retry settings with parsed durations.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySpec {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub jitter: f64,
}

impl RetrySpec {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.backoff).with_jitter(self.jitter)
    }
}

/// Validated executor settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestSettings {
    pub max_concurrency: usize,
    pub min_concurrency: usize,
    /// Effective default timeout; `None` when the manifest disables it.
    pub default_timeout: Option<Duration>,
    pub continue_on_failure: bool,
    pub auto_detect_parallel: bool,
    pub skip_dependents_of_failed: bool,
    pub strict_dependencies: bool,
    pub rate_limit: Option<RateLimit>,
    pub default_retry: Option<RetrySpec>,
}

/// One validated task definition.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub id: String,
    pub cmd: String,
    pub label: Option<String>,
    pub after: Vec<String>,
    pub priority: i32,
    pub parallel: Option<bool>,
    pub group: Option<String>,
    pub timeout: Option<Duration>,
    pub retry: Option<RetrySpec>,
}

/// A validated manifest. Obtain one through
/// [`load_and_validate`](crate::config::load_and_validate) or
/// `Manifest::try_from(raw)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    settings: ManifestSettings,
    tasks: Vec<TaskSpec>,
}

impl Manifest {
    pub(crate) fn new_unchecked(settings: ManifestSettings, tasks: Vec<TaskSpec>) -> Self {
        Self { settings, tasks }
    }

    pub fn settings(&self) -> &ManifestSettings {
        &self.settings
    }

    pub fn task_specs(&self) -> &[TaskSpec] {
        &self.tasks
    }

    /// Executor configuration described by `[config]`.
    pub fn executor_config(&self) -> ExecutorConfig {
        let s = &self.settings;
        let mut config = ExecutorConfig::default()
            .with_max_concurrency(s.max_concurrency)
            .with_min_concurrency(s.min_concurrency)
            .with_default_timeout(s.default_timeout)
            .with_auto_detect_parallel(s.auto_detect_parallel)
            .with_continue_on_failure(s.continue_on_failure)
            .with_skip_dependents_of_failed(s.skip_dependents_of_failed);
        if s.strict_dependencies {
            config = config.with_dangling_policy(DanglingPolicy::Reject);
        }
        if let Some(limit) = s.rate_limit {
            config = config.with_rate_limit(limit);
        }
        config
    }

    /// Shell-command tasks, in manifest (task id) order.
    pub fn tasks(&self) -> Vec<Task<String>> {
        self.tasks
            .iter()
            .map(|spec| {
                let mut task = Task::from_operation(
                    spec.id.clone(),
                    shell_operation(spec.id.clone(), spec.cmd.clone()),
                )
                .depends_on(spec.after.iter().cloned())
                .with_priority(spec.priority);

                if let Some(label) = &spec.label {
                    task = task.with_label(label.clone());
                }
                if let Some(parallel) = spec.parallel {
                    task = task.parallelizable(parallel);
                }
                if let Some(group) = &spec.group {
                    task = task.in_group(group.clone());
                }
                if let Some(timeout) = spec.timeout {
                    task = task.with_timeout(timeout);
                }
                if let Some(retry) = spec.retry.as_ref().or(self.settings.default_retry.as_ref()) {
                    task = task.with_retry(retry.to_policy());
                }
                task
            })
            .collect()
    }
}
