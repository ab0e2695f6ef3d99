// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::duration::parse_duration;
use crate::config::model::{
    Manifest, ManifestSettings, RawManifest, RetrySection, RetrySpec, TaskSpec,
};
use crate::errors::{FlowdagError, GraphFault, Result};
use crate::exec::{DEFAULT_TIMEOUT, RateLimit};

impl TryFrom<RawManifest> for Manifest {
    type Error = FlowdagError;

    fn try_from(raw: RawManifest) -> std::result::Result<Self, Self::Error> {
        ensure_has_tasks(&raw)?;
        let settings = validate_settings(&raw)?;
        validate_task_dependencies(&raw)?;
        validate_dag(&raw)?;

        let tasks = raw
            .task
            .into_iter()
            .map(|(id, task)| -> Result<TaskSpec> {
                let timeout = task
                    .timeout
                    .as_deref()
                    .map(|t| parse_field(t, &format!("[task.{id}].timeout")))
                    .transpose()?;
                let retry = task
                    .retry
                    .as_ref()
                    .map(|r| validate_retry(r, &format!("[task.{id}].retry")))
                    .transpose()?;
                Ok(TaskSpec {
                    id,
                    cmd: task.cmd,
                    label: task.label,
                    after: task.after,
                    priority: task.priority,
                    parallel: task.parallel,
                    group: task.group,
                    timeout,
                    retry,
                })
            })
            .collect::<Result<Vec<TaskSpec>>>()?;

        Ok(Manifest::new_unchecked(settings, tasks))
    }
}

fn parse_field(value: &str, field: &str) -> Result<std::time::Duration> {
    parse_duration(value).map_err(|e| FlowdagError::ConfigError(format!("{field}: {e}")))
}

fn ensure_has_tasks(cfg: &RawManifest) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(FlowdagError::ConfigError(
            "manifest must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_settings(cfg: &RawManifest) -> Result<ManifestSettings> {
    let c = &cfg.config;

    if c.max_concurrency == 0 {
        return Err(FlowdagError::ConfigError(
            "[config].max_concurrency must be >= 1 (got 0)".to_string(),
        ));
    }
    if c.min_concurrency > c.max_concurrency {
        return Err(FlowdagError::ConfigError(format!(
            "[config].min_concurrency ({}) must not exceed max_concurrency ({})",
            c.min_concurrency, c.max_concurrency
        )));
    }

    let default_timeout = match c.default_timeout.as_deref().map(str::trim) {
        None => Some(DEFAULT_TIMEOUT),
        Some(t) if t.eq_ignore_ascii_case("none") => None,
        Some(t) => Some(parse_field(t, "[config].default_timeout")?),
    };

    let rate_limit = match &c.rate_limit {
        Some(section) => {
            if section.max_requests == 0 {
                return Err(FlowdagError::ConfigError(
                    "[config.rate_limit].max_requests must be >= 1 (got 0)".to_string(),
                ));
            }
            let window = parse_field(&section.window, "[config.rate_limit].window")?;
            Some(RateLimit::new(section.max_requests, window))
        }
        None => None,
    };

    let default_retry = cfg
        .default
        .retry
        .as_ref()
        .map(|r| validate_retry(r, "[default.retry]"))
        .transpose()?;

    Ok(ManifestSettings {
        max_concurrency: c.max_concurrency,
        min_concurrency: c.min_concurrency,
        default_timeout,
        continue_on_failure: c.continue_on_failure,
        auto_detect_parallel: c.auto_detect_parallel,
        skip_dependents_of_failed: c.skip_dependents_of_failed,
        strict_dependencies: c.strict_dependencies,
        rate_limit,
        default_retry,
    })
}

fn validate_retry(retry: &RetrySection, field: &str) -> Result<RetrySpec> {
    if retry.max_attempts == 0 {
        return Err(FlowdagError::ConfigError(format!(
            "{field}.max_attempts must be >= 1 (got 0)"
        )));
    }
    if !(0.0..=1.0).contains(&retry.jitter) {
        return Err(FlowdagError::ConfigError(format!(
            "{field}.jitter must be between 0.0 and 1.0 (got {})",
            retry.jitter
        )));
    }
    let backoff = match retry.backoff.as_deref() {
        Some(b) => parse_field(b, &format!("{field}.backoff"))?,
        None => std::time::Duration::ZERO,
    };
    Ok(RetrySpec {
        max_attempts: retry.max_attempts,
        backoff,
        jitter: retry.jitter,
    })
}

fn validate_task_dependencies(cfg: &RawManifest) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            if dep == name {
                return Err(FlowdagError::ConfigError(format!(
                    "task '{name}' cannot depend on itself in `after`"
                )));
            }
            if cfg.config.strict_dependencies && !cfg.task.contains_key(dep) {
                return Err(FlowdagError::ConfigError(format!(
                    "task '{name}' has unknown dependency '{dep}' in `after`"
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawManifest) -> Result<()> {
    // Edge direction: dep -> task. Unknown deps are left out of the graph.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.task.keys() {
        graph.add_node(name.as_str());
    }

    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter().filter(|d| cfg.task.contains_key(*d)) {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(GraphFault::CircularDependency(cycle.node_id().to_string()).into()),
    }
}
