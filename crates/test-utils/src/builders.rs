#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use flowdag::config::{
    ConfigSection, DefaultSection, Manifest, RawManifest, RetrySection, TaskConfig,
};
use flowdag::errors::Result;
use flowdag::exec::Task;

/// Builder for `RawManifest` / `Manifest` to simplify test setup.
pub struct ManifestBuilder {
    manifest: RawManifest,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self {
            manifest: RawManifest {
                config: ConfigSection::default(),
                default: DefaultSection::default(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.manifest.task.insert(name.to_string(), task);
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.manifest.config.max_concurrency = n;
        self
    }

    pub fn strict_dependencies(mut self, val: bool) -> Self {
        self.manifest.config.strict_dependencies = val;
        self
    }

    pub fn default_timeout(mut self, duration: &str) -> Self {
        self.manifest.config.default_timeout = Some(duration.to_string());
        self
    }

    pub fn default_retry(mut self, max_attempts: u32, backoff: &str) -> Self {
        self.manifest.default.retry = Some(RetrySection {
            max_attempts,
            backoff: Some(backoff.to_string()),
            jitter: 0.0,
        });
        self
    }

    pub fn raw(self) -> RawManifest {
        self.manifest
    }

    pub fn try_build(self) -> Result<Manifest> {
        Manifest::try_from(self.manifest)
    }

    pub fn build(self) -> Manifest {
        self.try_build()
            .expect("Failed to build valid manifest from builder")
    }
}

impl Default for ManifestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            task: TaskConfig {
                cmd: cmd.to_string(),
                label: None,
                after: vec![],
                priority: 0,
                parallel: None,
                group: None,
                timeout: None,
                retry: None,
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn label(mut self, label: &str) -> Self {
        self.task.label = Some(label.to_string());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn parallel(mut self, val: bool) -> Self {
        self.task.parallel = Some(val);
        self
    }

    pub fn group(mut self, group: &str) -> Self {
        self.task.group = Some(group.to_string());
        self
    }

    pub fn timeout(mut self, duration: &str) -> Self {
        self.task.timeout = Some(duration.to_string());
        self
    }

    pub fn retry(mut self, max_attempts: u32, backoff: &str) -> Self {
        self.task.retry = Some(RetrySection {
            max_attempts,
            backoff: Some(backoff.to_string()),
            jitter: 0.0,
        });
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}

/// Shared, ordered record of which task bodies ran.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries.lock().unwrap().iter().filter(|e| *e == entry).count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().unwrap().iter().position(|e| e == entry)
    }
}

/// Task that records its id in `log` and succeeds with the id as value.
pub fn logged_task(id: &str, log: &RunLog) -> Task<String> {
    let log = log.clone();
    let name = id.to_string();
    Task::new(id, move || {
        let log = log.clone();
        let name = name.clone();
        async move {
            log.push(name.clone());
            Ok(name)
        }
    })
}

/// Task that records its id in `log` and always fails.
pub fn failing_task(id: &str, log: &RunLog) -> Task<String> {
    let log = log.clone();
    let name = id.to_string();
    Task::new(id, move || {
        let log = log.clone();
        let name = name.clone();
        async move {
            log.push(name.clone());
            Err(anyhow!("{name} failed on purpose"))
        }
    })
}

/// Task that records its id, sleeps for `delay`, then succeeds.
pub fn sleeping_task(id: &str, delay: Duration, log: &RunLog) -> Task<String> {
    let log = log.clone();
    let name = id.to_string();
    Task::new(id, move || {
        let log = log.clone();
        let name = name.clone();
        async move {
            log.push(name.clone());
            tokio::time::sleep(delay).await;
            Ok(name)
        }
    })
}

/// Task that fails its first `failures` invocations and then succeeds.
/// `calls` counts every invocation.
pub fn flaky_task(id: &str, failures: usize, calls: &Arc<AtomicUsize>) -> Task<usize> {
    let calls = Arc::clone(calls);
    Task::new(id, move || {
        let calls = Arc::clone(&calls);
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= failures {
                Err(anyhow!("attempt {n} failed"))
            } else {
                Ok(n)
            }
        }
    })
}
