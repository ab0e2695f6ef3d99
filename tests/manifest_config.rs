// tests/manifest_config.rs

mod common;
use crate::common::builders::{ManifestBuilder, TaskConfigBuilder};
use crate::common::init_tracing;

use std::io::Write;
use std::time::Duration;

use flowdag::config::{load_and_validate, parse_duration, parse_manifest};
use flowdag::config::model::Manifest;
use flowdag::errors::{FlowdagError, GraphFault};
use flowdag::exec::{DEFAULT_TIMEOUT, RateLimit};
use flowdag::types::DanglingPolicy;
use tempfile::NamedTempFile;

fn manifest_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn full_manifest_loads_into_settings_and_tasks() {
    init_tracing();
    let file = manifest_file(
        r#"
[config]
max_concurrency = 4
default_timeout = "30s"
continue_on_failure = false
skip_dependents_of_failed = true
strict_dependencies = true

[config.rate_limit]
max_requests = 10
window = "1s"

[default.retry]
max_attempts = 2
backoff = "100ms"

[task.fetch]
cmd = "echo fetch"

[task.build]
cmd = "echo build"
label = "Build"
after = ["fetch"]
priority = 10
parallel = false
group = "compile"
timeout = "2m"
retry = { max_attempts = 3, backoff = "500ms", jitter = 0.25 }
"#,
    );

    let manifest = load_and_validate(file.path()).unwrap();

    let settings = manifest.settings();
    assert_eq!(settings.max_concurrency, 4);
    assert_eq!(settings.default_timeout, Some(Duration::from_secs(30)));
    assert_eq!(
        settings.rate_limit,
        Some(RateLimit::new(10, Duration::from_secs(1)))
    );

    let config = manifest.executor_config();
    assert_eq!(config.max_concurrency, 4);
    assert!(!config.continue_on_failure);
    assert!(config.skip_dependents_of_failed);
    assert_eq!(config.dangling_policy, DanglingPolicy::Reject);
    assert_eq!(config.default_timeout, Some(Duration::from_secs(30)));

    let tasks = manifest.tasks();
    let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["build", "fetch"]);

    let build = &tasks[0];
    assert_eq!(build.label.as_deref(), Some("Build"));
    assert_eq!(build.dependencies, vec!["fetch".to_string()]);
    assert_eq!(build.priority, 10);
    assert_eq!(build.parallelizable, Some(false));
    assert_eq!(build.group.as_deref(), Some("compile"));
    assert_eq!(build.timeout, Some(Duration::from_secs(120)));
    let retry = build.retry.as_ref().unwrap();
    assert_eq!(retry.max_attempts, 3);
    assert_eq!(retry.backoff_base, Duration::from_millis(500));
    assert!((retry.jitter - 0.25).abs() < f64::EPSILON);

    let fetch = &tasks[1];
    assert_eq!(fetch.parallelizable, None);
    let default_retry = fetch.retry.as_ref().unwrap();
    assert_eq!(default_retry.max_attempts, 2);
    assert_eq!(default_retry.backoff_base, Duration::from_millis(100));
}

#[test]
fn cycle_returns_graph_error() {
    let file = manifest_file(
        r#"
[task.A]
cmd = "echo A"
after = ["B"]

[task.B]
cmd = "echo B"
after = ["A"]
"#,
    );

    match load_and_validate(file.path()) {
        Err(FlowdagError::Graph(GraphFault::CircularDependency(id))) => {
            assert!(id == "A" || id == "B");
        }
        other => panic!("expected cycle error, got {other:?}"),
    }
}

#[test]
fn self_dependency_is_a_config_error() {
    let result = ManifestBuilder::new()
        .with_task("A", TaskConfigBuilder::new("echo A").after("A").build())
        .try_build();

    match result {
        Err(FlowdagError::ConfigError(msg)) => assert!(msg.contains("itself")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn unknown_dependency_is_allowed_unless_strict() {
    let lenient = ManifestBuilder::new()
        .with_task("A", TaskConfigBuilder::new("echo A").after("ghost").build())
        .try_build();
    assert!(lenient.is_ok());

    let strict = ManifestBuilder::new()
        .strict_dependencies(true)
        .with_task("A", TaskConfigBuilder::new("echo A").after("ghost").build())
        .try_build();
    match strict {
        Err(FlowdagError::ConfigError(msg)) => assert!(msg.contains("ghost")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn bad_values_are_rejected() {
    let zero = ManifestBuilder::new()
        .max_concurrency(0)
        .with_task("A", TaskConfigBuilder::new("echo A").build())
        .try_build();
    assert!(matches!(zero, Err(FlowdagError::ConfigError(msg)) if msg.contains("max_concurrency")));

    let bad_timeout = ManifestBuilder::new()
        .with_task("A", TaskConfigBuilder::new("echo A").timeout("soon").build())
        .try_build();
    assert!(matches!(bad_timeout, Err(FlowdagError::ConfigError(msg)) if msg.contains("[task.A].timeout")));

    let bad_retry = ManifestBuilder::new()
        .with_task("A", TaskConfigBuilder::new("echo A").retry(0, "1s").build())
        .try_build();
    assert!(matches!(bad_retry, Err(FlowdagError::ConfigError(msg)) if msg.contains("max_attempts")));

    let empty = ManifestBuilder::new().try_build();
    assert!(matches!(empty, Err(FlowdagError::ConfigError(_))));
}

#[test]
fn jitter_outside_unit_interval_is_rejected() {
    let raw = parse_manifest(
        r#"
[default.retry]
max_attempts = 2
jitter = 1.5

[task.A]
cmd = "echo A"
"#,
    )
    .unwrap();

    match Manifest::try_from(raw) {
        Err(FlowdagError::ConfigError(msg)) => assert!(msg.contains("jitter")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn malformed_toml_is_a_toml_error() {
    let file = manifest_file("[task.A\ncmd = 1");
    assert!(matches!(
        load_and_validate(file.path()),
        Err(FlowdagError::TomlError(_))
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    assert!(matches!(
        load_and_validate(&path),
        Err(FlowdagError::IoError(_))
    ));
}

#[test]
fn duration_strings_parse_with_units() {
    assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
    assert_eq!(parse_duration(" 3s "), Ok(Duration::from_secs(3)));
    assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
    assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
    assert!(parse_duration("").is_err());
    assert!(parse_duration("10").is_err());
    assert!(parse_duration("5d").is_err());
    assert!(parse_duration("ms").is_err());
}

#[test]
fn builder_defaults_match_executor_defaults() {
    let manifest = ManifestBuilder::new()
        .with_task("only", TaskConfigBuilder::new("true").build())
        .build();

    let config = manifest.executor_config();
    assert_eq!(config.max_concurrency, 5);
    assert_eq!(config.min_concurrency, 1);
    assert!(config.continue_on_failure);
    assert!(config.auto_detect_parallel);
    assert_eq!(config.default_timeout, Some(Duration::from_secs(300)));
    assert!(config.rate_limit.is_none());
    assert!(manifest.tasks()[0].retry.is_none());
}

#[test]
fn default_timeout_can_be_disabled_or_left_at_the_default() {
    let disabled = ManifestBuilder::new()
        .default_timeout("none")
        .with_task("A", TaskConfigBuilder::new("echo A").build())
        .build();
    assert_eq!(disabled.settings().default_timeout, None);
    assert_eq!(disabled.executor_config().default_timeout, None);

    let unset = ManifestBuilder::new()
        .with_task("A", TaskConfigBuilder::new("echo A").build())
        .build();
    assert_eq!(unset.settings().default_timeout, Some(DEFAULT_TIMEOUT));

    let garbage = ManifestBuilder::new()
        .default_timeout("never")
        .with_task("A", TaskConfigBuilder::new("echo A").build())
        .try_build();
    assert!(matches!(garbage, Err(FlowdagError::ConfigError(msg)) if msg.contains("[config].default_timeout")));
}
