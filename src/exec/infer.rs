// src/exec/infer.rs

//! Heuristic used when a task does not say whether it may run in parallel.
//!
//! Advisory only: callers should set `parallelizable` explicitly whenever
//! they know. The heuristic exists so that ad-hoc batches are safe by default.

use std::sync::LazyLock;

use regex::Regex;

use super::task::Task;

/// Substrings (case-insensitive) in a task id or label that signal exclusivity.
pub const EXCLUSIVE_MARKERS: &[&str] = &[
    "sequential",
    "sync",
    "blocking",
    "exclusive",
    "serial",
    "atomic",
    "transaction",
    "migration",
    "deploy",
];

static EXCLUSIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = EXCLUSIVE_MARKERS.join("|");
    Regex::new(&format!("(?i)({alternation})")).expect("static marker regex is valid")
});

/// Whether `text` contains one of the [`EXCLUSIVE_MARKERS`].
pub fn looks_exclusive(text: &str) -> bool {
    EXCLUSIVE_RE.is_match(text)
}

/// Infer the parallelizable flag for a task whose flag is unset.
///
/// - no dependencies: parallelizable
/// - id or label contains an exclusivity marker: sequential
/// - otherwise: parallelizable
pub fn infer_parallelizable(id: &str, label: Option<&str>, dependency_count: usize) -> bool {
    if dependency_count == 0 {
        return true;
    }
    !(looks_exclusive(id) || label.is_some_and(looks_exclusive))
}

/// Resolve the effective flag: explicit value wins, then (optionally) the
/// heuristic, otherwise parallelizable.
pub fn resolve_parallelizable<T>(task: &Task<T>, auto_detect: bool) -> bool {
    match task.parallelizable {
        Some(explicit) => explicit,
        None if auto_detect => {
            infer_parallelizable(&task.id, task.label.as_deref(), task.dependencies.len())
        }
        None => true,
    }
}
