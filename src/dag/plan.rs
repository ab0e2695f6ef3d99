// src/dag/plan.rs

//! Dry-run view of how a batch would be executed.

use std::fmt;

use crate::exec::TaskId;

/// Ordered phases plus a few diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    /// Phase `k` only starts once every task in phases `0..k` has terminated.
    pub phases: Vec<Vec<TaskId>>,
    /// Tasks resolved as non-parallelizable; each occupies a phase alone.
    pub sequential_tasks: Vec<TaskId>,
    /// Largest phase size divided by total task count (0.0 for an empty plan).
    pub parallelism_factor: f64,
}

impl ExecutionPlan {
    pub fn new(phases: Vec<Vec<TaskId>>, sequential_tasks: Vec<TaskId>) -> Self {
        let total: usize = phases.iter().map(Vec::len).sum();
        let widest = phases.iter().map(Vec::len).max().unwrap_or(0);
        let parallelism_factor = if total == 0 {
            0.0
        } else {
            widest as f64 / total as f64
        };
        Self {
            phases,
            sequential_tasks,
            parallelism_factor,
        }
    }

    pub fn total_tasks(&self) -> usize {
        self.phases.iter().map(Vec::len).sum()
    }

    pub fn max_phase_size(&self) -> usize {
        self.phases.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Index of the phase containing `id`.
    pub fn phase_of(&self, id: &str) -> Option<usize> {
        self.phases
            .iter()
            .position(|phase| phase.iter().any(|t| t == id))
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "execution plan: {} task(s) in {} phase(s), parallelism factor {:.2}",
            self.total_tasks(),
            self.phases.len(),
            self.parallelism_factor
        )?;
        for (i, phase) in self.phases.iter().enumerate() {
            writeln!(f, "  phase {}: {}", i + 1, phase.join(", "))?;
        }
        if !self.sequential_tasks.is_empty() {
            writeln!(f, "  sequential: {}", self.sequential_tasks.join(", "))?;
        }
        Ok(())
    }
}
