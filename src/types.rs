use std::str::FromStr;

use serde::Deserialize;

/// How a [`WorkerPool`](crate::pool::WorkerPool) picks the worker for a new item.
///
/// - `RoundRobin`: cycle through workers in declaration order.
/// - `Random`: pick uniformly at random.
/// - `LeastBusy`: pick the worker with the fewest active operations; ties go
///   to the worker declared first (default).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BalanceStrategy {
    RoundRobin,
    Random,
    #[default]
    LeastBusy,
}

impl FromStr for BalanceStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "round-robin" => Ok(BalanceStrategy::RoundRobin),
            "random" => Ok(BalanceStrategy::Random),
            "least-busy" => Ok(BalanceStrategy::LeastBusy),
            other => Err(format!(
                "invalid balance strategy: {other} (expected \"round-robin\", \"random\" or \"least-busy\")"
            )),
        }
    }
}

/// What happens when a batch contains the same task id twice.
///
/// - `Reject` (default): planning fails with `GraphFault::DuplicateTask`.
/// - `Overwrite`: the later definition replaces the earlier one in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    #[default]
    Reject,
    Overwrite,
}

/// What happens when a task depends on an id that is not in the batch.
///
/// - `Ignore` (default): the dependency counts as already satisfied.
/// - `Reject`: planning fails with `GraphFault::UnknownDependency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DanglingPolicy {
    #[default]
    Ignore,
    Reject,
}
