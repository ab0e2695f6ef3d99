// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod pool;
pub mod types;

use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::exec::{
    BatchResult, ParallelExecutor, Task, TaskStatus, TracingSink, partition_by_group,
};

pub use crate::dag::{DependencyGraph, ExecutionPlan, GraphNode};
pub use crate::errors::{FlowdagError, GraphFault, TaskError};
pub use crate::exec::{ExecutorConfig, RetryPolicy, TaskResult};
pub use crate::pool::{PoolConfig, WorkItem, WorkerPool};

/// High-level entry point used by `main.rs`.
///
/// Loads the manifest, applies CLI overrides, then either prints the plan
/// (`--dry-run`) or runs the batch and prints a summary. Ctrl-C requests
/// cooperative cancellation.
pub async fn run(args: CliArgs) -> Result<()> {
    let manifest = load_and_validate(&args.config)?;

    let mut config = manifest.executor_config();
    if let Some(n) = args.max_concurrency {
        config = config.with_max_concurrency(n);
    }
    if args.fail_fast {
        config = config.with_continue_on_failure(false);
    }
    config = config.with_event_sink(Arc::new(TracingSink));

    let executor = Arc::new(ParallelExecutor::new(config));
    let tasks = manifest.tasks();

    if args.dry_run {
        print_dry_run(&executor, tasks, args.by_group)?;
        return Ok(());
    }

    {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            warn!("Ctrl+C received; cancelling tasks that have not started");
            executor.cancel();
        });
    }

    let batches: Vec<(String, BatchResult<String>)> = if args.by_group {
        executor.execute_by_group(tasks).await?.into_iter().collect()
    } else {
        vec![("batch".to_string(), executor.execute(tasks).await?)]
    };

    let mut unsuccessful = 0;
    for (name, batch) in &batches {
        print_summary(name, batch);
        unsuccessful += batch.failure_count + batch.cancelled_count;
    }

    info!(batches = batches.len(), unsuccessful, "run complete");
    if unsuccessful > 0 {
        bail!("{unsuccessful} task(s) failed or were cancelled");
    }
    Ok(())
}

fn print_dry_run(executor: &ParallelExecutor, tasks: Vec<Task<String>>, by_group: bool) -> Result<()> {
    println!("flowdag dry-run");
    println!("  config: {:?}", executor.config());
    println!();

    if by_group {
        for (group, members) in partition_by_group(tasks) {
            println!("group {group}:");
            print!("{}", executor.plan(&members)?);
        }
    } else {
        print!("{}", executor.plan(&tasks)?);
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}

fn print_summary(name: &str, batch: &BatchResult<String>) {
    println!(
        "{name} ({}): {} completed, {} failed, {} cancelled in {} ms (max parallelism {})",
        batch.batch_id,
        batch.success_count,
        batch.failure_count,
        batch.cancelled_count,
        batch.total_duration_ms(),
        batch.max_observed_parallelism
    );
    for result in &batch.results {
        match result.status {
            TaskStatus::Failed => {
                let error = result
                    .error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                println!(
                    "  {:<10} {} after {} attempt(s): {error}",
                    result.status, result.task_id, result.attempts
                );
            }
            _ => println!(
                "  {:<10} {} ({} ms)",
                result.status,
                result.task_id,
                result.duration_ms()
            ),
        }
    }
}
