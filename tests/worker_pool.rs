// tests/worker_pool.rs

mod common;
use crate::common::builders::RunLog;
use crate::common::probe::ProbeExecutor;
use crate::common::{init_tracing, with_timeout};

use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use flowdag::errors::FlowdagError;
use flowdag::exec::{BoundedExecutor, Slot};
use flowdag::pool::{PoolConfig, WorkItem, Worker, WorkerConfig, WorkerPool};
use flowdag::types::BalanceStrategy;

fn pool(strategy: BalanceStrategy, workers: &[(&str, usize)]) -> WorkerPool {
    WorkerPool::new(PoolConfig {
        workers: workers
            .iter()
            .map(|(id, n)| WorkerConfig::new(*id, *n))
            .collect(),
        balance_strategy: strategy,
    })
    .unwrap()
}

async fn occupy(pool: &WorkerPool, worker: &str, n: usize) -> Vec<Slot> {
    let mut slots = Vec::new();
    for _ in 0..n {
        slots.push(pool.worker(worker).unwrap().executor.acquire().await.unwrap());
    }
    slots
}

#[tokio::test]
async fn least_busy_routes_to_worker_with_fewest_active() {
    init_tracing();
    let pool = pool(BalanceStrategy::LeastBusy, &[("a", 5), ("b", 5), ("c", 5)]);

    let _a = occupy(&pool, "a", 3).await;
    let _b = occupy(&pool, "b", 1).await;
    let _c = occupy(&pool, "c", 2).await;

    let active: Vec<usize> = pool.stats().iter().map(|s| s.active).collect();
    assert_eq!(active, vec![3, 1, 2]);
    assert_eq!(pool.select_worker().id, "b");

    let item = WorkItem::new("probe", || async { Ok(42) });
    assert_eq!(with_timeout(pool.submit(item)).await.unwrap(), 42);
    assert_eq!(pool.total_active(), 6);
}

#[tokio::test]
async fn least_busy_ties_go_to_first_declared_worker() {
    let pool = pool(BalanceStrategy::LeastBusy, &[("a", 1), ("b", 1), ("c", 1)]);
    assert_eq!(pool.select_worker().id, "a");

    let _a = occupy(&pool, "a", 1).await;
    assert_eq!(pool.select_worker().id, "b");
}

#[tokio::test]
async fn round_robin_cycles_in_declaration_order() {
    let pool = pool(BalanceStrategy::RoundRobin, &[("a", 1), ("b", 1), ("c", 1)]);
    let picks: Vec<String> = (0..7).map(|_| pool.select_worker().id.clone()).collect();
    assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c", "a"]);
}

#[tokio::test]
async fn random_always_picks_an_existing_worker() {
    let pool = pool(BalanceStrategy::Random, &[("a", 1), ("b", 1)]);
    for _ in 0..50 {
        let id = pool.select_worker().id.clone();
        assert!(id == "a" || id == "b");
    }
}

#[tokio::test]
async fn submit_to_unknown_worker_fails() {
    let pool = pool(BalanceStrategy::LeastBusy, &[("a", 1)]);
    let item = WorkItem::new("x", || async { Ok(()) });

    match pool.submit_to("nope", item).await {
        Err(FlowdagError::WorkerNotFound(id)) => assert_eq!(id, "nope"),
        other => panic!("expected WorkerNotFound, got {other:?}"),
    }

    let item = WorkItem::new("y", || async { Ok("ran") });
    assert_eq!(pool.submit_to("a", item).await.unwrap(), "ran");
}

#[tokio::test]
async fn failing_item_reports_its_id() {
    let pool = pool(BalanceStrategy::LeastBusy, &[("a", 1)]);
    let item: WorkItem<()> = WorkItem::new("bad", || async { Err(anyhow!("broken item")) });

    match pool.submit(item).await {
        Err(FlowdagError::WorkItemFailed { id, source }) => {
            assert_eq!(id, "bad");
            assert!(source.to_string().contains("broken item"));
        }
        other => panic!("expected WorkItemFailed, got {other:?}"),
    }
    assert_eq!(pool.total_active(), 0);
}

#[tokio::test]
async fn submit_all_dispatches_by_priority_and_returns_input_order() {
    let log = RunLog::new();
    let pool = pool(BalanceStrategy::LeastBusy, &[("solo", 1)]);

    let item = |id: &'static str, priority: i32| {
        let log = log.clone();
        WorkItem::new(id, move || {
            let log = log.clone();
            async move {
                log.push(id);
                Ok(id.to_uppercase())
            }
        })
        .with_priority(priority)
    };

    let results = with_timeout(pool.submit_all(vec![
        item("low", 0),
        item("high", 10),
        item("mid", 5),
    ]))
    .await;

    let values: Vec<String> = results.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(values, vec!["LOW", "HIGH", "MID"]);
    assert_eq!(log.entries(), vec!["high", "mid", "low"]);
}

#[tokio::test]
async fn submit_all_respects_each_worker_bound() {
    let a = ProbeExecutor::new(2);
    let b = ProbeExecutor::new(2);
    let pool = WorkerPool::from_workers(
        vec![
            Worker::new("a", Arc::new(a.clone())),
            Worker::new("b", Arc::new(b.clone())),
        ],
        BalanceStrategy::RoundRobin,
    )
    .unwrap();

    let items: Vec<WorkItem<usize>> = (0..10)
        .map(|i| {
            WorkItem::new(format!("item-{i}"), move || async move {
                tokio::task::yield_now().await;
                Ok(i)
            })
        })
        .collect();

    let results = with_timeout(pool.submit_all(items)).await;
    let values: Vec<usize> = results.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(values, (0..10).collect::<Vec<_>>());

    assert_eq!(a.acquired(), 5);
    assert_eq!(b.acquired(), 5);
    assert!(a.peak() <= 2);
    assert!(b.peak() <= 2);
    assert_eq!(pool.total_pending(), 0);
}

#[test]
fn invalid_pool_configurations_are_rejected() {
    let empty = WorkerPool::new(PoolConfig::default());
    assert!(matches!(empty, Err(FlowdagError::ConfigError(_))));

    let dup = WorkerPool::new(PoolConfig {
        workers: vec![WorkerConfig::new("a", 1), WorkerConfig::new("a", 2)],
        balance_strategy: BalanceStrategy::RoundRobin,
    });
    assert!(matches!(dup, Err(FlowdagError::ConfigError(msg)) if msg.contains("duplicate")));

    let zero = WorkerPool::new(PoolConfig {
        workers: vec![WorkerConfig::new("a", 0)],
        balance_strategy: BalanceStrategy::LeastBusy,
    });
    assert!(matches!(zero, Err(FlowdagError::ConfigError(_))));
}

#[test]
fn balance_strategy_parses_from_strings() {
    assert_eq!(
        BalanceStrategy::from_str("round_robin").unwrap(),
        BalanceStrategy::RoundRobin
    );
    assert_eq!(
        BalanceStrategy::from_str("Least-Busy").unwrap(),
        BalanceStrategy::LeastBusy
    );
    assert_eq!(BalanceStrategy::from_str("random").unwrap(), BalanceStrategy::Random);
    assert!(BalanceStrategy::from_str("fastest").is_err());
    assert_eq!(BalanceStrategy::default(), BalanceStrategy::LeastBusy);
}

#[tokio::test]
async fn stats_expose_per_worker_counters() {
    let pool = pool(BalanceStrategy::LeastBusy, &[("a", 3), ("b", 1)]);
    let _held = occupy(&pool, "a", 2).await;

    let stats = pool.stats();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].id, "a");
    assert_eq!(stats[0].active, 2);
    assert_eq!(stats[0].max_concurrency, 3);
    assert_eq!(stats[1].active, 0);
    assert_eq!(pool.total_active(), 2);
}
