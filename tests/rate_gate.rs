// tests/rate_gate.rs

mod common;
use crate::common::builders::{RunLog, logged_task};
use crate::common::init_tracing;

use std::sync::Arc;
use std::time::Duration;

use flowdag::exec::{ExecutorConfig, ParallelExecutor, RateGate, RateLimit, WindowRateGate};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn window_gate_admits_max_requests_per_window() {
    init_tracing();
    let gate = WindowRateGate::new(RateLimit::new(2, Duration::from_secs(1)));
    let started = Instant::now();

    let mut offsets = Vec::new();
    for _ in 0..5 {
        gate.acquire().await;
        offsets.push(started.elapsed().as_millis());
    }

    assert_eq!(offsets, vec![0, 0, 1000, 1000, 2000]);
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_share_the_window() {
    let gate = Arc::new(WindowRateGate::new(RateLimit::new(3, Duration::from_millis(500))));
    let started = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let gate = Arc::clone(&gate);
        handles.push(tokio::spawn(async move {
            gate.acquire().await;
            started.elapsed()
        }));
    }

    let mut admitted = Vec::new();
    for h in handles {
        admitted.push(h.await.unwrap());
    }

    let early = admitted.iter().filter(|d| **d < Duration::from_millis(500)).count();
    assert_eq!(early, 3);
    assert!(admitted.iter().all(|d| *d < Duration::from_millis(1000)));
}

#[test]
fn zero_request_limit_is_clamped() {
    let gate = WindowRateGate::new(RateLimit::new(0, Duration::from_secs(1)));
    assert_eq!(gate.limit().max_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn executor_paces_task_starts_through_rate_limit() {
    let log = RunLog::new();
    let executor = ParallelExecutor::new(
        ExecutorConfig::default().with_rate_limit(RateLimit::new(1, Duration::from_millis(100))),
    );

    let started = Instant::now();
    let batch = executor
        .execute(vec![
            logged_task("a", &log),
            logged_task("b", &log),
            logged_task("c", &log),
        ])
        .await
        .unwrap();

    assert_eq!(batch.success_count, 3);
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(started.elapsed() < Duration::from_millis(300));
}
