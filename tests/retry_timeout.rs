// tests/retry_timeout.rs

mod common;
use crate::common::builders::flaky_task;
use crate::common::{init_tracing, status_of};

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use flowdag::errors::TaskError;
use flowdag::exec::{
    ChannelSink, ExecutorConfig, ParallelExecutor, RetryPolicy, Task, TaskEvent, TaskStatus,
};
use tokio::time::Instant;

fn counted_failure(id: &str, calls: &Arc<AtomicUsize>) -> Task<()> {
    let calls = Arc::clone(calls);
    Task::new(id, move || {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("nope"))
        }
    })
}

#[tokio::test(start_paused = true)]
async fn always_failing_task_is_invoked_max_attempts_times() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let executor = ParallelExecutor::default();

    let task = counted_failure("X", &calls).with_retry(RetryPolicy::new(3, Duration::from_millis(5)));
    let batch = executor.execute(vec![task]).await.unwrap();

    let result = batch.result("X").unwrap();
    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(result.attempts, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(result.error, Some(TaskError::Failed("nope".to_string())));
}

#[tokio::test(start_paused = true)]
async fn two_attempt_policy_reports_two_attempts() {
    let calls = Arc::new(AtomicUsize::new(0));
    let executor = ParallelExecutor::default();

    let task = counted_failure("X", &calls).with_retry(RetryPolicy::new(2, Duration::ZERO));
    let batch = executor.execute(vec![task]).await.unwrap();

    assert_eq!(status_of(&batch, "X"), TaskStatus::Failed);
    assert_eq!(batch.result("X").unwrap().attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn flaky_task_succeeds_once_failures_are_exhausted() {
    let calls = Arc::new(AtomicUsize::new(0));
    let executor = ParallelExecutor::default();

    let task = flaky_task("flaky", 2, &calls).with_retry(RetryPolicy::new(5, Duration::from_millis(1)));
    let batch = executor.execute(vec![task]).await.unwrap();

    let result = batch.result("flaky").unwrap();
    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.attempts, 3);
    assert_eq!(result.value, Some(3));
    assert!(result.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn backoff_is_linear_in_the_attempt_number() {
    let calls = Arc::new(AtomicUsize::new(0));
    let executor = ParallelExecutor::new(ExecutorConfig::default().with_default_timeout(None));

    let task = counted_failure("slow", &calls).with_retry(RetryPolicy::new(3, Duration::from_millis(100)));

    let started = Instant::now();
    executor.execute(vec![task]).await.unwrap();
    let elapsed = started.elapsed();

    // 100ms after attempt 1, 200ms after attempt 2, nothing after the last.
    assert!(elapsed >= Duration::from_millis(300), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(400), "elapsed {elapsed:?}");
}

#[test]
fn delay_after_scales_with_attempt_and_jitter_stays_bounded() {
    let policy = RetryPolicy::new(4, Duration::from_millis(100));
    assert_eq!(policy.delay_after(1), Duration::from_millis(100));
    assert_eq!(policy.delay_after(3), Duration::from_millis(300));

    let jittered = policy.clone().with_jitter(0.5);
    for _ in 0..50 {
        let d = jittered.delay_after(2);
        assert!(d >= Duration::from_millis(200) && d <= Duration::from_millis(300));
    }

    assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    assert_eq!(RetryPolicy::none().max_attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn retry_predicate_can_veto_retries() {
    let calls = Arc::new(AtomicUsize::new(0));
    let executor = ParallelExecutor::default();

    let policy = RetryPolicy::new(5, Duration::from_millis(1)).with_predicate(TaskError::is_timeout);
    let task = counted_failure("picky", &calls).with_retry(policy);
    let batch = executor.execute(vec![task]).await.unwrap();

    assert_eq!(batch.result("picky").unwrap().attempts, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_operation_times_out_and_is_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let executor = ParallelExecutor::default();

    let task = {
        let calls = Arc::clone(&calls);
        Task::new("sleepy", move || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        })
        .with_timeout(Duration::from_secs(1))
        .with_retry(RetryPolicy::new(2, Duration::ZERO).with_predicate(TaskError::is_timeout))
    };

    let batch = executor.execute(vec![task]).await.unwrap();
    let result = batch.result("sleepy").unwrap();

    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(result.attempts, 2);
    assert_eq!(result.error, Some(TaskError::Timeout(Duration::from_secs(1))));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn executor_default_timeout_applies_without_task_override() {
    let executor = ParallelExecutor::new(
        ExecutorConfig::default().with_default_timeout(Some(Duration::from_millis(250))),
    );

    let task: Task<()> = Task::new("hang", || async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    });
    let quick: Task<()> = Task::new("quick", || async { Ok(()) })
        .with_timeout(Duration::from_secs(10));

    let batch = executor.execute(vec![task, quick]).await.unwrap();

    assert_eq!(
        batch.result("hang").unwrap().error,
        Some(TaskError::Timeout(Duration::from_millis(250)))
    );
    assert_eq!(status_of(&batch, "quick"), TaskStatus::Completed);
}

#[tokio::test]
async fn panics_are_retried_like_failures() {
    let calls = Arc::new(AtomicUsize::new(0));
    let executor = ParallelExecutor::default();

    let task: Task<()> = {
        let calls = Arc::clone(&calls);
        Task::new("panicky", move || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 10 {
                    panic!("attempt {n} panicked");
                }
                Ok(())
            }
        })
        .with_retry(RetryPolicy::new(2, Duration::ZERO))
    };

    let batch = executor.execute(vec![task]).await.unwrap();
    let result = batch.result("panicky").unwrap();

    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(result.attempts, 2);
    assert_eq!(result.error, Some(TaskError::Panicked("attempt 1 panicked".to_string())));
}

#[tokio::test(start_paused = true)]
async fn cancel_during_backoff_ends_task_with_cancelled_event() {
    let (sink, mut rx) = ChannelSink::channel();
    let executor = Arc::new(ParallelExecutor::new(
        ExecutorConfig::default().with_event_sink(Arc::new(sink)),
    ));
    let calls = Arc::new(AtomicUsize::new(0));

    let canceller = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            executor.cancel();
        })
    };

    let task = counted_failure("x", &calls).with_retry(RetryPolicy::new(3, Duration::from_millis(100)));
    let batch = executor.execute(vec![task]).await.unwrap();
    canceller.await.unwrap();

    let result = batch.result("x").unwrap();
    assert_eq!(result.status, TaskStatus::Cancelled);
    assert_eq!(result.attempts, 1);
    assert_eq!(result.error, None);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    let names: Vec<&str> = events.iter().map(TaskEvent::name).collect();
    assert_eq!(
        names,
        vec!["batch.start", "task.start", "task.retry", "task.cancelled", "batch.complete"]
    );
    assert!(events.iter().any(|e| matches!(
        e,
        TaskEvent::TaskCancelled { task_id, attempts: 1, last_error: Some(TaskError::Failed(msg)), .. }
            if task_id == "x" && msg == "nope"
    )));
}
