//! Integration tests for parallel fan-out

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use common::{failing_task, init_test_logging, ok_task, slow_task};
use taskrun_core::config::ParallelConfig;
use taskrun_core::{
    ExecutionContext, NoBackoff, ParallelCoordinator, ParallelTask, RetryPolicy, Task,
    TaskDescriptor, TaskError, TaskExecutor, TaskFn, TaskRef, TimeoutPolicy, WorkerPool,
};

#[tokio::test]
async fn test_single_failure_is_aggregated_without_short_circuit() {
    init_test_logging();
    info!("🧪 Testing parallel fan-out with one failing sibling");

    let ctx = ExecutionContext::new();
    let tasks = vec![
        slow_task("first", Duration::from_millis(20)),
        failing_task("second", "second exploded"),
        slow_task("third", Duration::from_millis(40)),
    ];

    let aggregate = ParallelCoordinator::default()
        .run_all(&tasks, &ctx)
        .await
        .unwrap_err();

    assert_eq!(aggregate.len(), 1);
    assert_eq!(aggregate.total, 3);
    let failure = &aggregate.failures[0];
    assert_eq!(failure.index, 1);
    assert_eq!(failure.task_name, "second");
    assert_eq!(failure.error.to_string(), "second exploded");

    assert!(ctx.contains_key("first.done"));
    assert!(ctx.contains_key("third.done"));
}

#[tokio::test]
async fn test_overall_timeout_cancels_slow_sibling() {
    let ctx = ExecutionContext::new();
    let tasks = vec![
        ok_task("fast"),
        slow_task("slow", Duration::from_secs(10)),
    ];

    let started = Instant::now();
    let aggregate = ParallelCoordinator::default()
        .with_timeout(TimeoutPolicy::Bounded(Duration::from_millis(100)))
        .run_all(&tasks, &ctx)
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(aggregate.timed_out);
    assert_eq!(aggregate.len(), 1);
    assert_eq!(aggregate.failures[0].task_name, "slow");
    assert!(matches!(aggregate.failures[0].error, TaskError::Cancelled));
    assert!(aggregate.to_string().contains("timed out"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!ctx.contains_key("slow.done"));
}

#[tokio::test]
async fn test_every_failure_is_reported_in_order() {
    let tasks = vec![
        failing_task("a", "a failed"),
        ok_task("b"),
        failing_task("c", "c failed"),
    ];

    let aggregate = ParallelCoordinator::default()
        .run_all(&tasks, &ExecutionContext::new())
        .await
        .unwrap_err();

    let names = aggregate
        .failures
        .iter()
        .map(|failure| failure.task_name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["a", "c"]);
    assert_eq!(aggregate.cancelled().count(), 0);
}

#[tokio::test]
async fn test_bounded_pool_limits_concurrency() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let tasks = (0..6)
        .map(|i| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            TaskFn::arc(format!("worker-{i}"), move |_ctx: ExecutionContext| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        })
        .collect::<Vec<_>>();

    let coordinator = ParallelCoordinator::from_config(&ParallelConfig {
        max_concurrency: Some(2),
        timeout_ms: None,
    });
    coordinator
        .run_all(&tasks, &ExecutionContext::new())
        .await
        .unwrap();

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(coordinator.pool().available_permits(), Some(2));
}

#[tokio::test]
async fn test_panicking_sibling_is_reported() {
    let tasks = vec![
        ok_task("calm"),
        TaskFn::arc("panicky", |_ctx: ExecutionContext| async {
            if true {
                panic!("sibling blew up");
            }
            Ok(())
        }),
    ];

    let aggregate = ParallelCoordinator::new(WorkerPool::new())
        .run_all(&tasks, &ExecutionContext::new())
        .await
        .unwrap_err();

    assert!(matches!(
        aggregate.failures[0].error,
        TaskError::Panicked { ref message } if message == "sibling blew up"
    ));
}

#[tokio::test]
async fn test_parallel_group_composes_with_retry() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let tasks: Vec<TaskRef> = vec![
        ok_task("steady"),
        TaskFn::arc("flaky", move |_ctx: ExecutionContext| {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if call < 2 {
                    Err(TaskError::failed("not yet"))
                } else {
                    Ok(())
                }
            }
        }),
    ];

    let group = ParallelTask::new("group", ParallelCoordinator::default(), tasks);
    assert_eq!(group.name(), "group");

    let descriptor =
        TaskDescriptor::new(Arc::new(group)).with_retry(RetryPolicy::new(3, NoBackoff));
    let report = TaskExecutor::new()
        .execute(&descriptor, &ExecutionContext::new())
        .await
        .unwrap();

    assert_eq!(report.attempts, 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn test_empty_group_and_shared_pool_outside_async_tests() {
    tokio_test::block_on(async {
        let coordinator = ParallelCoordinator::new(WorkerPool::bounded(1));
        tokio_test::assert_ok!(coordinator.run_all(&[], &ExecutionContext::new()).await);

        let tasks = vec![ok_task("one"), failing_task("two", "broken")];
        let aggregate =
            tokio_test::assert_err!(coordinator.run_all(&tasks, &ExecutionContext::new()).await);
        assert_eq!(aggregate.failures[0].index, 1);
        assert_eq!(coordinator.pool().available_permits(), Some(1));
    });
}

#[tokio::test]
async fn test_group_timeout_cancels_running_siblings() {
    let ctx = ExecutionContext::new();
    let group = ParallelTask::new(
        "group",
        ParallelCoordinator::default(),
        vec![slow_task("slow", Duration::from_millis(200))],
    );
    let descriptor = TaskDescriptor::new(Arc::new(group))
        .with_timeout(TimeoutPolicy::Bounded(Duration::from_millis(50)));

    let error = TaskExecutor::new()
        .execute(&descriptor, &ctx)
        .await
        .unwrap_err();
    assert!(error.is_timeout());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!ctx.contains_key("slow.done"));
}

#[tokio::test]
async fn test_dropped_join_cancels_siblings() {
    let ctx = ExecutionContext::new();
    let tasks = vec![
        slow_task("left", Duration::from_millis(150)),
        slow_task("right", Duration::from_millis(150)),
    ];
    let coordinator = ParallelCoordinator::default();

    let outcome =
        tokio::time::timeout(Duration::from_millis(30), coordinator.run_all(&tasks, &ctx)).await;
    assert!(outcome.is_err());

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!ctx.contains_key("left.done"));
    assert!(!ctx.contains_key("right.done"));
}
