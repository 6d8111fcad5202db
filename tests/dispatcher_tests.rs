//! Dispatcher behavior: history accounting, terminator semantics, error
//! capture, and worker-pool tuning.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use swarm_exec::exec::{Dispatcher, Submission, Task, TaskError, TaskKind};

/// Poll until the history holds `expected` outputs, failing after a couple
/// of seconds.
async fn wait_for_history<T: Clone + Send + Sync + 'static>(
    dispatcher: &Dispatcher<T>,
    expected: usize,
) {
    for _ in 0..200 {
        if dispatcher.history_len().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "history never reached {expected} outputs (got {})",
        dispatcher.history_len().await
    );
}

#[tokio::test]
async fn every_valid_task_produces_one_output() {
    let dispatcher: Dispatcher<usize> = Dispatcher::new(2);
    for i in 0..10 {
        dispatcher.submit(Task::sync(move || Ok(i)));
    }
    wait_for_history(&dispatcher, 10).await;

    let history = dispatcher.history().await;
    assert_eq!(history.len(), 10);
    assert!(history.iter().all(|o| o.returned.is_ok()));
    dispatcher.stop().await;
}

#[tokio::test]
async fn mixed_sync_and_async_tasks_all_complete() {
    let dispatcher: Dispatcher<&'static str> = Dispatcher::new(2);
    dispatcher.submit(Task::sync(|| Ok("sync")));
    dispatcher.submit(Task::future(async { Ok("async") }));
    dispatcher.submit(Task::sync(|| Ok("sync")));
    wait_for_history(&dispatcher, 3).await;
    dispatcher.stop().await;
}

#[tokio::test]
async fn async_task_overtakes_slow_blocking_task() {
    let dispatcher: Dispatcher<&'static str> = Dispatcher::new(1);
    dispatcher.submit(
        Task::sync(|| {
            std::thread::sleep(Duration::from_millis(200));
            Ok("slow-sync")
        })
        .with_desc("slow"),
    );
    dispatcher.submit(Task::future(async { Ok("fast-async") }).with_desc("fast"));
    wait_for_history(&dispatcher, 2).await;

    // History is completion-ordered, so the async task lands first.
    let history = dispatcher.history().await;
    assert_eq!(history[0].returned, Ok("fast-async"));
    assert_eq!(history[1].returned, Ok("slow-sync"));
    dispatcher.stop().await;
}

#[tokio::test]
async fn blocking_tasks_complete_in_submission_order() {
    // Two pool slots, but blocking tasks still finish one after another.
    let dispatcher: Dispatcher<&'static str> = Dispatcher::new(2);
    dispatcher.submit(
        Task::sync(|| {
            std::thread::sleep(Duration::from_millis(200));
            Ok("first")
        })
        .with_desc("slow"),
    );
    dispatcher.submit(Task::sync(|| Ok("second")).with_desc("quick"));
    wait_for_history(&dispatcher, 2).await;

    let history = dispatcher.history().await;
    assert_eq!(history[0].returned, Ok("first"));
    assert_eq!(history[1].returned, Ok("second"));
    dispatcher.stop().await;
}

#[tokio::test]
async fn failing_task_is_captured_not_fatal() {
    let dispatcher: Dispatcher<i32> = Dispatcher::new(2);
    dispatcher.submit(Task::sync(|| Err(TaskError::failed("boom"))));
    dispatcher.submit(Task::sync(|| Ok(42)));
    wait_for_history(&dispatcher, 2).await;

    let history = dispatcher.history().await;
    assert!(history
        .iter()
        .any(|o| o.returned == Err(TaskError::Failed("boom".to_string()))));
    assert!(history.iter().any(|o| o.returned == Ok(42)));
    dispatcher.stop().await;
}

#[tokio::test]
async fn panicking_tasks_are_captured() {
    let dispatcher: Dispatcher<i32> = Dispatcher::new(2);
    dispatcher.submit(Task::sync(|| -> Result<i32, TaskError> {
        panic!("sync kaboom")
    }));
    dispatcher.submit(Task::future(async { panic!("async kaboom") }));
    dispatcher.submit(Task::sync(|| Ok(1)));
    wait_for_history(&dispatcher, 3).await;

    let history = dispatcher.history().await;
    let panics = history
        .iter()
        .filter(|o| matches!(o.returned, Err(TaskError::Panicked(_))))
        .count();
    assert_eq!(panics, 2);
    assert!(history.iter().any(|o| o.returned == Ok(1)));
    dispatcher.stop().await;
}

#[tokio::test]
async fn terminator_prevents_later_items_from_running() {
    let dispatcher: Dispatcher<i32> = Dispatcher::new(2);
    // The terminator is queued first, so the task behind it must never run.
    dispatcher.submit(Submission::Shutdown);
    dispatcher.submit(Task::sync(|| Ok(7)));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(dispatcher.history_len().await, 0);
    dispatcher.stop().await;
    assert_eq!(dispatcher.history_len().await, 0);
}

#[tokio::test]
async fn submit_after_stop_is_a_noop() {
    let dispatcher: Dispatcher<i32> = Dispatcher::new(2);
    dispatcher.submit(Task::sync(|| Ok(1)));
    wait_for_history(&dispatcher, 1).await;
    dispatcher.stop().await;

    dispatcher.submit(Task::sync(|| Ok(2)));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(dispatcher.history_len().await, 1);
}

#[tokio::test]
async fn stop_is_idempotent() {
    let dispatcher: Dispatcher<i32> = Dispatcher::new(2);
    dispatcher.submit(Task::sync(|| Ok(5)));
    dispatcher.stop().await;
    dispatcher.stop().await;
    dispatcher.stop().await;
}

#[tokio::test]
async fn stop_waits_for_inflight_work() {
    let dispatcher: Dispatcher<i32> = Dispatcher::new(2);
    dispatcher.submit(Task::sync(|| {
        std::thread::sleep(Duration::from_millis(100));
        Ok(9)
    }));
    // Give the loop a moment to dequeue and start the task.
    tokio::time::sleep(Duration::from_millis(20)).await;
    dispatcher.stop().await;

    // No cancellation mid-task: the started task finished and was recorded.
    let history = dispatcher.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].returned, Ok(9));
}

#[tokio::test]
async fn batch_submission_runs_every_task() {
    let dispatcher: Dispatcher<usize> = Dispatcher::new(4);
    let batch: Vec<Task<usize>> = (0..5).map(|i| Task::sync(move || Ok(i))).collect();
    dispatcher.submit(batch);
    wait_for_history(&dispatcher, 5).await;
    dispatcher.stop().await;
}

#[tokio::test]
async fn worker_pool_bounds_blocking_concurrency() {
    let dispatcher: Dispatcher<()> = Dispatcher::new(1);
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for _ in 0..4 {
        let current = current.clone();
        let peak = peak.clone();
        dispatcher.submit(Task::sync(move || {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(30));
            current.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }));
    }
    wait_for_history(&dispatcher, 4).await;

    // Single-slot pool: blocking tasks never overlapped.
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    dispatcher.stop().await;
}

#[tokio::test]
async fn set_max_workers_applies_to_future_tasks() {
    let dispatcher: Dispatcher<()> = Dispatcher::new(1);
    assert_eq!(dispatcher.max_workers(), 1);
    dispatcher.set_max_workers(3);
    assert_eq!(dispatcher.max_workers(), 3);

    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let current = current.clone();
        let peak = peak.clone();
        dispatcher.submit(Task::sync(move || {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            current.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }));
    }
    wait_for_history(&dispatcher, 3).await;
    assert!(peak.load(Ordering::SeqCst) <= 3);
    dispatcher.stop().await;
}

#[tokio::test]
async fn clear_empties_the_history() {
    let dispatcher: Dispatcher<i32> = Dispatcher::new(2);
    dispatcher.submit(Task::sync(|| Ok(1)));
    wait_for_history(&dispatcher, 1).await;
    dispatcher.clear().await;
    assert_eq!(dispatcher.history_len().await, 0);
    dispatcher.stop().await;
}

#[tokio::test]
async fn output_keeps_task_metadata() {
    let dispatcher: Dispatcher<i32> = Dispatcher::new(2);
    dispatcher.submit(Task::sync(|| Ok(3)).with_desc("compute three"));
    wait_for_history(&dispatcher, 1).await;

    let history = dispatcher.history().await;
    assert_eq!(history[0].task.desc.as_deref(), Some("compute three"));
    assert_eq!(history[0].task.kind, TaskKind::Sync);
    dispatcher.stop().await;
}
