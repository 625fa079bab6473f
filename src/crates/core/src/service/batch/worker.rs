//! Bounded worker pool
//!
//! Fixed-concurrency processor over a shared FIFO queue with cooperative
//! cancellation. Every pulled item is recorded on the task, including
//! processor failures.

use super::task::{BatchTask, RecordOutcome};
use log::debug;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// Run `processor` over `items` with at most `concurrency` concurrent
/// invocations. Workers stop when the queue drains or the task is
/// cancelled; cancellation never preempts an in-flight call. After all
/// workers drain, a cancelled task is moved to its terminal state; an
/// uncancelled one is left running for the caller to `finish`.
pub async fn run_in_batches<T, F, Fut>(
    items: Vec<T>,
    task: Arc<BatchTask>,
    processor: F,
    concurrency: usize,
) where
    T: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<RecordOutcome>> + Send + 'static,
{
    let worker_count = concurrency.max(1).min(items.len());
    let queue = Arc::new(Mutex::new(VecDeque::from(items)));

    let mut handles = Vec::with_capacity(worker_count);
    for worker in 0..worker_count {
        let queue = queue.clone();
        let task = task.clone();
        let processor = processor.clone();
        handles.push(tokio::spawn(async move {
            loop {
                if task.is_cancelled() {
                    debug!("worker {} stopping: task {} cancelled", worker, task.id());
                    break;
                }
                let item = {
                    let mut queue = queue.lock().unwrap_or_else(|p| p.into_inner());
                    queue.pop_front()
                };
                let Some(item) = item else {
                    break;
                };
                match processor(item).await {
                    Ok(outcome) => task.record(outcome),
                    Err(e) => task.record(RecordOutcome {
                        ok: false,
                        error: Some(e.to_string()),
                        ..RecordOutcome::default()
                    }),
                }
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    if task.is_cancelled() {
        task.finish_cancelled();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::batch::task::{TaskEvent, TaskStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_processes_all_items() {
        let task = BatchTask::new(10);
        let items: Vec<u32> = (0..10).collect();
        run_in_batches(
            items,
            task.clone(),
            |n| async move {
                Ok(RecordOutcome::succeeded(format!("item-{}", n)))
            },
            3,
        )
        .await;

        let snapshot = task.snapshot();
        assert_eq!(snapshot.processed, 10);
        assert_eq!(snapshot.ok, 10);
        // The pool does not finish an uncancelled task
        assert_eq!(snapshot.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_concurrency_bound_is_respected() {
        let task = BatchTask::new(20);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let active_cb = active.clone();
        let peak_cb = peak.clone();
        run_in_batches(
            (0..20).collect::<Vec<u32>>(),
            task.clone(),
            move |n| {
                let active = active_cb.clone();
                let peak = peak_cb.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(RecordOutcome::succeeded(format!("{}", n)))
                }
            },
            4,
        )
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(task.snapshot().processed, 20);
    }

    #[tokio::test]
    async fn test_processor_error_is_recorded_as_failure() {
        let task = BatchTask::new(2);
        let mut sub = task.subscribe();
        run_in_batches(
            vec![1u32, 2u32],
            task.clone(),
            |n| async move {
                if n == 2 {
                    anyhow::bail!("item {} exploded", n);
                }
                Ok(RecordOutcome::succeeded("1"))
            },
            1,
        )
        .await;

        let snapshot = task.snapshot();
        assert_eq!(snapshot.processed, 2);
        assert_eq!(snapshot.ok, 1);
        assert_eq!(snapshot.fail, 1);

        // FIFO order: the failure event is the second one
        let _first = sub.receiver.recv().await.unwrap();
        match sub.receiver.recv().await.unwrap() {
            TaskEvent::Progress { error: Some(e), .. } => {
                assert!(e.contains("item 2 exploded"));
            }
            other => panic!("expected failure progress event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation_stops_between_items() {
        let task = BatchTask::new(100);
        let task_to_cancel = task.clone();
        run_in_batches(
            (0..100).collect::<Vec<u32>>(),
            task.clone(),
            move |n| {
                let task = task_to_cancel.clone();
                async move {
                    if n == 3 {
                        task.cancel();
                    }
                    Ok(RecordOutcome::succeeded(format!("{}", n)))
                }
            },
            1,
        )
        .await;

        let snapshot = task.snapshot();
        // In-flight item 3 completed and was recorded, nothing after ran
        assert_eq!(snapshot.processed, 4);
        assert_eq!(snapshot.status, TaskStatus::Cancelled);
        match task.final_event().unwrap() {
            TaskEvent::Cancelled { processed, .. } => assert_eq!(processed, 4),
            other => panic!("expected cancelled event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_worker_count_capped_by_items() {
        let task = BatchTask::new(2);
        run_in_batches(
            vec![1u32, 2u32],
            task.clone(),
            |n| async move { Ok(RecordOutcome::succeeded(format!("{}", n))) },
            16,
        )
        .await;
        assert_eq!(task.snapshot().processed, 2);
    }

    #[tokio::test]
    async fn test_empty_queue_drains_immediately() {
        let task = BatchTask::new(0);
        run_in_batches(
            Vec::<u32>::new(),
            task.clone(),
            |_| async move { Ok(RecordOutcome::default()) },
            5,
        )
        .await;
        assert_eq!(task.snapshot().processed, 0);
        assert_eq!(task.snapshot().status, TaskStatus::Running);
    }
}
