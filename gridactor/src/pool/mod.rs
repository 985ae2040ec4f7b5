//! Fixed-size worker pool for background lifecycle work.
//!
//! Used by the supervisor to run actor terminations off its own task, so a
//! slow `on_stop` never blocks message routing. A failed task is queued
//! again after the retry backoff until it succeeds or the pool shuts down.

use crate::error::ActorError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// A unit of work for the pool.
#[async_trait]
pub trait PoolTask: Send + 'static {
    /// Short label for logs.
    fn describe(&self) -> String;

    /// Run once. An error schedules a retry.
    async fn run(&mut self) -> Result<(), ActorError>;
}

type TaskQueue = Arc<Mutex<mpsc::UnboundedReceiver<Box<dyn PoolTask>>>>;

/// Handle to a running pool.
#[derive(Clone)]
pub struct WorkerPool {
    queue: mpsc::UnboundedSender<Box<dyn PoolTask>>,
    size: usize,
}

impl WorkerPool {
    /// Spawn `size` workers. They exit when `cancel` fires.
    pub fn start(size: usize, retry_backoff: Duration, cancel: CancellationToken) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let queue: TaskQueue = Arc::new(Mutex::new(rx));

        for worker in 0..size {
            tokio::spawn(run_worker(
                worker,
                queue.clone(),
                tx.clone(),
                retry_backoff,
                cancel.clone(),
            ));
        }
        tracing::debug!(workers = size, "worker pool started");

        Self { queue: tx, size }
    }

    /// Queue a task for the next free worker.
    pub fn process_async(&self, task: Box<dyn PoolTask>) -> Result<(), ActorError> {
        self.queue.send(task).map_err(|_| ActorError::ShuttingDown)
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

async fn run_worker(
    worker: usize,
    queue: TaskQueue,
    resubmit: mpsc::UnboundedSender<Box<dyn PoolTask>>,
    backoff: Duration,
    cancel: CancellationToken,
) {
    loop {
        let next = {
            let mut rx = queue.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => return,
                task = rx.recv() => task,
            }
        };
        let Some(mut task) = next else { return };

        if let Err(e) = task.run().await {
            tracing::warn!(
                worker,
                task = %task.describe(),
                error = %e,
                backoff_ms = backoff.as_millis() as u64,
                "pool task failed, resubmitting"
            );
            let resubmit = resubmit.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(backoff) => {
                        let _ = resubmit.send(task);
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    struct Flaky {
        failures_left: usize,
        attempts: Arc<AtomicUsize>,
        done: Option<oneshot::Sender<()>>,
    }

    #[async_trait]
    impl PoolTask for Flaky {
        fn describe(&self) -> String {
            "flaky".to_string()
        }

        async fn run(&mut self) -> Result<(), ActorError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(ActorError::handler("not yet"));
            }
            if let Some(done) = self.done.take() {
                let _ = done.send(());
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_task_is_retried() {
        let cancel = CancellationToken::new();
        let pool = WorkerPool::start(2, Duration::from_secs(5), cancel.clone());
        let attempts = Arc::new(AtomicUsize::new(0));
        let (done, rx) = oneshot::channel();

        pool.process_async(Box::new(Flaky {
            failures_left: 2,
            attempts: attempts.clone(),
            done: Some(done),
        }))
        .unwrap();

        rx.await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_tasks_run_concurrently_up_to_pool_size() {
        struct Gate {
            entered: Arc<AtomicUsize>,
            release: Arc<tokio::sync::Notify>,
        }

        #[async_trait]
        impl PoolTask for Gate {
            fn describe(&self) -> String {
                "gate".to_string()
            }

            async fn run(&mut self) -> Result<(), ActorError> {
                self.entered.fetch_add(1, Ordering::SeqCst);
                self.release.notified().await;
                Ok(())
            }
        }

        let cancel = CancellationToken::new();
        let pool = WorkerPool::start(2, Duration::from_millis(10), cancel.clone());
        let entered = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(tokio::sync::Notify::new());

        for _ in 0..3 {
            pool.process_async(Box::new(Gate {
                entered: entered.clone(),
                release: release.clone(),
            }))
            .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(entered.load(Ordering::SeqCst), 2);
        cancel.cancel();
    }
}
