//! In-process job queue and worker pool.
//!
//! Delivery is at-least-once: a dispatch that fails with a retryable error is
//! redelivered with exponential backoff up to `QueuePolicy::max_attempts`.
//! This retry layer is independent of the provider-fallback retries inside
//! the orchestrator: it exists for infrastructure failures (the repository
//! being unreachable), not for model failures. Duplicate deliveries are safe
//! because the dispatcher treats terminal jobs as a no-op on entry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Worth redelivering: the failure was in infrastructure, not the job.
    #[error("{0}")]
    Retryable(String),

    /// Redelivery cannot help; the queue only logs it.
    #[error("{0}")]
    Fatal(String),
}

/// Executes one delivery of a job id. Implemented by the orchestrator.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, job_id: Uuid) -> Result<(), DispatchError>;
}

/// Explicit, bounded queue-level retry policy.
#[derive(Debug, Clone)]
pub struct QueuePolicy {
    pub workers: usize,
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl QueuePolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * (1u32 << attempt.saturating_sub(1).min(16))
    }
}

#[derive(Debug, Clone, Copy)]
struct Delivery {
    job_id: Uuid,
    attempt: u32,
}

#[derive(Debug, Error)]
#[error("job queue is shut down")]
pub struct EnqueueError;

/// Handle for submitting job ids. Cloneable; workers run until the process
/// exits.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl JobQueue {
    /// Spawns the worker pool and returns the submission handle.
    pub fn start(dispatcher: Arc<dyn Dispatcher>, policy: QueuePolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));

        let workers = policy.workers.max(1);
        info!("Starting {workers} evaluation workers");
        for worker_id in 0..workers {
            tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&rx),
                tx.clone(),
                Arc::clone(&dispatcher),
                policy.clone(),
            ));
        }

        Self { tx }
    }

    /// Schedules an asynchronous evaluation of the given job id.
    pub fn enqueue(&self, job_id: Uuid) -> Result<(), EnqueueError> {
        self.tx
            .send(Delivery { job_id, attempt: 1 })
            .map_err(|_| EnqueueError)
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Delivery>>>,
    tx: mpsc::UnboundedSender<Delivery>,
    dispatcher: Arc<dyn Dispatcher>,
    policy: QueuePolicy,
) {
    loop {
        // Hold the lock only for the recv so siblings can pull work.
        let delivery = { rx.lock().await.recv().await };
        let Some(delivery) = delivery else {
            break;
        };

        debug!(
            "worker {worker_id}: dispatching job {} (attempt {})",
            delivery.job_id, delivery.attempt
        );

        match dispatcher.dispatch(delivery.job_id).await {
            Ok(()) => {}
            Err(DispatchError::Retryable(reason)) if delivery.attempt < policy.max_attempts => {
                let delay = policy.backoff(delivery.attempt);
                warn!(
                    "job {}: attempt {} failed ({reason}), redelivering in {}ms",
                    delivery.job_id,
                    delivery.attempt,
                    delay.as_millis()
                );
                let tx = tx.clone();
                let next = Delivery {
                    job_id: delivery.job_id,
                    attempt: delivery.attempt + 1,
                };
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(next);
                });
            }
            Err(e) => {
                error!(
                    "job {}: abandoned after attempt {}: {e}",
                    delivery.job_id, delivery.attempt
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Scripted dispatcher: pops one result per delivery, then succeeds.
    struct ScriptedDispatcher {
        script: StdMutex<VecDeque<Result<(), DispatchError>>>,
        calls: StdMutex<Vec<Uuid>>,
    }

    impl ScriptedDispatcher {
        fn new(script: Vec<Result<(), DispatchError>>) -> Arc<Self> {
            Arc::new(Self {
                script: StdMutex::new(script.into()),
                calls: StdMutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Dispatcher for ScriptedDispatcher {
        async fn dispatch(&self, job_id: Uuid) -> Result<(), DispatchError> {
            self.calls.lock().unwrap().push(job_id);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()))
        }
    }

    fn test_policy() -> QueuePolicy {
        QueuePolicy {
            workers: 2,
            max_attempts: 3,
            base_backoff: Duration::from_millis(5),
        }
    }

    async fn settle(dispatcher: &ScriptedDispatcher, expected: usize) {
        for _ in 0..100 {
            if dispatcher.call_count() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_successful_dispatch_runs_once() {
        let dispatcher = ScriptedDispatcher::new(vec![Ok(())]);
        let queue = JobQueue::start(dispatcher.clone(), test_policy());

        queue.enqueue(Uuid::new_v4()).unwrap();
        settle(&dispatcher, 1).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(dispatcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retryable_failure_is_redelivered_until_success() {
        let dispatcher = ScriptedDispatcher::new(vec![
            Err(DispatchError::Retryable("db down".into())),
            Ok(()),
        ]);
        let queue = JobQueue::start(dispatcher.clone(), test_policy());

        queue.enqueue(Uuid::new_v4()).unwrap();
        settle(&dispatcher, 2).await;

        assert_eq!(dispatcher.call_count(), 2);
    }

    #[tokio::test]
    async fn test_retry_stops_at_max_attempts() {
        let dispatcher = ScriptedDispatcher::new(vec![
            Err(DispatchError::Retryable("db down".into())),
            Err(DispatchError::Retryable("db down".into())),
            Err(DispatchError::Retryable("db down".into())),
            Err(DispatchError::Retryable("db down".into())),
        ]);
        let queue = JobQueue::start(dispatcher.clone(), test_policy());

        queue.enqueue(Uuid::new_v4()).unwrap();
        settle(&dispatcher, 3).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // max_attempts = 3: the third failure is abandoned, not redelivered.
        assert_eq!(dispatcher.call_count(), 3);
    }

    #[tokio::test]
    async fn test_fatal_failure_is_not_redelivered() {
        let dispatcher =
            ScriptedDispatcher::new(vec![Err(DispatchError::Fatal("bad job".into()))]);
        let queue = JobQueue::start(dispatcher.clone(), test_policy());

        queue.enqueue(Uuid::new_v4()).unwrap();
        settle(&dispatcher, 1).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(dispatcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_jobs_fan_out_across_workers() {
        let dispatcher = ScriptedDispatcher::new(vec![]);
        let queue = JobQueue::start(dispatcher.clone(), test_policy());

        for _ in 0..5 {
            queue.enqueue(Uuid::new_v4()).unwrap();
        }
        settle(&dispatcher, 5).await;

        assert_eq!(dispatcher.call_count(), 5);
    }
}
