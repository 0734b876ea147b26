// Queue Transport Port (Interface)

use crate::domain::QueuedJob;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Queue used when neither the caller nor the job names one
pub const DEFAULT_QUEUE: &str = "default";

/// Pick the queue a job lands on: explicit argument, then the job's own, then default
pub fn resolve_queue(explicit: Option<&str>, job: &QueuedJob) -> String {
    explicit
        .or(job.queue.as_deref())
        .unwrap_or(DEFAULT_QUEUE)
        .to_string()
}

/// A job popped from the queue and held until acknowledged
#[derive(Debug, Clone)]
pub struct ReservedJob {
    pub receipt: i64,
    pub queue: String,
    pub job: QueuedJob,
}

/// Fire-and-forget enqueue plus the worker-side pop/ack pair
#[async_trait]
pub trait QueueTransport: Send + Sync {
    async fn push(&self, job: &QueuedJob, queue: Option<&str>) -> Result<()>;

    /// Enqueue several jobs; adapters that can should make this all-or-nothing
    async fn bulk_push(&self, jobs: &[QueuedJob], queue: Option<&str>) -> Result<()> {
        for job in jobs {
            self.push(job, queue).await?;
        }
        Ok(())
    }

    /// Enqueue with the job hidden until `delay` elapses
    async fn later(&self, job: &QueuedJob, delay: Duration, queue: Option<&str>) -> Result<()>;

    /// Reserve the next available job on `queue`
    async fn pop(&self, queue: &str) -> Result<Option<ReservedJob>>;

    /// Remove a reserved job for good
    async fn acknowledge(&self, reserved: &ReservedJob) -> Result<()>;
}

pub(crate) fn queue_error(message: impl Into<String>) -> AppError {
    AppError::Queue(message.into())
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// One enqueue as seen by the transport
    #[derive(Debug, Clone)]
    pub struct PushRecord {
        pub queue: String,
        pub job: QueuedJob,
        pub delay: Option<Duration>,
    }

    #[derive(Default)]
    struct State {
        ready: HashMap<String, VecDeque<QueuedJob>>,
        history: Vec<PushRecord>,
        acknowledged: Vec<String>,
        next_receipt: i64,
    }

    /// FIFO queues in memory; delays are recorded, not enforced
    #[derive(Default)]
    pub struct InMemoryQueue {
        state: Mutex<State>,
        fail_after: Option<usize>,
    }

    impl InMemoryQueue {
        pub fn new() -> Self {
            Self::default()
        }

        /// Accept `n` pushes, then reject every later one
        pub fn failing_after(n: usize) -> Self {
            Self {
                state: Mutex::new(State::default()),
                fail_after: Some(n),
            }
        }

        /// Every push so far, in order
        pub fn pushed(&self) -> Vec<PushRecord> {
            self.state.lock().unwrap().history.clone()
        }

        pub fn pushed_job_types(&self) -> Vec<String> {
            self.pushed().into_iter().map(|r| r.job.job_type).collect()
        }

        /// Jobs still waiting on `queue`
        pub fn ready(&self, queue: &str) -> Vec<QueuedJob> {
            self.state
                .lock()
                .unwrap()
                .ready
                .get(queue)
                .map(|q| q.iter().cloned().collect())
                .unwrap_or_default()
        }

        pub fn acknowledged(&self) -> Vec<String> {
            self.state.lock().unwrap().acknowledged.clone()
        }

        fn enqueue(&self, job: &QueuedJob, queue: Option<&str>, delay: Option<Duration>) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            if self.fail_after.is_some_and(|n| state.history.len() >= n) {
                return Err(queue_error("queue unavailable"));
            }

            let queue = resolve_queue(queue, job);
            state
                .ready
                .entry(queue.clone())
                .or_default()
                .push_back(job.clone());
            state.history.push(PushRecord {
                queue,
                job: job.clone(),
                delay,
            });
            Ok(())
        }
    }

    #[async_trait]
    impl QueueTransport for InMemoryQueue {
        async fn push(&self, job: &QueuedJob, queue: Option<&str>) -> Result<()> {
            self.enqueue(job, queue, None)
        }

        async fn later(&self, job: &QueuedJob, delay: Duration, queue: Option<&str>) -> Result<()> {
            self.enqueue(job, queue, Some(delay))
        }

        async fn pop(&self, queue: &str) -> Result<Option<ReservedJob>> {
            let mut state = self.state.lock().unwrap();
            let Some(job) = state.ready.get_mut(queue).and_then(|q| q.pop_front()) else {
                return Ok(None);
            };
            state.next_receipt += 1;
            Ok(Some(ReservedJob {
                receipt: state.next_receipt,
                queue: queue.to_string(),
                job,
            }))
        }

        async fn acknowledge(&self, reserved: &ReservedJob) -> Result<()> {
            self.state
                .lock()
                .unwrap()
                .acknowledged
                .push(reserved.job.id.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::InMemoryQueue;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_queue_precedence() {
        let job = QueuedJob::new("a", json!({})).on_queue("own");
        assert_eq!(resolve_queue(Some("explicit"), &job), "explicit");
        assert_eq!(resolve_queue(None, &job), "own");
        assert_eq!(
            resolve_queue(None, &QueuedJob::new("a", json!({}))),
            DEFAULT_QUEUE
        );
    }

    #[tokio::test]
    async fn test_in_memory_queue_fifo() {
        let queue = InMemoryQueue::new();
        queue.push(&QueuedJob::with_id("1", "a", json!({})), None).await.unwrap();
        queue.push(&QueuedJob::with_id("2", "b", json!({})), None).await.unwrap();

        let first = queue.pop(DEFAULT_QUEUE).await.unwrap().unwrap();
        assert_eq!(first.job.id, "1");
        queue.acknowledge(&first).await.unwrap();
        assert_eq!(queue.pop(DEFAULT_QUEUE).await.unwrap().unwrap().job.id, "2");
        assert!(queue.pop(DEFAULT_QUEUE).await.unwrap().is_none());
        assert_eq!(queue.acknowledged(), vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn test_failing_queue_stops_accepting() {
        let queue = InMemoryQueue::failing_after(1);
        let jobs = vec![
            QueuedJob::new("a", json!({})),
            QueuedJob::new("b", json!({})),
        ];

        let err = queue.bulk_push(&jobs, None).await.unwrap_err();
        assert!(matches!(err, AppError::Queue(_)));
        assert_eq!(queue.pushed().len(), 1);
    }
}
