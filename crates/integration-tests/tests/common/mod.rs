//! Shared fixtures: a recording job, callback counters and wired dispatchers

#![allow(dead_code)]

use async_trait::async_trait;
use batchline_core::application::{
    CallbackInvocation, Dispatcher, Job, JobContext, Queueable, RetryPolicy, Worker,
};
use batchline_core::domain::{Callback, QueuedJob};
use batchline_core::port::batch_repository::mocks::InMemoryBatchRepository;
use batchline_core::port::cache::mocks::InMemoryCache;
use batchline_core::port::queue::mocks::InMemoryQueue;
use batchline_core::port::{
    BatchRepository, OrderedUuidProvider, SystemTimeProvider, TimeProvider, DEFAULT_QUEUE,
};
use batchline_infra_sqlite::{
    create_pool, run_migrations, SqliteBatchRepository, SqliteCacheStore, SqliteQueue,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// (run, label) pairs written by executed `Record` jobs
static JOURNAL: Mutex<Vec<(String, String)>> = Mutex::new(Vec::new());

/// Appends its label to the journal, optionally failing afterwards
#[derive(Serialize, Deserialize)]
pub struct Record {
    pub run: String,
    pub label: String,
    #[serde(default)]
    pub fail: bool,
}

#[async_trait]
impl Job for Record {
    async fn execute(&self, _ctx: &mut JobContext) -> anyhow::Result<()> {
        JOURNAL
            .lock()
            .unwrap()
            .push((self.run.clone(), self.label.clone()));
        if self.fail {
            anyhow::bail!("{} failed", self.label);
        }
        Ok(())
    }
}

impl Queueable for Record {
    const JOB_TYPE: &'static str = "test::record";
}

/// Dispatcher, repository and a worker on the default queue
pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub repository: Arc<dyn BatchRepository>,
    pub worker: Worker,
    run: String,
}

impl Harness {
    fn wire(dispatcher: Arc<Dispatcher>, repository: Arc<dyn BatchRepository>) -> Self {
        dispatcher.jobs().register::<Record>();
        // zero backoff: a retried job is poppable right away
        let worker = Worker::new(
            DEFAULT_QUEUE,
            Arc::clone(&dispatcher),
            Arc::new(RetryPolicy::new(0)),
        );
        Self {
            dispatcher,
            repository,
            worker,
            run: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// SQLite batches and locks, queue on its own in-memory database
    pub async fn sqlite() -> Self {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let queue_pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&queue_pool).await.unwrap();

        let time: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
        let repository: Arc<dyn BatchRepository> = Arc::new(SqliteBatchRepository::new(
            pool.clone(),
            time.clone(),
            Arc::new(OrderedUuidProvider),
        ));
        let dispatcher = Dispatcher::builder(
            repository.clone(),
            Arc::new(SqliteQueue::new(queue_pool, time.clone())),
            Arc::new(SqliteCacheStore::new(pool, time)),
        )
        .build();

        Self::wire(dispatcher, repository)
    }

    /// Everything in memory; the queue handle is returned for inspection
    pub fn in_memory_with(queue: Arc<InMemoryQueue>) -> (Self, Arc<InMemoryBatchRepository>) {
        let repository = Arc::new(InMemoryBatchRepository::new());
        let dispatcher = Dispatcher::builder(
            repository.clone(),
            queue,
            Arc::new(InMemoryCache::new(Arc::new(SystemTimeProvider))),
        )
        .build();

        (Self::wire(dispatcher, repository.clone()), repository)
    }

    pub fn in_memory() -> (Self, Arc<InMemoryQueue>) {
        let queue = Arc::new(InMemoryQueue::new());
        let (harness, _) = Self::in_memory_with(queue.clone());
        (harness, queue)
    }

    pub fn job(&self, label: &str) -> QueuedJob {
        self.record(label, false)
    }

    pub fn failing(&self, label: &str) -> QueuedJob {
        self.record(label, true)
    }

    fn record(&self, label: &str, fail: bool) -> QueuedJob {
        Record {
            run: self.run.clone(),
            label: label.to_string(),
            fail,
        }
        .to_queued()
        .unwrap()
    }

    /// Labels executed in this harness, in order
    pub fn journal(&self) -> Vec<String> {
        JOURNAL
            .lock()
            .unwrap()
            .iter()
            .filter(|(run, _)| *run == self.run)
            .map(|(_, label)| label.clone())
            .collect()
    }

    pub async fn drain(&self) -> usize {
        self.worker.drain().await.unwrap()
    }

    /// Callback that counts its invocations
    pub fn counter(&self) -> (Callback, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let callback = self.dispatcher.callbacks().register_closure(move |_| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        (callback, count)
    }

    /// Callback that keeps every invocation it receives
    pub fn recorder(&self) -> (Callback, Arc<Mutex<Vec<CallbackInvocation>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let callback = self.dispatcher.callbacks().register_closure(move |invocation| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(invocation);
                Ok(())
            }
        });
        (callback, calls)
    }
}

pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}
