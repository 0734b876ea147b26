// Batch - job-facing handle on one batch row
//
// Counter mutations go through the repository; the callback decisions use
// the counts returned by the triggering mutation, never a re-read.

use crate::application::dispatcher::Dispatcher;
use crate::application::job::{into_batch_items, Dispatchable};
use crate::domain::{
    BatchItem, BatchRecord, BatchSummary, CallbackKind, QueuedJob, UpdatedBatchJobCounts,
};
use crate::error::{AppError, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Snapshot of a batch row plus the behavior around it
#[derive(Clone)]
pub struct Batch {
    record: BatchRecord,
    dispatcher: Arc<Dispatcher>,
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch").field("record", &self.record).finish()
    }
}

impl Batch {
    pub fn new(record: BatchRecord, dispatcher: Arc<Dispatcher>) -> Self {
        Self { record, dispatcher }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn record(&self) -> &BatchRecord {
        &self.record
    }

    pub fn total_jobs(&self) -> i64 {
        self.record.total_jobs
    }

    pub fn pending_jobs(&self) -> i64 {
        self.record.pending_jobs
    }

    pub fn failed_jobs(&self) -> i64 {
        self.record.failed_jobs
    }

    pub fn processed_jobs(&self) -> i64 {
        self.record.processed_jobs()
    }

    pub fn progress(&self) -> i64 {
        self.record.progress()
    }

    pub fn finished(&self) -> bool {
        self.record.finished()
    }

    pub fn cancelled(&self) -> bool {
        self.record.cancelled()
    }

    pub fn has_failures(&self) -> bool {
        self.record.has_failures()
    }

    pub fn allows_failures(&self) -> bool {
        self.record.allows_failures()
    }

    pub fn to_summary(&self) -> BatchSummary {
        self.record.to_summary()
    }

    /// Re-read the row; `None` once the batch is deleted
    pub async fn fresh(&self) -> Result<Option<Batch>> {
        self.dispatcher.find_batch(&self.record.id).await
    }

    /// Add jobs (or chains) to the batch and enqueue them
    pub async fn add<I>(&self, items: I) -> Result<Batch>
    where
        I: IntoIterator,
        I::Item: Into<Dispatchable>,
    {
        let items = into_batch_items(items.into_iter().map(Into::into).collect())?;
        self.add_items(items).await
    }

    /// Grow the counters and enqueue as one unit
    ///
    /// A failed push rolls the growth back and surfaces the error.
    pub(crate) async fn add_items(&self, items: Vec<BatchItem>) -> Result<Batch> {
        let options = &self.record.options;
        let mut count: i64 = 0;
        let mut jobs: Vec<QueuedJob> = Vec::with_capacity(items.len());

        for item in items {
            match item {
                BatchItem::Job(job) => {
                    count += 1;
                    jobs.push(job.with_batch_id(self.id()));
                }
                BatchItem::Chain(links) => {
                    count += links.len() as i64;
                    if let Some(head) = self.prepare_batched_chain(links) {
                        jobs.push(head);
                    }
                }
            }
        }

        let transport = self.dispatcher.connection(options.connection.as_deref())?;
        let mut tx = self.dispatcher.repository().begin_transaction().await?;

        if let Err(e) = tx.increment_total_jobs(self.id(), count).await {
            tx.rollback().await?;
            return Err(e);
        }
        if let Err(e) = transport.bulk_push(&jobs, options.queue.as_deref()).await {
            tx.rollback().await?;
            return Err(e);
        }
        tx.commit().await?;

        info!(batch_id = %self.id(), added_jobs = count, "Jobs added to batch");

        Ok(self.fresh().await?.unwrap_or_else(|| self.clone()))
    }

    /// Every link joins the batch; the head carries the rest
    fn prepare_batched_chain(&self, links: Vec<QueuedJob>) -> Option<QueuedJob> {
        let options = &self.record.options;
        let mut links = links
            .into_iter()
            .map(|link| link.with_batch_id(self.id()));

        let mut head = links.next()?;
        if options.queue.is_some() {
            head = head.all_on_queue(options.queue.clone());
        }
        if options.connection.is_some() {
            head = head.all_on_connection(options.connection.clone());
        }
        Some(head.chain(links.collect()))
    }

    /// Report a successful job
    ///
    /// Only the counter mutation can fail the call. Once it has committed,
    /// the report must not be retried, so later failures go to the error
    /// reporter and the remaining callback lists still run.
    pub async fn record_successful_job(&self, job_id: &str) -> Result<()> {
        let repository = self.dispatcher.repository();
        let Some(counts) = repository.decrement_pending_jobs(self.id(), job_id).await? else {
            warn!(batch_id = %self.id(), job_id = %job_id, "Batch missing, success report dropped");
            return Ok(());
        };
        let options = &self.record.options;

        if !options.progress.is_empty() {
            self.invoke(CallbackKind::Progress, counts, None).await;
        }

        if counts.pending_jobs == 0 {
            match repository.mark_as_finished(self.id()).await {
                Ok(()) => info!(batch_id = %self.id(), "Batch finished"),
                Err(e) => self.report("mark finished", e),
            }

            if !options.then.is_empty() {
                self.invoke(CallbackKind::Then, counts, None).await;
            }
        }

        if counts.all_jobs_have_ran_exactly_once() && !options.finally.is_empty() {
            self.invoke(CallbackKind::Finally, counts, None).await;
        }

        Ok(())
    }

    /// Report a job that failed terminally
    ///
    /// Same contract as `record_successful_job`: errors after the counter
    /// mutation are reported, not returned.
    pub async fn record_failed_job(&self, job_id: &str, error: &str) -> Result<()> {
        let Some(counts) = self
            .dispatcher
            .repository()
            .increment_failed_jobs(self.id(), job_id)
            .await?
        else {
            warn!(batch_id = %self.id(), job_id = %job_id, "Batch missing, failure report dropped");
            return Ok(());
        };
        let options = &self.record.options;
        let first_failure = counts.failed_jobs == 1;

        if first_failure && !self.allows_failures() {
            if let Err(e) = self.cancel().await {
                self.report("cancel", e);
            }
        }

        if self.allows_failures() && !options.progress.is_empty() {
            self.invoke(CallbackKind::Progress, counts, Some(error)).await;
        }

        if first_failure && !options.catch.is_empty() {
            self.invoke(CallbackKind::Catch, counts, Some(error)).await;
        }

        if counts.all_jobs_have_ran_exactly_once() && !options.finally.is_empty() {
            self.invoke(CallbackKind::Finally, counts, Some(error)).await;
        }

        Ok(())
    }

    /// Fire one callback list against a fresh snapshot
    ///
    /// Falls back to this snapshot with `counts` applied when the re-read fails.
    async fn invoke(&self, kind: CallbackKind, counts: UpdatedBatchJobCounts, error: Option<&str>) {
        let snapshot = match self.fresh().await {
            Ok(Some(fresh)) => fresh,
            Ok(None) => {
                warn!(batch_id = %self.id(), callback = %kind, "Batch missing, callbacks skipped");
                return;
            }
            Err(e) => {
                self.report(&format!("{kind} snapshot"), e);
                self.with_counts(counts)
            }
        };
        let callbacks = self.record.options.callbacks(kind);
        self.dispatcher
            .invoke_callbacks(kind, callbacks, Some(&snapshot), error)
            .await;
    }

    fn with_counts(&self, counts: UpdatedBatchJobCounts) -> Batch {
        let mut record = self.record.clone();
        record.pending_jobs = counts.pending_jobs;
        record.failed_jobs = counts.failed_jobs;
        Batch::new(record, Arc::clone(&self.dispatcher))
    }

    fn report(&self, step: &str, error: AppError) {
        let context = format!("batch {} {}", self.id(), step);
        self.dispatcher.reporter().report(&context, &anyhow::Error::new(error));
    }

    pub async fn cancel(&self) -> Result<()> {
        self.dispatcher.repository().cancel(self.id()).await?;
        info!(batch_id = %self.id(), "Batch cancelled");
        Ok(())
    }

    pub async fn delete(&self) -> Result<()> {
        self.dispatcher.repository().delete(self.id()).await?;
        info!(batch_id = %self.id(), "Batch deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Callback;
    use crate::port::batch_repository::mocks::InMemoryBatchRepository;
    use crate::port::cache::mocks::InMemoryCache;
    use crate::port::error_reporter::mocks::RecordingErrorReporter;
    use crate::port::queue::mocks::InMemoryQueue;
    use crate::port::SystemTimeProvider;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        dispatcher: Arc<Dispatcher>,
        repository: Arc<InMemoryBatchRepository>,
        reporter: Arc<RecordingErrorReporter>,
    }

    fn fixture() -> Fixture {
        let repository = Arc::new(InMemoryBatchRepository::new());
        let reporter = Arc::new(RecordingErrorReporter::new());
        let dispatcher = Dispatcher::builder(
            repository.clone(),
            Arc::new(InMemoryQueue::new()),
            Arc::new(InMemoryCache::new(Arc::new(SystemTimeProvider))),
        )
        .error_reporter(reporter.clone())
        .build();
        Fixture {
            dispatcher,
            repository,
            reporter,
        }
    }

    fn counter(dispatcher: &Dispatcher) -> (Callback, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let callback = dispatcher.callbacks().register_closure(move |_| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        (callback, count)
    }

    fn jobs(n: usize) -> Vec<QueuedJob> {
        (0..n)
            .map(|i| QueuedJob::with_id(format!("job-{i}"), "noop", json!({})))
            .collect()
    }

    #[tokio::test]
    async fn test_success_after_finish_write_fails_still_fires_callbacks() {
        let f = fixture();
        let (then, then_count) = counter(&f.dispatcher);
        let (finally, finally_count) = counter(&f.dispatcher);
        let batch = f
            .dispatcher
            .batch(jobs(1))
            .unwrap()
            .then(then)
            .finally(finally)
            .dispatch()
            .await
            .unwrap();

        f.repository.fail_next("mark_as_finished");
        batch.record_successful_job("job-0").await.unwrap();

        assert_eq!(then_count.load(Ordering::SeqCst), 1);
        assert_eq!(finally_count.load(Ordering::SeqCst), 1);
        let reports = f.reporter.reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].0.ends_with("mark finished"));
        assert_eq!(batch.fresh().await.unwrap().unwrap().pending_jobs(), 0);
    }

    #[tokio::test]
    async fn test_failed_reread_falls_back_to_reported_counts() {
        let f = fixture();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let then = f.dispatcher.callbacks().register_closure(move |invocation| {
            let sink = Arc::clone(&sink);
            async move {
                let pending = invocation.batch.map(|b| b.pending_jobs());
                sink.lock().unwrap().push(pending);
                Ok(())
            }
        });
        let batch = f
            .dispatcher
            .batch(jobs(1))
            .unwrap()
            .then(then)
            .dispatch()
            .await
            .unwrap();

        f.repository.fail_next("find");
        batch.record_successful_job("job-0").await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![Some(0)]);
        assert_eq!(f.reporter.count(), 1);
    }

    #[tokio::test]
    async fn test_failure_after_cancel_write_fails_still_fires_catch() {
        let f = fixture();
        let (catch, catch_count) = counter(&f.dispatcher);
        let batch = f
            .dispatcher
            .batch(jobs(2))
            .unwrap()
            .catch(catch)
            .dispatch()
            .await
            .unwrap();

        f.repository.fail_next("cancel");
        batch.record_failed_job("job-0", "boom").await.unwrap();

        assert_eq!(catch_count.load(Ordering::SeqCst), 1);
        assert_eq!(f.reporter.count(), 1);
        assert_eq!(batch.fresh().await.unwrap().unwrap().failed_jobs(), 1);
    }

    #[tokio::test]
    async fn test_counter_write_failure_is_returned() {
        let f = fixture();
        let batch = f.dispatcher.batch(jobs(1)).unwrap().dispatch().await.unwrap();

        f.repository.fail_next("decrement_pending_jobs");
        assert!(batch.record_successful_job("job-0").await.is_err());
        assert_eq!(batch.fresh().await.unwrap().unwrap().pending_jobs(), 1);
    }

    #[tokio::test]
    async fn test_broken_callback_does_not_stop_its_siblings() {
        let f = fixture();
        let failing = f
            .dispatcher
            .callbacks()
            .register_closure(|_| async { Err::<(), _>(anyhow::anyhow!("webhook down")) });
        let panicking = f
            .dispatcher
            .callbacks()
            .register_closure(|invocation| async move {
                if invocation.batch.is_some() {
                    panic!("bad handler");
                }
                Ok(())
            });
        let (then, then_count) = counter(&f.dispatcher);
        let (finally, finally_count) = counter(&f.dispatcher);

        let batch = f
            .dispatcher
            .batch(jobs(1))
            .unwrap()
            .then(failing)
            .then(panicking)
            .then(then)
            .finally(finally)
            .dispatch()
            .await
            .unwrap();

        batch.record_successful_job("job-0").await.unwrap();

        assert_eq!(then_count.load(Ordering::SeqCst), 1);
        assert_eq!(finally_count.load(Ordering::SeqCst), 1);
        let reports = f.reporter.reports();
        assert_eq!(reports.len(), 2);
        assert!(reports[0].1.contains("webhook down"));
        assert!(reports[1].1.contains("bad handler"));
    }
}
