// Worker - Job execution loop

pub mod constants;
mod shutdown;

use constants::*;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::dispatcher::Dispatcher;
use crate::application::job::JobContext;
use crate::application::panic_guard::panic_message;
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::{QueuedJob, UniqueUntil};
use crate::error::Result;
use crate::port::{QueueTransport, ReservedJob};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// How one attempt ended
enum Outcome {
    Succeeded(QueuedJob),
    /// Job returned an error; retried while attempts remain
    Failed(QueuedJob, String),
    /// Panic or unresolvable job; never retried
    Fatal(QueuedJob, String),
}

/// Worker pops jobs from one queue and reports their outcome
pub struct Worker {
    queue: String,
    connection: Option<String>,
    dispatcher: Arc<Dispatcher>,
    retry_policy: Arc<RetryPolicy>,
}

impl Worker {
    pub fn new(
        queue: impl Into<String>,
        dispatcher: Arc<Dispatcher>,
        retry_policy: Arc<RetryPolicy>,
    ) -> Self {
        Self {
            queue: queue.into(),
            connection: None,
            dispatcher,
            retry_policy,
        }
    }

    /// Serve a named connection instead of the default
    pub fn on_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    /// Run worker loop with graceful shutdown support
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(queue = %self.queue, "Worker started");
        loop {
            if shutdown.is_shutdown() {
                info!(queue = %self.queue, "Worker shutting down");
                break;
            }
            match self.process_next_job().await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = sleep(IDLE_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => {
                            info!("Worker interrupted during idle");
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!(queue = %self.queue, error = %e, "Worker error");
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => {
                            info!("Worker interrupted during error recovery");
                            break;
                        }
                    }
                }
            }
        }
        info!(queue = %self.queue, "Worker stopped");
        Ok(())
    }

    /// Process jobs until the queue is empty (tests, one-shot runs)
    pub async fn drain(&self) -> Result<usize> {
        let mut processed = 0;
        while self.process_next_job().await? {
            processed += 1;
        }
        Ok(processed)
    }

    /// Process next job from queue (returns true if a job was handled)
    pub async fn process_next_job(&self) -> Result<bool> {
        let transport = self.dispatcher.connection(self.connection.as_deref())?;
        let Some(reserved) = transport.pop(&self.queue).await? else {
            return Ok(false);
        };
        let job = reserved.job.clone();

        if job.unique.as_ref().is_some_and(|u| u.until == UniqueUntil::Processing) {
            self.dispatcher.unique_lock().release(&job).await?;
        }

        info!(job_id = %job.id, job_type = %job.job_type, attempt = job.attempts + 1, "Processing job");

        let outcome = self.execute(job).await;
        match outcome {
            Outcome::Succeeded(job) => self.complete(transport.as_ref(), &reserved, job).await?,
            Outcome::Failed(job, message) => {
                match self.retry_policy.should_retry(&job) {
                    RetryDecision::Retry(delay) => {
                        warn!(job_id = %job.id, error = %message, "Job attempt failed, retrying");
                        let next = self.retry_policy.prepare_for_retry(&reserved.job);
                        // Unacknowledged reservations are reclaimed, so a failed requeue keeps the job
                        transport.later(&next, delay, Some(&reserved.queue)).await?;
                        transport.acknowledge(&reserved).await?;
                    }
                    RetryDecision::Failed => {
                        self.fail(transport.as_ref(), &reserved, job, &message).await?
                    }
                }
            }
            Outcome::Fatal(job, message) => {
                self.fail(transport.as_ref(), &reserved, job, &message).await?
            }
        }

        Ok(true)
    }

    /// Run the job on its own task so a panic cannot take the worker down
    async fn execute(&self, job: QueuedJob) -> Outcome {
        let handler = match self.dispatcher.jobs().resolve(&job) {
            Ok(handler) => handler,
            Err(e) => return Outcome::Fatal(job, e.to_string()),
        };

        let fallback = job.clone();
        let mut ctx = JobContext::new(job, Arc::clone(&self.dispatcher));
        let handle = tokio::task::spawn(async move {
            let result = handler.execute(&mut ctx).await;
            (ctx.into_job(), result)
        });

        match handle.await {
            Ok((job, Ok(()))) => Outcome::Succeeded(job),
            Ok((job, Err(e))) => Outcome::Failed(job, format!("{e:#}")),
            Err(join_err) if join_err.is_panic() => {
                let message = panic_message(join_err.into_panic().as_ref());
                error!(job_id = %fallback.id, panic_msg = %message, "Job panicked");
                Outcome::Fatal(fallback, format!("job panicked: {message}"))
            }
            Err(join_err) => Outcome::Fatal(fallback, format!("job cancelled: {join_err}")),
        }
    }

    async fn complete(
        &self,
        transport: &dyn QueueTransport,
        reserved: &ReservedJob,
        mut job: QueuedJob,
    ) -> Result<()> {
        if job.unique.as_ref().is_some_and(|u| u.until == UniqueUntil::Completion) {
            self.dispatcher.unique_lock().release(&job).await?;
        }

        self.dispatcher.dispatch_next_job_in_chain(&mut job).await?;

        if let Some(batch_id) = job.batch_id.as_deref() {
            match self.dispatcher.find_batch(batch_id).await? {
                Some(batch) => batch.record_successful_job(&job.id).await?,
                None => warn!(job_id = %job.id, batch_id = %batch_id, "Batch missing, success not recorded"),
            }
        }

        transport.acknowledge(reserved).await?;
        info!(job_id = %job.id, "Job completed");
        Ok(())
    }

    /// Terminal failure: reported to the batch and the chain exactly once
    async fn fail(
        &self,
        transport: &dyn QueueTransport,
        reserved: &ReservedJob,
        job: QueuedJob,
        message: &str,
    ) -> Result<()> {
        error!(job_id = %job.id, error = %message, "Job failed");

        if job.unique.as_ref().is_some_and(|u| u.until == UniqueUntil::Completion) {
            self.dispatcher.unique_lock().release(&job).await?;
        }

        if let Some(batch_id) = job.batch_id.as_deref() {
            match self.dispatcher.find_batch(batch_id).await? {
                Some(batch) => batch.record_failed_job(&job.id, message).await?,
                None => warn!(job_id = %job.id, batch_id = %batch_id, "Batch missing, failure not recorded"),
            }
        }

        self.dispatcher.invoke_chain_catch_callbacks(&job, message).await;

        transport.acknowledge(reserved).await?;
        Ok(())
    }
}
