// Chained Batch - a nested batch running as one link of a chain
//
// When executed it dispatches the nested batch and moves the rest of the
// outer chain onto that batch's `finally` list.

use crate::application::dispatcher::Dispatcher;
use crate::application::job::{Job, JobContext, Queueable};
use crate::application::pending_batch::PendingBatch;
use crate::domain::{BatchItem, BatchOptions, Callback, QueuedJob};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Job type under which nested batches travel
pub const CHAINED_BATCH_JOB_TYPE: &str = "batchline::chained_batch";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainedBatch {
    pub jobs: Vec<BatchItem>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub options: BatchOptions,
}

impl ChainedBatch {
    pub fn new(jobs: Vec<BatchItem>, name: String, options: BatchOptions) -> Self {
        Self { jobs, name, options }
    }

    /// Capture a pending batch; its jobs are already flattened
    pub fn from_pending(batch: PendingBatch) -> Self {
        let (name, jobs, options) = batch.into_parts();
        Self::new(jobs, name, options)
    }

    pub fn into_queued(self) -> Result<QueuedJob> {
        self.to_queued()
    }

    /// Rebuild the nested batch, routed like the envelope that carried it
    pub fn to_pending_batch(&self, job: &QueuedJob, dispatcher: Arc<Dispatcher>) -> PendingBatch {
        let mut batch = PendingBatch::from_parts(
            dispatcher,
            self.name.clone(),
            self.jobs.clone(),
            self.options.clone(),
        );

        if let Some(queue) = &job.queue {
            batch = batch.on_queue(queue.clone());
        }
        if let Some(connection) = &job.connection {
            batch = batch.on_connection(connection.clone());
        }

        for callback in &job.chain.chain_catch_callbacks {
            batch = batch.catch(Callback::ChainCatch {
                callback: Box::new(callback.clone()),
            });
        }

        batch
    }

    /// Move the rest of the outer chain behind the nested batch
    pub fn attach_remainder_of_chain(job: &mut QueuedJob, batch: PendingBatch) -> PendingBatch {
        match job.take_next_in_chain() {
            Some(next) => batch.finally(Callback::ContinueChain {
                next: Box::new(next),
            }),
            None => batch,
        }
    }
}

#[async_trait]
impl Job for ChainedBatch {
    async fn execute(&self, ctx: &mut JobContext) -> anyhow::Result<()> {
        let dispatcher = Arc::clone(ctx.dispatcher());
        let batch = self.to_pending_batch(ctx.job(), dispatcher);
        let batch = Self::attach_remainder_of_chain(ctx.job_mut(), batch);

        let batch = batch.dispatch().await?;
        info!(
            job_id = %ctx.job().id,
            batch_id = %batch.id(),
            "Nested batch dispatched from chain"
        );
        Ok(())
    }
}

impl Queueable for ChainedBatch {
    const JOB_TYPE: &'static str = CHAINED_BATCH_JOB_TYPE;
}
