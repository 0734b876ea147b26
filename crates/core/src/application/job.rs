// Job Execution Interface and Registry

use crate::application::batch::Batch;
use crate::application::chained_batch::ChainedBatch;
use crate::application::dispatcher::Dispatcher;
use crate::application::pending_batch::PendingBatch;
use crate::domain::{BatchItem, QueuedJob, UniqueSpec, DEFAULT_MAX_ATTEMPTS};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Executable unit of work
#[async_trait]
pub trait Job: Send + Sync {
    async fn execute(&self, ctx: &mut JobContext) -> anyhow::Result<()>;
}

/// A job that can travel through the queue as JSON
pub trait Queueable: Job + Serialize + DeserializeOwned + 'static {
    /// Stable name stored in the envelope
    const JOB_TYPE: &'static str;

    fn unique(&self) -> Option<UniqueSpec> {
        None
    }

    fn max_attempts(&self) -> u32 {
        DEFAULT_MAX_ATTEMPTS
    }

    /// Wrap this job in a fresh envelope
    fn to_queued(&self) -> Result<QueuedJob> {
        let mut job = QueuedJob::new(Self::JOB_TYPE, serde_json::to_value(self)?)
            .with_max_attempts(self.max_attempts());
        job.unique = self.unique();
        Ok(job)
    }
}

type JobFactory = Arc<dyn Fn(&QueuedJob) -> Result<Box<dyn Job>> + Send + Sync>;

/// Maps `job_type` to a factory that rebuilds the job from its payload
pub struct JobRegistry {
    factories: RwLock<HashMap<String, JobFactory>>,
}

impl JobRegistry {
    /// Registry with the built-in chained-batch job
    pub fn new() -> Self {
        let registry = Self {
            factories: RwLock::new(HashMap::new()),
        };
        registry.register::<ChainedBatch>();
        registry
    }

    pub fn register<J: Queueable>(&self) {
        self.register_factory(J::JOB_TYPE, |job: &QueuedJob| {
            let decoded: J = serde_json::from_value(job.payload.clone())?;
            Ok(Box::new(decoded) as Box<dyn Job>)
        });
    }

    pub fn register_factory<F>(&self, job_type: impl Into<String>, factory: F)
    where
        F: Fn(&QueuedJob) -> Result<Box<dyn Job>> + Send + Sync + 'static,
    {
        if let Ok(mut factories) = self.factories.write() {
            factories.insert(job_type.into(), Arc::new(factory));
        }
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.factories
            .read()
            .map(|factories| factories.contains_key(job_type))
            .unwrap_or(false)
    }

    /// Rebuild the job behind an envelope
    pub fn resolve(&self, job: &QueuedJob) -> Result<Box<dyn Job>> {
        let factory = self
            .factories
            .read()
            .ok()
            .and_then(|factories| factories.get(&job.job_type).cloned())
            .ok_or_else(|| AppError::UnknownJobType(job.job_type.clone()))?;
        factory(job)
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-execution context handed to a running job
pub struct JobContext {
    job: QueuedJob,
    dispatcher: Arc<Dispatcher>,
}

impl JobContext {
    pub fn new(job: QueuedJob, dispatcher: Arc<Dispatcher>) -> Self {
        Self { job, dispatcher }
    }

    pub fn job(&self) -> &QueuedJob {
        &self.job
    }

    /// Envelope of the running job; chain edits here carry into the next link
    pub fn job_mut(&mut self) -> &mut QueuedJob {
        &mut self.job
    }

    pub fn into_job(self) -> QueuedJob {
        self.job
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn batch_id(&self) -> Option<&str> {
        self.job.batch_id.as_deref()
    }

    /// Fresh snapshot of the batch this job belongs to
    pub async fn batch(&self) -> Result<Option<Batch>> {
        match self.batch_id() {
            Some(id) => self.dispatcher.find_batch(id).await,
            None => Ok(None),
        }
    }

    /// The job belongs to a batch that still exists and is not cancelled
    pub async fn batching(&self) -> Result<bool> {
        Ok(self
            .batch()
            .await?
            .is_some_and(|batch| !batch.cancelled()))
    }
}

/// Anything that can be placed in a batch or chain
pub enum Dispatchable {
    Job(QueuedJob),
    /// Ordered jobs: a chain inside a batch, a nested batch inside a chain
    Sequence(Vec<Dispatchable>),
    Batch(PendingBatch),
}

impl Dispatchable {
    /// Shape this item for a batch: sequences become chains, batches become chained-batch jobs
    pub fn into_batch_item(self) -> Result<BatchItem> {
        match self {
            Dispatchable::Job(job) => Ok(BatchItem::Job(job)),
            Dispatchable::Sequence(items) => Ok(BatchItem::Chain(flatten_chain(items)?)),
            Dispatchable::Batch(batch) => Ok(BatchItem::Job(
                ChainedBatch::from_pending(batch).into_queued()?,
            )),
        }
    }
}

/// Turn chain links into plain envelopes
///
/// A nested sequence or pending batch becomes a single chained-batch link.
pub fn flatten_chain(items: Vec<Dispatchable>) -> Result<Vec<QueuedJob>> {
    items
        .into_iter()
        .map(|item| match item {
            Dispatchable::Job(job) => Ok(job),
            Dispatchable::Sequence(items) => {
                let jobs = into_batch_items(items)?;
                ChainedBatch::new(jobs, String::new(), Default::default()).into_queued()
            }
            Dispatchable::Batch(batch) => ChainedBatch::from_pending(batch).into_queued(),
        })
        .collect()
}

pub(crate) fn into_batch_items(items: Vec<Dispatchable>) -> Result<Vec<BatchItem>> {
    items.into_iter().map(Dispatchable::into_batch_item).collect()
}

impl From<QueuedJob> for Dispatchable {
    fn from(job: QueuedJob) -> Self {
        Dispatchable::Job(job)
    }
}

impl From<PendingBatch> for Dispatchable {
    fn from(batch: PendingBatch) -> Self {
        Dispatchable::Batch(batch)
    }
}

impl From<Vec<QueuedJob>> for Dispatchable {
    fn from(jobs: Vec<QueuedJob>) -> Self {
        Dispatchable::Sequence(jobs.into_iter().map(Dispatchable::Job).collect())
    }
}

impl From<Vec<Dispatchable>> for Dispatchable {
    fn from(items: Vec<Dispatchable>) -> Self {
        Dispatchable::Sequence(items)
    }
}
