// Pending Batch - builder state before a batch exists

use crate::application::batch::Batch;
use crate::application::callbacks::CallbackInvocation;
use crate::application::dispatcher::Dispatcher;
use crate::application::job::{into_batch_items, Dispatchable};
use crate::domain::{BatchItem, BatchOptions, Callback, CallbackKind, NewBatch};
use crate::error::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

pub struct PendingBatch {
    dispatcher: Arc<Dispatcher>,
    name: String,
    jobs: Vec<BatchItem>,
    options: BatchOptions,
}

impl PendingBatch {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            name: String::new(),
            jobs: Vec::new(),
            options: BatchOptions::default(),
        }
    }

    /// Rebuild a builder from stored parts
    pub fn from_parts(
        dispatcher: Arc<Dispatcher>,
        name: String,
        jobs: Vec<BatchItem>,
        options: BatchOptions,
    ) -> Self {
        Self {
            dispatcher,
            name,
            jobs,
            options,
        }
    }

    pub fn into_parts(self) -> (String, Vec<BatchItem>, BatchOptions) {
        (self.name, self.jobs, self.options)
    }

    /// Append jobs; nothing is stored yet
    pub fn add<I>(mut self, items: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<Dispatchable>,
    {
        let items = into_batch_items(items.into_iter().map(Into::into).collect())?;
        self.jobs.extend(items);
        Ok(self)
    }

    pub fn before(self, callback: impl Into<Callback>) -> Self {
        self.push(CallbackKind::Before, callback.into())
    }

    pub fn progress(self, callback: impl Into<Callback>) -> Self {
        self.push(CallbackKind::Progress, callback.into())
    }

    pub fn then(self, callback: impl Into<Callback>) -> Self {
        self.push(CallbackKind::Then, callback.into())
    }

    pub fn catch(self, callback: impl Into<Callback>) -> Self {
        self.push(CallbackKind::Catch, callback.into())
    }

    pub fn finally(self, callback: impl Into<Callback>) -> Self {
        self.push(CallbackKind::Finally, callback.into())
    }

    /// Register an inline closure for `kind`
    pub fn with_closure<F, Fut>(self, kind: CallbackKind, f: F) -> Self
    where
        F: Fn(CallbackInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let callback = self.dispatcher.callbacks().register_closure(f);
        self.push(kind, callback)
    }

    fn push(mut self, kind: CallbackKind, callback: Callback) -> Self {
        self.options.push_callback(kind, callback);
        self
    }

    pub fn allow_failures(mut self, allow: bool) -> Self {
        self.options.allow_failures = allow;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.options.queue = Some(queue.into());
        self
    }

    pub fn on_connection(mut self, connection: impl Into<String>) -> Self {
        self.options.connection = Some(connection.into());
        self
    }

    pub fn with_option(mut self, key: &str, value: serde_json::Value) -> Result<Self> {
        self.options.set(key, value)?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn jobs(&self) -> &[BatchItem] {
        &self.jobs
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    pub fn allows_failures(&self) -> bool {
        self.options.allow_failures
    }

    /// Store the batch and enqueue its jobs
    ///
    /// If enqueueing fails the new row is deleted and the error returned.
    pub async fn dispatch(mut self) -> Result<Batch> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let jobs = std::mem::take(&mut self.jobs);
        let batch = self.store().await?;

        match batch.add_items(jobs).await {
            Ok(batch) => {
                info!(
                    batch_id = %batch.id(),
                    name = %batch.name(),
                    total_jobs = batch.total_jobs(),
                    "Batch dispatched"
                );
                Ok(batch)
            }
            Err(e) => {
                warn!(batch_id = %batch.id(), error = %e, "Enqueue failed, deleting batch");
                dispatcher.repository().delete(batch.id()).await?;
                Err(e)
            }
        }
    }

    pub async fn dispatch_if(self, condition: bool) -> Result<Option<Batch>> {
        if condition {
            self.dispatch().await.map(Some)
        } else {
            Ok(None)
        }
    }

    /// Store the batch now, enqueue once the dispatcher terminates
    pub async fn dispatch_after_response(mut self) -> Result<Batch> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let jobs = std::mem::take(&mut self.jobs);
        let batch = self.store().await?;

        let deferred = batch.clone();
        dispatcher.after_response().defer(async move {
            match deferred.add_items(jobs).await {
                Ok(batch) => {
                    info!(batch_id = %batch.id(), total_jobs = batch.total_jobs(), "Batch dispatched");
                    Ok(())
                }
                Err(e) => {
                    warn!(batch_id = %deferred.id(), error = %e, "Deferred enqueue failed, deleting batch");
                    deferred.delete().await?;
                    Err(e)
                }
            }
        });

        Ok(batch)
    }

    /// Insert the row and run the `before` callbacks
    async fn store(self) -> Result<Batch> {
        let record = self
            .dispatcher
            .repository()
            .store(&NewBatch {
                name: self.name,
                options: self.options,
            })
            .await?;
        info!(batch_id = %record.id, name = %record.name, "Batch stored");

        let batch = Batch::new(record, Arc::clone(&self.dispatcher));
        let before = batch.record().options.before.clone();
        if !before.is_empty() {
            let fresh = batch.fresh().await?.unwrap_or_else(|| batch.clone());
            self.dispatcher
                .invoke_callbacks(CallbackKind::Before, &before, Some(&fresh), None)
                .await;
        }

        Ok(batch)
    }
}
