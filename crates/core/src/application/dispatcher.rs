// Dispatcher - entry point for batches, chains and single jobs
//
// Owns every collaborator the engine needs and fires stored callbacks.

use crate::application::after_response::AfterResponseHooks;
use crate::application::batch::Batch;
use crate::application::callbacks::{CallbackInvocation, CallbackRegistry};
use crate::application::chain::PendingChain;
use crate::application::job::{Dispatchable, JobRegistry, Queueable};
use crate::application::panic_guard::{execute_guarded_async, PanicGuardResult};
use crate::application::pending_batch::PendingBatch;
use crate::application::unique_lock::UniqueLock;
use crate::domain::{Callback, CallbackKind, QueuedJob};
use crate::error::{AppError, Result};
use crate::port::{BatchRepository, CacheStore, ErrorReporter, QueueTransport, TracingErrorReporter};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Named queue transports with a default
pub struct QueueConnections {
    default: Arc<dyn QueueTransport>,
    named: HashMap<String, Arc<dyn QueueTransport>>,
}

impl QueueConnections {
    pub fn new(default: Arc<dyn QueueTransport>) -> Self {
        Self {
            default,
            named: HashMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, transport: Arc<dyn QueueTransport>) {
        self.named.insert(name.into(), transport);
    }

    /// `None` selects the default connection
    pub fn get(&self, name: Option<&str>) -> Result<Arc<dyn QueueTransport>> {
        match name {
            None => Ok(Arc::clone(&self.default)),
            Some(name) => self
                .named
                .get(name)
                .cloned()
                .ok_or_else(|| AppError::Config(format!("unknown queue connection: {name}"))),
        }
    }
}

pub struct DispatcherBuilder {
    repository: Arc<dyn BatchRepository>,
    connections: QueueConnections,
    cache: Arc<dyn CacheStore>,
    reporter: Arc<dyn ErrorReporter>,
    unique_prefix: Option<String>,
}

impl DispatcherBuilder {
    /// Register an additional named queue connection
    pub fn connection(mut self, name: impl Into<String>, transport: Arc<dyn QueueTransport>) -> Self {
        self.connections.insert(name, transport);
        self
    }

    pub fn error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn unique_lock_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.unique_prefix = Some(prefix.into());
        self
    }

    pub fn build(self) -> Arc<Dispatcher> {
        let mut unique_lock = UniqueLock::new(self.cache);
        if let Some(prefix) = self.unique_prefix {
            unique_lock = unique_lock.with_prefix(prefix);
        }

        Arc::new(Dispatcher {
            repository: self.repository,
            connections: self.connections,
            unique_lock,
            jobs: JobRegistry::new(),
            callbacks: CallbackRegistry::new(),
            reporter: self.reporter,
            after_response: AfterResponseHooks::new(),
        })
    }
}

pub struct Dispatcher {
    repository: Arc<dyn BatchRepository>,
    connections: QueueConnections,
    unique_lock: UniqueLock,
    jobs: JobRegistry,
    callbacks: CallbackRegistry,
    reporter: Arc<dyn ErrorReporter>,
    after_response: AfterResponseHooks,
}

impl Dispatcher {
    pub fn builder(
        repository: Arc<dyn BatchRepository>,
        queue: Arc<dyn QueueTransport>,
        cache: Arc<dyn CacheStore>,
    ) -> DispatcherBuilder {
        DispatcherBuilder {
            repository,
            connections: QueueConnections::new(queue),
            cache,
            reporter: Arc::new(TracingErrorReporter),
            unique_prefix: None,
        }
    }

    pub fn repository(&self) -> &Arc<dyn BatchRepository> {
        &self.repository
    }

    /// Queue transport by connection name (`None` = default)
    pub fn connection(&self, name: Option<&str>) -> Result<Arc<dyn QueueTransport>> {
        self.connections.get(name)
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    pub fn unique_lock(&self) -> &UniqueLock {
        &self.unique_lock
    }

    pub fn reporter(&self) -> &Arc<dyn ErrorReporter> {
        &self.reporter
    }

    pub fn after_response(&self) -> &AfterResponseHooks {
        &self.after_response
    }

    /// Start building a batch
    pub fn batch<I>(self: &Arc<Self>, items: I) -> Result<PendingBatch>
    where
        I: IntoIterator,
        I::Item: Into<Dispatchable>,
    {
        PendingBatch::new(Arc::clone(self)).add(items)
    }

    /// Start building a chain
    pub fn chain<I>(self: &Arc<Self>, items: I) -> Result<PendingChain>
    where
        I: IntoIterator,
        I::Item: Into<Dispatchable>,
    {
        PendingChain::new(Arc::clone(self), items.into_iter().map(Into::into).collect())
    }

    pub async fn find_batch(self: &Arc<Self>, batch_id: &str) -> Result<Option<Batch>> {
        Ok(self
            .repository
            .find(batch_id)
            .await?
            .map(|record| Batch::new(record, Arc::clone(self))))
    }

    /// Page of batches, newest first, strictly older than `before`
    pub async fn batches(self: &Arc<Self>, limit: i64, before: Option<&str>) -> Result<Vec<Batch>> {
        Ok(self
            .repository
            .get(limit, before)
            .await?
            .into_iter()
            .map(|record| Batch::new(record, Arc::clone(self)))
            .collect())
    }

    /// Enqueue one job
    ///
    /// Returns false when a unique job's lock is already held.
    pub async fn dispatch(&self, job: QueuedJob) -> Result<bool> {
        if !self.unique_lock.acquire(&job).await? {
            warn!(job_id = %job.id, job_type = %job.job_type, "Unique job already queued, skipping dispatch");
            return Ok(false);
        }

        let transport = match self.connection(job.connection.as_deref()) {
            Ok(transport) => transport,
            Err(e) => {
                self.unique_lock.release(&job).await?;
                return Err(e);
            }
        };

        let pushed = match job.delay.filter(|secs| *secs > 0) {
            Some(secs) => transport.later(&job, Duration::from_secs(secs), None).await,
            None => transport.push(&job, None).await,
        };
        if let Err(e) = pushed {
            self.unique_lock.release(&job).await?;
            return Err(e);
        }

        debug!(job_id = %job.id, job_type = %job.job_type, "Job dispatched");
        Ok(true)
    }

    pub async fn dispatch_job<J: Queueable>(&self, job: &J) -> Result<bool> {
        self.dispatch(job.to_queued()?).await
    }

    /// Dispatch the next link of `job`'s chain, if any
    pub async fn dispatch_next_job_in_chain(&self, job: &mut QueuedJob) -> Result<()> {
        if let Some(next) = job.take_next_in_chain() {
            debug!(job_id = %job.id, next_job_id = %next.id, "Dispatching next job in chain");
            self.dispatch(next).await?;
        }
        Ok(())
    }

    /// Fire the chain-catch callbacks carried by a terminally failed job
    pub async fn invoke_chain_catch_callbacks(&self, job: &QueuedJob, error: &str) {
        if job.chain.chain_catch_callbacks.is_empty() {
            return;
        }
        self.invoke_callbacks(
            CallbackKind::Catch,
            &job.chain.chain_catch_callbacks,
            None,
            Some(error),
        )
        .await;
    }

    /// Run every callback in the list; failures and panics are reported, never raised
    pub async fn invoke_callbacks(
        &self,
        kind: CallbackKind,
        callbacks: &[Callback],
        batch: Option<&Batch>,
        error: Option<&str>,
    ) {
        for callback in callbacks {
            let outcome = execute_guarded_async(self.invoke_callback(callback, batch, error)).await;
            let failure = match outcome {
                PanicGuardResult::Success(Ok(())) => continue,
                PanicGuardResult::Success(Err(e)) => e,
                PanicGuardResult::Panicked(msg) => anyhow::anyhow!("callback panicked: {msg}"),
            };

            let context = match batch {
                Some(batch) => format!("batch {} {} callback", batch.id(), kind),
                None => format!("chain {} callback", kind),
            };
            self.reporter.report(&context, &failure);
        }
    }

    async fn invoke_callback(
        &self,
        callback: &Callback,
        batch: Option<&Batch>,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut callback = callback;

        // Guards unwrap in place
        while let Callback::ChainCatch { callback: inner } = callback {
            if batch.is_some_and(|b| b.allows_failures()) {
                return Ok(());
            }
            callback = inner.as_ref();
        }

        match callback {
            Callback::Handler { name, args } => {
                let handler = self
                    .callbacks
                    .resolve(name)
                    .ok_or_else(|| anyhow::anyhow!("no callback handler registered as '{name}'"))?;
                handler
                    .handle(CallbackInvocation {
                        batch: batch.cloned(),
                        error: error.map(str::to_string),
                        args: args.clone(),
                    })
                    .await
            }
            Callback::Dispatch { job } => {
                self.dispatch((**job).clone()).await?;
                Ok(())
            }
            Callback::ContinueChain { next } => {
                if batch.is_some_and(|b| b.cancelled()) {
                    info!(next_job_id = %next.id, "Nested batch cancelled, outer chain stops");
                    return Ok(());
                }
                self.dispatch((**next).clone()).await?;
                Ok(())
            }
            Callback::ChainCatch { .. } => Ok(()),
        }
    }

    /// Run deferred after-response work
    pub async fn terminate(&self) -> Result<()> {
        self.after_response.run(self.reporter.as_ref()).await
    }
}
