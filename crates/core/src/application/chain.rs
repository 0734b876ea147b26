// Pending Chain - ordered jobs dispatched one link at a time

use crate::application::callbacks::CallbackInvocation;
use crate::application::dispatcher::Dispatcher;
use crate::application::job::{flatten_chain, Dispatchable};
use crate::domain::{Callback, DomainError, QueuedJob};
use crate::error::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

pub struct PendingChain {
    dispatcher: Arc<Dispatcher>,
    jobs: Vec<QueuedJob>,
    connection: Option<String>,
    queue: Option<String>,
    delay: Option<u64>,
    catch_callbacks: Vec<Callback>,
}

impl PendingChain {
    pub fn new(dispatcher: Arc<Dispatcher>, items: Vec<Dispatchable>) -> Result<Self> {
        Ok(Self {
            dispatcher,
            jobs: flatten_chain(items)?,
            connection: None,
            queue: None,
            delay: None,
            catch_callbacks: Vec::new(),
        })
    }

    pub fn on_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Delay the first link by `secs`
    pub fn delay(mut self, secs: u64) -> Self {
        self.delay = Some(secs);
        self
    }

    /// Callback for a terminal failure anywhere in the chain
    pub fn catch(mut self, callback: impl Into<Callback>) -> Self {
        self.catch_callbacks.push(callback.into());
        self
    }

    pub fn catch_closure<F, Fut>(self, f: F) -> Self
    where
        F: Fn(CallbackInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let callback = self.dispatcher.callbacks().register_closure(f);
        self.catch(callback)
    }

    pub fn jobs(&self) -> &[QueuedJob] {
        &self.jobs
    }

    /// Dispatch the head link carrying the rest of the chain
    ///
    /// Returns false when the head is a unique job that is already queued.
    pub async fn dispatch(self) -> Result<bool> {
        let mut links = self.jobs.into_iter();
        let mut head = links.next().ok_or(DomainError::EmptyChain)?;

        if self.connection.is_some() {
            head = head.all_on_connection(self.connection);
        }
        if self.queue.is_some() {
            head = head.all_on_queue(self.queue);
        }
        head = head.chain(links.collect());
        head.chain.chain_catch_callbacks = self.catch_callbacks;
        if let Some(secs) = self.delay {
            head = head.delay(secs);
        }

        let length = head.chain.chained.len() + 1;
        let dispatched = self.dispatcher.dispatch(head).await?;
        if dispatched {
            info!(links = length, "Chain dispatched");
        }
        Ok(dispatched)
    }

    pub async fn dispatch_if(self, condition: bool) -> Result<bool> {
        if condition {
            self.dispatch().await
        } else {
            Ok(false)
        }
    }
}
