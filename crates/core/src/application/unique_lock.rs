// Unique Dispatch Lock
//
// The cache entry is the lock. Acquire is a single add-if-absent call and
// release a forced forget, so callers never read-then-write the entry.

use crate::domain::QueuedJob;
use crate::error::Result;
use crate::port::CacheStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Key prefix shared by every unique-job lock
pub const UNIQUE_LOCK_PREFIX: &str = "batchline_unique_job";

pub struct UniqueLock {
    cache: Arc<dyn CacheStore>,
    prefix: String,
}

impl UniqueLock {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self {
            cache,
            prefix: UNIQUE_LOCK_PREFIX.to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Lock key for a unique job, `None` for ordinary jobs
    pub fn key(&self, job: &QueuedJob) -> Option<String> {
        job.unique
            .as_ref()
            .map(|unique| format!("{}:{}:{}", self.prefix, job.job_type, unique.id))
    }

    /// Try to take the lock; ordinary jobs always succeed
    pub async fn acquire(&self, job: &QueuedJob) -> Result<bool> {
        let (Some(key), Some(unique)) = (self.key(job), job.unique.as_ref()) else {
            return Ok(true);
        };

        let ttl = (unique.for_secs > 0).then(|| Duration::from_secs(unique.for_secs));
        let acquired = self.cache.add(&key, &job.id, ttl).await?;
        debug!(key = %key, job_id = %job.id, acquired, "Unique lock acquire");
        Ok(acquired)
    }

    /// Clear the lock early
    pub async fn release(&self, job: &QueuedJob) -> Result<()> {
        if let Some(key) = self.key(job) {
            self.cache.forget(&key).await?;
            debug!(key = %key, job_id = %job.id, "Unique lock released");
        }
        Ok(())
    }
}
