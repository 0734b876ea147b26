// Retry logic for failed job attempts
use crate::domain::QueuedJob;
use std::time::Duration;
use tracing::{info, warn};

/// Exponential backoff factor between attempts
pub const BACKOFF_FACTOR: f64 = 2.0;

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue the job after the backoff delay
    Retry(Duration),
    /// No attempts left, the failure is terminal
    Failed,
}

/// Decides whether a failed attempt is retried and when
pub struct RetryPolicy {
    base_delay_ms: u64,
}

impl RetryPolicy {
    /// `base_delay_ms` is the delay before the first retry (default 1000)
    pub fn new(base_delay_ms: u64) -> Self {
        Self { base_delay_ms }
    }

    /// Decide what happens after the attempt `job.attempts` failed
    ///
    /// delay = base_delay * BACKOFF_FACTOR^attempts * (1.0 ± 0.1)
    pub fn should_retry(&self, job: &QueuedJob) -> RetryDecision {
        if !job.has_attempts_left() {
            warn!(
                job_id = %job.id,
                attempts = job.attempts + 1,
                max_attempts = job.max_attempts,
                "Max retry attempts reached"
            );
            return RetryDecision::Failed;
        }

        let base_delay_ms = self.base_delay_ms as f64 * BACKOFF_FACTOR.powi(job.attempts as i32);

        // ±10% jitter seeded by the job ID so retries of one job are stable
        let jitter_seed = job.id.chars().map(|c| c as u32).sum::<u32>();
        let jitter_factor = 0.9 + ((jitter_seed % 21) as f64 / 100.0);

        let delay = Duration::from_millis((base_delay_ms * jitter_factor) as u64);

        info!(
            job_id = %job.id,
            attempt = job.attempts + 1,
            max_attempts = job.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling retry"
        );

        RetryDecision::Retry(delay)
    }

    /// Copy of the envelope for the next attempt
    pub fn prepare_for_retry(&self, job: &QueuedJob) -> QueuedJob {
        let mut next = job.clone();
        next.attempts += 1;
        next
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(crate::application::worker::constants::DEFAULT_RETRY_BASE_DELAY_MS)
    }
}
