// Prune Scheduler
// Periodic cleanup of old batch rows

use crate::error::Result;
use crate::port::{BatchRepository, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

const SECS_PER_HOUR: i64 = 3600;

/// Retention windows in hours; `None` disables that sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneConfig {
    pub interval_hours: u64,
    pub finished_hours: u64,
    pub unfinished_hours: Option<u64>,
    pub cancelled_hours: Option<u64>,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            interval_hours: 24,
            finished_hours: 24,
            unfinished_hours: None,
            cancelled_hours: None,
        }
    }
}

/// Rows removed by one prune run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub finished: u64,
    pub unfinished: u64,
    pub cancelled: u64,
}

impl PruneStats {
    pub fn total(&self) -> u64 {
        self.finished + self.unfinished + self.cancelled
    }
}

pub struct PruneScheduler {
    repository: Arc<dyn BatchRepository>,
    time_provider: Arc<dyn TimeProvider>,
    config: PruneConfig,
}

impl PruneScheduler {
    pub fn new(
        repository: Arc<dyn BatchRepository>,
        time_provider: Arc<dyn TimeProvider>,
        config: PruneConfig,
    ) -> Self {
        Self {
            repository,
            time_provider,
            config,
        }
    }

    /// Prune loop (spawn in the background)
    pub async fn run(self) {
        info!(
            interval_hours = self.config.interval_hours,
            finished_hours = self.config.finished_hours,
            "Prune scheduler started"
        );

        let period = Duration::from_secs(self.config.interval_hours.max(1) * 3600);
        let mut tick = interval(period);

        loop {
            tick.tick().await;

            if let Err(e) = self.run_now().await {
                error!(error = ?e, "Scheduled prune failed");
            }
        }
    }

    /// Prune immediately (manual trigger)
    pub async fn run_now(&self) -> Result<PruneStats> {
        let now = self.time_provider.now_secs();
        let cutoff = |hours: u64| now - hours as i64 * SECS_PER_HOUR;

        let mut stats = PruneStats {
            finished: self.repository.prune(cutoff(self.config.finished_hours)).await?,
            ..PruneStats::default()
        };
        if let Some(hours) = self.config.unfinished_hours {
            stats.unfinished = self.repository.prune_unfinished(cutoff(hours)).await?;
        }
        if let Some(hours) = self.config.cancelled_hours {
            stats.cancelled = self.repository.prune_cancelled(cutoff(hours)).await?;
        }

        info!(
            finished = stats.finished,
            unfinished = stats.unfinished,
            cancelled = stats.cancelled,
            "Batches pruned"
        );
        Ok(stats)
    }
}
