// SQLite QueueTransport Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use batchline_core::domain::QueuedJob;
use batchline_core::error::Result;
use batchline_core::port::{resolve_queue, QueueTransport, ReservedJob, TimeProvider};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Reservation age after which a job is handed out again
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(90);

pub struct SqliteQueue {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
    retry_after: Duration,
}

impl SqliteQueue {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
            retry_after: DEFAULT_RETRY_AFTER,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Jobs stored for `queue`, reserved or not
    pub async fn size(&self, queue: &str) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM queue_jobs WHERE queue = ?")
            .bind(queue)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn insert(
        &self,
        conn: &mut SqliteConnection,
        job: &QueuedJob,
        queue: Option<&str>,
        delay: Duration,
    ) -> Result<()> {
        let now = self.time_provider.now_secs();
        let queue = resolve_queue(queue, job);

        sqlx::query(
            r#"
            INSERT INTO queue_jobs (queue, payload, attempts, reserved_at, available_at, created_at)
            VALUES (?, ?, ?, NULL, ?, ?)
            "#,
        )
        .bind(&queue)
        .bind(serde_json::to_string(job)?)
        .bind(job.attempts as i64)
        .bind(now + delay.as_secs() as i64)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

        debug!(job_id = %job.id, queue = %queue, delay_secs = delay.as_secs(), "Job enqueued");
        Ok(())
    }
}

#[async_trait]
impl QueueTransport for SqliteQueue {
    async fn push(&self, job: &QueuedJob, queue: Option<&str>) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        self.insert(&mut conn, job, queue, Duration::ZERO).await
    }

    /// All-or-nothing: one transaction for the whole list
    async fn bulk_push(&self, jobs: &[QueuedJob], queue: Option<&str>) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        for job in jobs {
            self.insert(&mut tx, job, queue, Duration::ZERO).await?;
        }
        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn later(&self, job: &QueuedJob, delay: Duration, queue: Option<&str>) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        self.insert(&mut conn, job, queue, delay).await
    }

    async fn pop(&self, queue: &str) -> Result<Option<ReservedJob>> {
        let now = self.time_provider.now_secs();
        let stale_before = now - self.retry_after.as_secs() as i64;

        let row: Option<(i64, String)> = sqlx::query_as(
            r#"
            UPDATE queue_jobs
            SET reserved_at = ?
            WHERE id = (
                SELECT id FROM queue_jobs
                WHERE queue = ? AND available_at <= ?
                  AND (reserved_at IS NULL OR reserved_at <= ?)
                ORDER BY id ASC
                LIMIT 1
            )
            RETURNING id, payload
            "#,
        )
        .bind(now)
        .bind(queue)
        .bind(now)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let Some((receipt, payload)) = row else {
            return Ok(None);
        };

        Ok(Some(ReservedJob {
            receipt,
            queue: queue.to_string(),
            job: serde_json::from_str(&payload)?,
        }))
    }

    async fn acknowledge(&self, reserved: &ReservedJob) -> Result<()> {
        sqlx::query("DELETE FROM queue_jobs WHERE id = ?")
            .bind(reserved.receipt)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(())
    }
}
