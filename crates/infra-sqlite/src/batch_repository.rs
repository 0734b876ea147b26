// SQLite BatchRepository Implementation

use crate::error::map_sqlx_error;
use crate::SqliteBatchTransaction;
use async_trait::async_trait;
use batchline_core::domain::{
    BatchCounters, BatchOptions, BatchRecord, NewBatch, UpdatedBatchJobCounts,
};
use batchline_core::error::{AppError, Result};
use batchline_core::port::{BatchRepository, BatchTransaction, IdProvider, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Rows deleted per prune statement
const PRUNE_PAGE_SIZE: i64 = 1000;

/// Attempts for one counter mutation before contention is surfaced
const MAX_CONTENTION_ATTEMPTS: u32 = 5;

/// Backoff step between contended attempts (grows linearly)
const CONTENTION_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy)]
enum CounterChange {
    Succeeded,
    Failed,
}

impl CounterChange {
    fn apply(self, counters: BatchCounters, job_id: &str) -> BatchCounters {
        match self {
            CounterChange::Succeeded => counters.record_success(job_id),
            CounterChange::Failed => counters.record_failure(job_id),
        }
    }
}

pub struct SqliteBatchRepository {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
}

impl SqliteBatchRepository {
    pub fn new(
        pool: SqlitePool,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
    ) -> Self {
        Self {
            pool,
            time_provider,
            id_provider,
        }
    }

    /// Read-modify-write of the counter columns, retried on contention
    async fn update_counters(
        &self,
        batch_id: &str,
        job_id: &str,
        change: CounterChange,
    ) -> Result<Option<UpdatedBatchJobCounts>> {
        let mut attempt = 1;
        loop {
            match self.try_update_counters(batch_id, job_id, change).await {
                Err(e) if e.is_contention() && attempt < MAX_CONTENTION_ATTEMPTS => {
                    warn!(
                        batch_id = %batch_id,
                        job_id = %job_id,
                        attempt,
                        error = %e,
                        "Batch row contended, retrying"
                    );
                    tokio::time::sleep(CONTENTION_BACKOFF * attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn try_update_counters(
        &self,
        batch_id: &str,
        job_id: &str,
        change: CounterChange,
    ) -> Result<Option<UpdatedBatchJobCounts>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // A write first takes the database write lock before the read
        let locked = sqlx::query("UPDATE job_batches SET id = id WHERE id = ?")
            .bind(batch_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        if locked.rows_affected() == 0 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(None);
        }

        let (pending_jobs, failed_jobs, failed_job_ids): (i64, i64, String) = sqlx::query_as(
            "SELECT pending_jobs, failed_jobs, failed_job_ids FROM job_batches WHERE id = ?",
        )
        .bind(batch_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let counters = change.apply(
            BatchCounters {
                pending_jobs,
                failed_jobs,
                failed_job_ids: serde_json::from_str(&failed_job_ids)?,
            },
            job_id,
        );

        sqlx::query(
            "UPDATE job_batches SET pending_jobs = ?, failed_jobs = ?, failed_job_ids = ? WHERE id = ?",
        )
        .bind(counters.pending_jobs)
        .bind(counters.failed_jobs)
        .bind(serde_json::to_string(&counters.failed_job_ids)?)
        .bind(batch_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        debug!(
            batch_id = %batch_id,
            job_id = %job_id,
            change = ?change,
            pending_jobs = counters.pending_jobs,
            failed_jobs = counters.failed_jobs,
            "Batch counters updated"
        );
        Ok(Some(counters.updated()))
    }

    /// Delete matching rows a page at a time until none are left
    async fn prune_in_pages(&self, predicate: &str, before: i64) -> Result<u64> {
        let sql = format!(
            "DELETE FROM job_batches WHERE id IN (SELECT id FROM job_batches WHERE {predicate} LIMIT ?)"
        );

        let mut total = 0u64;
        loop {
            let deleted = sqlx::query(&sql)
                .bind(before)
                .bind(PRUNE_PAGE_SIZE)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?
                .rows_affected();

            if deleted == 0 {
                break;
            }
            total += deleted;
        }
        Ok(total)
    }
}

#[async_trait]
impl BatchRepository for SqliteBatchRepository {
    async fn get(&self, limit: i64, before: Option<&str>) -> Result<Vec<BatchRecord>> {
        let rows: Vec<BatchRow> = sqlx::query_as(
            r#"
            SELECT * FROM job_batches
            WHERE (? IS NULL OR id < ?)
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(before)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(BatchRow::into_record).collect()
    }

    async fn find(&self, batch_id: &str) -> Result<Option<BatchRecord>> {
        let row: Option<BatchRow> = sqlx::query_as("SELECT * FROM job_batches WHERE id = ?")
            .bind(batch_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(BatchRow::into_record).transpose()
    }

    async fn store(&self, batch: &NewBatch) -> Result<BatchRecord> {
        let id = self.id_provider.generate_id();
        let created_at = self.time_provider.now_secs();

        sqlx::query(
            r#"
            INSERT INTO job_batches (
                id, name, total_jobs, pending_jobs, failed_jobs,
                failed_job_ids, options, created_at, cancelled_at, finished_at
            ) VALUES (?, ?, 0, 0, 0, '[]', ?, ?, NULL, NULL)
            "#,
        )
        .bind(&id)
        .bind(&batch.name)
        .bind(serde_json::to_string(&batch.options)?)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        self.find(&id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("batch {id} vanished after insert")))
    }

    async fn increment_total_jobs(&self, batch_id: &str, amount: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE job_batches
            SET total_jobs = total_jobs + ?, pending_jobs = pending_jobs + ?, finished_at = NULL
            WHERE id = ?
            "#,
        )
        .bind(amount)
        .bind(amount)
        .bind(batch_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn decrement_pending_jobs(
        &self,
        batch_id: &str,
        job_id: &str,
    ) -> Result<Option<UpdatedBatchJobCounts>> {
        self.update_counters(batch_id, job_id, CounterChange::Succeeded)
            .await
    }

    async fn increment_failed_jobs(
        &self,
        batch_id: &str,
        job_id: &str,
    ) -> Result<Option<UpdatedBatchJobCounts>> {
        self.update_counters(batch_id, job_id, CounterChange::Failed)
            .await
    }

    async fn mark_as_finished(&self, batch_id: &str) -> Result<()> {
        sqlx::query("UPDATE job_batches SET finished_at = ? WHERE id = ?")
            .bind(self.time_provider.now_secs())
            .bind(batch_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn cancel(&self, batch_id: &str) -> Result<()> {
        let now = self.time_provider.now_secs();
        sqlx::query(
            "UPDATE job_batches SET cancelled_at = COALESCE(cancelled_at, ?), finished_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(batch_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn delete(&self, batch_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM job_batches WHERE id = ?")
            .bind(batch_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn prune(&self, before: i64) -> Result<u64> {
        let deleted = self
            .prune_in_pages("finished_at IS NOT NULL AND finished_at < ?", before)
            .await?;
        info!(deleted, before, "Pruned finished batches");
        Ok(deleted)
    }

    async fn prune_unfinished(&self, before: i64) -> Result<u64> {
        let deleted = self
            .prune_in_pages("finished_at IS NULL AND created_at < ?", before)
            .await?;
        info!(deleted, before, "Pruned unfinished batches");
        Ok(deleted)
    }

    async fn prune_cancelled(&self, before: i64) -> Result<u64> {
        let deleted = self
            .prune_in_pages("cancelled_at IS NOT NULL AND created_at < ?", before)
            .await?;
        info!(deleted, before, "Pruned cancelled batches");
        Ok(deleted)
    }

    async fn begin_transaction(&self) -> Result<Box<dyn BatchTransaction>> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(SqliteBatchTransaction::new(tx)))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BatchRow {
    id: String,
    name: String,
    total_jobs: i64,
    pending_jobs: i64,
    failed_jobs: i64,
    failed_job_ids: String,
    options: Option<String>,
    created_at: i64,
    cancelled_at: Option<i64>,
    finished_at: Option<i64>,
}

impl BatchRow {
    fn into_record(self) -> Result<BatchRecord> {
        let options = match self.options.as_deref() {
            Some(text) if !text.is_empty() => serde_json::from_str(text)?,
            _ => BatchOptions::default(),
        };

        Ok(BatchRecord {
            id: self.id,
            name: self.name,
            total_jobs: self.total_jobs,
            pending_jobs: self.pending_jobs,
            failed_jobs: self.failed_jobs,
            failed_job_ids: serde_json::from_str(&self.failed_job_ids)?,
            options,
            created_at: self.created_at,
            cancelled_at: self.cancelled_at,
            finished_at: self.finished_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use batchline_core::domain::{Callback, CallbackKind};
    use batchline_core::port::id_provider::mocks::SequentialIdProvider;
    use batchline_core::port::time_provider::mocks::ManualTimeProvider;
    use batchline_core::port::Transaction;

    async fn setup() -> (SqliteBatchRepository, Arc<ManualTimeProvider>) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let clock = Arc::new(ManualTimeProvider::new(1_700_000_000_000));
        let repo = SqliteBatchRepository::new(
            pool,
            clock.clone(),
            Arc::new(SequentialIdProvider::new("b-")),
        );
        (repo, clock)
    }

    #[tokio::test]
    async fn test_store_round_trips_options() {
        let (repo, _) = setup().await;
        let mut options = BatchOptions::default();
        options.push_callback(CallbackKind::Finally, Callback::handler("cleanup"));
        options.allow_failures = true;

        let stored = repo
            .store(&NewBatch {
                name: "import".to_string(),
                options: options.clone(),
            })
            .await
            .unwrap();

        assert_eq!(stored.id, "b-00000001");
        assert_eq!(stored.created_at, 1_700_000_000);
        assert_eq!(stored.options, options);
        assert_eq!((stored.total_jobs, stored.pending_jobs, stored.failed_jobs), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_counter_mutations() {
        let (repo, _) = setup().await;
        let batch = repo.store(&NewBatch::default()).await.unwrap();
        repo.increment_total_jobs(&batch.id, 3).await.unwrap();

        let counts = repo.increment_failed_jobs(&batch.id, "j1").await.unwrap().unwrap();
        assert_eq!((counts.pending_jobs, counts.failed_jobs), (3, 1));
        let counts = repo.increment_failed_jobs(&batch.id, "j1").await.unwrap().unwrap();
        assert_eq!(counts.failed_jobs, 2);

        let row = repo.find(&batch.id).await.unwrap().unwrap();
        assert_eq!(row.failed_job_ids, vec!["j1".to_string()]);

        let counts = repo.decrement_pending_jobs(&batch.id, "j1").await.unwrap().unwrap();
        assert_eq!((counts.pending_jobs, counts.failed_jobs), (2, 2));
        let row = repo.find(&batch.id).await.unwrap().unwrap();
        assert!(row.failed_job_ids.is_empty());
    }

    #[tokio::test]
    async fn test_missing_batch_is_a_noop() {
        let (repo, _) = setup().await;
        assert!(repo.decrement_pending_jobs("nope", "j").await.unwrap().is_none());
        assert!(repo.increment_failed_jobs("nope", "j").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_growth_clears_finished_and_cancel_is_sticky() {
        let (repo, clock) = setup().await;
        let batch = repo.store(&NewBatch::default()).await.unwrap();

        repo.mark_as_finished(&batch.id).await.unwrap();
        assert!(repo.find(&batch.id).await.unwrap().unwrap().finished());

        repo.increment_total_jobs(&batch.id, 1).await.unwrap();
        assert!(!repo.find(&batch.id).await.unwrap().unwrap().finished());

        repo.cancel(&batch.id).await.unwrap();
        clock.advance(Duration::from_secs(30));
        repo.cancel(&batch.id).await.unwrap();

        let row = repo.find(&batch.id).await.unwrap().unwrap();
        assert_eq!(row.cancelled_at, Some(1_700_000_000));
        assert_eq!(row.finished_at, Some(1_700_000_030));
    }

    #[tokio::test]
    async fn test_transaction_rollback_discards_growth() {
        let (repo, _) = setup().await;
        let batch = repo.store(&NewBatch::default()).await.unwrap();

        let mut tx = repo.begin_transaction().await.unwrap();
        tx.increment_total_jobs(&batch.id, 4).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(repo.find(&batch.id).await.unwrap().unwrap().total_jobs, 0);

        let mut tx = repo.begin_transaction().await.unwrap();
        tx.increment_total_jobs(&batch.id, 4).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(repo.find(&batch.id).await.unwrap().unwrap().pending_jobs, 4);
    }

    #[tokio::test]
    async fn test_get_pages_newest_first() {
        let (repo, _) = setup().await;
        for _ in 0..5 {
            repo.store(&NewBatch::default()).await.unwrap();
        }

        let first: Vec<_> = repo.get(2, None).await.unwrap().into_iter().map(|b| b.id).collect();
        assert_eq!(first, vec!["b-00000005", "b-00000004"]);

        let next: Vec<_> = repo
            .get(10, Some("b-00000004"))
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(next, vec!["b-00000003", "b-00000002", "b-00000001"]);
    }

    #[tokio::test]
    async fn test_prune_predicates() {
        let (repo, clock) = setup().await;
        let finished = repo.store(&NewBatch::default()).await.unwrap();
        repo.mark_as_finished(&finished.id).await.unwrap();
        let unfinished = repo.store(&NewBatch::default()).await.unwrap();
        let cancelled = repo.store(&NewBatch::default()).await.unwrap();
        repo.cancel(&cancelled.id).await.unwrap();

        clock.advance(Duration::from_secs(100));
        let cutoff = clock.now_secs();

        assert_eq!(repo.prune_cancelled(cutoff).await.unwrap(), 1);
        assert_eq!(repo.prune_unfinished(cutoff).await.unwrap(), 1);
        assert_eq!(repo.prune(cutoff).await.unwrap(), 1);
        assert!(repo.find(&unfinished.id).await.unwrap().is_none());
        assert!(repo.get(10, None).await.unwrap().is_empty());
    }
}
