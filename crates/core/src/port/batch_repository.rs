// Batch Repository Port (Interface)

use crate::domain::{BatchRecord, NewBatch, UpdatedBatchJobCounts};
use crate::error::Result;
use crate::port::transaction::BatchTransaction;
use async_trait::async_trait;

/// Sole writer of batch rows
///
/// Every counter mutation is atomic against concurrent callers for the
/// same batch. `None` from a counter mutation means the row is gone.
#[async_trait]
pub trait BatchRepository: Send + Sync {
    /// Page of batches with `id < before`, newest first
    async fn get(&self, limit: i64, before: Option<&str>) -> Result<Vec<BatchRecord>>;

    /// Read the latest row (read-your-writes)
    async fn find(&self, batch_id: &str) -> Result<Option<BatchRecord>>;

    /// Insert a new row with zeroed counters
    async fn store(&self, batch: &NewBatch) -> Result<BatchRecord>;

    /// `total += amount`, `pending += amount`, clear `finished_at`
    async fn increment_total_jobs(&self, batch_id: &str, amount: i64) -> Result<()>;

    /// `pending -= 1`, drop `job_id` from the failed set
    async fn decrement_pending_jobs(
        &self,
        batch_id: &str,
        job_id: &str,
    ) -> Result<Option<UpdatedBatchJobCounts>>;

    /// `failed += 1`, add `job_id` to the failed set once
    async fn increment_failed_jobs(
        &self,
        batch_id: &str,
        job_id: &str,
    ) -> Result<Option<UpdatedBatchJobCounts>>;

    async fn mark_as_finished(&self, batch_id: &str) -> Result<()>;

    /// Set `cancelled_at` and `finished_at`; an existing `cancelled_at` is kept
    async fn cancel(&self, batch_id: &str) -> Result<()>;

    async fn delete(&self, batch_id: &str) -> Result<()>;

    /// Delete finished batches that finished before `before` (epoch seconds)
    async fn prune(&self, before: i64) -> Result<u64>;

    /// Delete unfinished batches created before `before`
    async fn prune_unfinished(&self, before: i64) -> Result<u64>;

    /// Delete cancelled batches created before `before`
    async fn prune_cancelled(&self, before: i64) -> Result<u64>;

    /// Begin a transactional unit for batch growth
    async fn begin_transaction(&self) -> Result<Box<dyn BatchTransaction>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::BatchCounters;
    use crate::error::AppError;
    use crate::port::id_provider::{mocks::SequentialIdProvider, IdProvider};
    use crate::port::time_provider::{SystemTimeProvider, TimeProvider};
    use crate::port::transaction::Transaction;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    type Rows = Arc<Mutex<BTreeMap<String, BatchRecord>>>;

    /// Batch repository backed by a mutex-guarded map
    pub struct InMemoryBatchRepository {
        rows: Rows,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
        faults: Mutex<Vec<&'static str>>,
    }

    impl InMemoryBatchRepository {
        pub fn new() -> Self {
            Self::with_time_provider(Arc::new(SystemTimeProvider))
        }

        pub fn with_time_provider(time_provider: Arc<dyn TimeProvider>) -> Self {
            Self {
                rows: Arc::new(Mutex::new(BTreeMap::new())),
                time_provider,
                id_provider: Arc::new(SequentialIdProvider::new("batch-")),
                faults: Mutex::new(Vec::new()),
            }
        }

        /// Make the next call to `operation` (a trait method name) fail once
        pub fn fail_next(&self, operation: &'static str) {
            self.faults.lock().unwrap().push(operation);
        }

        fn check_fault(&self, operation: &'static str) -> Result<()> {
            let mut faults = self.faults.lock().unwrap();
            match faults.iter().position(|op| *op == operation) {
                Some(index) => {
                    faults.remove(index);
                    Err(AppError::Database(format!("{operation} unavailable")))
                }
                None => Ok(()),
            }
        }

        pub fn len(&self) -> usize {
            self.rows.lock().unwrap().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        /// Insert a row as-is (test setup)
        pub fn insert_raw(&self, record: BatchRecord) {
            self.rows
                .lock()
                .unwrap()
                .insert(record.id.clone(), record);
        }

        fn mutate_counters(
            &self,
            batch_id: &str,
            apply: impl FnOnce(BatchCounters) -> BatchCounters,
        ) -> Option<UpdatedBatchJobCounts> {
            let mut rows = self.rows.lock().unwrap();
            let row = rows.get_mut(batch_id)?;
            let counters = apply(row.counters());
            row.pending_jobs = counters.pending_jobs;
            row.failed_jobs = counters.failed_jobs;
            row.failed_job_ids = counters.failed_job_ids.clone();
            Some(counters.updated())
        }

        fn prune_where(&self, predicate: impl Fn(&BatchRecord) -> bool) -> u64 {
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|_, row| !predicate(row));
            (before - rows.len()) as u64
        }
    }

    impl Default for InMemoryBatchRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    fn grow(rows: &Rows, batch_id: &str, amount: i64) {
        if let Some(row) = rows.lock().unwrap().get_mut(batch_id) {
            row.total_jobs += amount;
            row.pending_jobs += amount;
            row.finished_at = None;
        }
    }

    #[async_trait]
    impl BatchRepository for InMemoryBatchRepository {
        async fn get(&self, limit: i64, before: Option<&str>) -> Result<Vec<BatchRecord>> {
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .values()
                .rev()
                .filter(|row| before.map_or(true, |b| row.id.as_str() < b))
                .take(limit.max(0) as usize)
                .cloned()
                .collect())
        }

        async fn find(&self, batch_id: &str) -> Result<Option<BatchRecord>> {
            self.check_fault("find")?;
            Ok(self.rows.lock().unwrap().get(batch_id).cloned())
        }

        async fn store(&self, batch: &NewBatch) -> Result<BatchRecord> {
            let record = BatchRecord {
                id: self.id_provider.generate_id(),
                name: batch.name.clone(),
                total_jobs: 0,
                pending_jobs: 0,
                failed_jobs: 0,
                failed_job_ids: Vec::new(),
                options: batch.options.clone(),
                created_at: self.time_provider.now_secs(),
                cancelled_at: None,
                finished_at: None,
            };
            self.insert_raw(record.clone());
            Ok(record)
        }

        async fn increment_total_jobs(&self, batch_id: &str, amount: i64) -> Result<()> {
            grow(&self.rows, batch_id, amount);
            Ok(())
        }

        async fn decrement_pending_jobs(
            &self,
            batch_id: &str,
            job_id: &str,
        ) -> Result<Option<UpdatedBatchJobCounts>> {
            self.check_fault("decrement_pending_jobs")?;
            Ok(self.mutate_counters(batch_id, |c| c.record_success(job_id)))
        }

        async fn increment_failed_jobs(
            &self,
            batch_id: &str,
            job_id: &str,
        ) -> Result<Option<UpdatedBatchJobCounts>> {
            self.check_fault("increment_failed_jobs")?;
            Ok(self.mutate_counters(batch_id, |c| c.record_failure(job_id)))
        }

        async fn mark_as_finished(&self, batch_id: &str) -> Result<()> {
            self.check_fault("mark_as_finished")?;
            let now = self.time_provider.now_secs();
            if let Some(row) = self.rows.lock().unwrap().get_mut(batch_id) {
                row.finished_at = Some(now);
            }
            Ok(())
        }

        async fn cancel(&self, batch_id: &str) -> Result<()> {
            self.check_fault("cancel")?;
            let now = self.time_provider.now_secs();
            if let Some(row) = self.rows.lock().unwrap().get_mut(batch_id) {
                row.cancelled_at = row.cancelled_at.or(Some(now));
                row.finished_at = Some(now);
            }
            Ok(())
        }

        async fn delete(&self, batch_id: &str) -> Result<()> {
            self.rows.lock().unwrap().remove(batch_id);
            Ok(())
        }

        async fn prune(&self, before: i64) -> Result<u64> {
            Ok(self.prune_where(|row| row.finished_at.is_some_and(|at| at < before)))
        }

        async fn prune_unfinished(&self, before: i64) -> Result<u64> {
            Ok(self.prune_where(|row| row.finished_at.is_none() && row.created_at < before))
        }

        async fn prune_cancelled(&self, before: i64) -> Result<u64> {
            Ok(self.prune_where(|row| row.cancelled_at.is_some() && row.created_at < before))
        }

        async fn begin_transaction(&self) -> Result<Box<dyn BatchTransaction>> {
            Ok(Box::new(InMemoryBatchTransaction {
                rows: Arc::clone(&self.rows),
                staged: Vec::new(),
            }))
        }
    }

    /// Buffers growth until commit
    pub struct InMemoryBatchTransaction {
        rows: Rows,
        staged: Vec<(String, i64)>,
    }

    #[async_trait]
    impl Transaction for InMemoryBatchTransaction {
        async fn commit(self: Box<Self>) -> Result<()> {
            for (batch_id, amount) in &self.staged {
                grow(&self.rows, batch_id, *amount);
            }
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl BatchTransaction for InMemoryBatchTransaction {
        async fn increment_total_jobs(&mut self, batch_id: &str, amount: i64) -> Result<()> {
            self.staged.push((batch_id.to_string(), amount));
            Ok(())
        }
    }
}
