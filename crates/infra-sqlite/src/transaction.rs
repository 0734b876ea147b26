// SQLite Transaction Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use batchline_core::error::Result;
use batchline_core::port::{BatchTransaction, Transaction};
use sqlx::{Sqlite, Transaction as SqlxTransaction};

/// Open batch-store transaction; dropped without commit means rolled back
pub struct SqliteBatchTransaction {
    tx: SqlxTransaction<'static, Sqlite>,
}

impl SqliteBatchTransaction {
    pub fn new(tx: SqlxTransaction<'static, Sqlite>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Transaction for SqliteBatchTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl BatchTransaction for SqliteBatchTransaction {
    async fn increment_total_jobs(&mut self, batch_id: &str, amount: i64) -> Result<()> {
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
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }
}
