// Transaction port for atomic batch growth

use crate::error::Result;
use async_trait::async_trait;

/// Transaction trait for atomic multi-step operations
#[async_trait]
pub trait Transaction: Send {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Batch repository operations within a transaction
///
/// Dropping without commit discards the changes.
#[async_trait]
pub trait BatchTransaction: Transaction {
    /// Grow total and pending by `amount`, clear `finished_at`
    async fn increment_total_jobs(&mut self, batch_id: &str, amount: i64) -> Result<()>;
}
