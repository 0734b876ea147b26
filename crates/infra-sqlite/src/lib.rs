// Batchline Infrastructure - SQLite Adapter
// Implements: BatchRepository, BatchTransaction, QueueTransport, CacheStore

mod batch_repository;
mod cache_store;
mod connection;
mod error;
mod migration;
mod queue;
mod transaction;

pub use batch_repository::SqliteBatchRepository;
pub use cache_store::SqliteCacheStore;
pub use connection::create_pool;
pub use error::map_sqlx_error;
pub use migration::run_migrations;
pub use queue::SqliteQueue;
pub use transaction::SqliteBatchTransaction;

// Note: sqlx::Error conversion goes through map_sqlx_error
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
