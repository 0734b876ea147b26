// Domain Layer - Batch counters, queued job envelopes and serializable callbacks

pub mod batch;
pub mod callback;
pub mod error;
pub mod job;

// Re-exports
pub use batch::{
    BatchCounters, BatchId, BatchItem, BatchOptions, BatchRecord, BatchSummary, NewBatch,
    UpdatedBatchJobCounts,
};
pub use callback::{Callback, CallbackKind};
pub use error::DomainError;
pub use job::{ChainState, JobId, QueuedJob, UniqueSpec, UniqueUntil, DEFAULT_MAX_ATTEMPTS};
