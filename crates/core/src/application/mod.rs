// Application Layer - Use Cases and Business Logic

pub mod after_response;
pub mod batch;
pub mod callbacks;
pub mod chain;
pub mod chained_batch;
pub mod dispatcher;
pub mod job;
pub mod panic_guard;
pub mod pending_batch;
pub mod prune;
pub mod retry;
pub mod unique_lock;
pub mod worker;

// Re-exports
pub use after_response::AfterResponseHooks;
pub use batch::Batch;
pub use callbacks::{CallbackHandler, CallbackInvocation, CallbackRegistry, ClosureHandler};
pub use chain::PendingChain;
pub use chained_batch::{ChainedBatch, CHAINED_BATCH_JOB_TYPE};
pub use dispatcher::{Dispatcher, DispatcherBuilder, QueueConnections};
pub use job::{Dispatchable, Job, JobContext, JobRegistry, Queueable};
pub use pending_batch::PendingBatch;
pub use prune::{PruneConfig, PruneScheduler, PruneStats};
pub use retry::{RetryDecision, RetryPolicy};
pub use unique_lock::UniqueLock;
pub use worker::{shutdown_channel, ShutdownSender, ShutdownToken, Worker};
