// Port Layer - Interfaces for external dependencies

pub mod batch_repository;
pub mod cache;
pub mod error_reporter;
pub mod id_provider; // For deterministic testing
pub mod queue;
pub mod time_provider;
pub mod transaction;

// Re-exports
pub use batch_repository::BatchRepository;
pub use cache::CacheStore;
pub use error_reporter::{ErrorReporter, TracingErrorReporter};
pub use id_provider::{IdProvider, OrderedUuidProvider};
pub use queue::{resolve_queue, QueueTransport, ReservedJob, DEFAULT_QUEUE};
pub use time_provider::{SystemTimeProvider, TimeProvider};
pub use transaction::{BatchTransaction, Transaction};
