//! Prune Tests
//!
//! Retention sweeps against SQLite, including multi-page deletes

use batchline_core::application::{PruneConfig, PruneScheduler};
use batchline_core::domain::NewBatch;
use batchline_core::port::id_provider::mocks::SequentialIdProvider;
use batchline_core::port::time_provider::mocks::ManualTimeProvider;
use batchline_core::port::{BatchRepository, TimeProvider};
use batchline_infra_sqlite::{create_pool, run_migrations, SqliteBatchRepository};
use std::sync::Arc;
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(3600);

async fn setup() -> (Arc<SqliteBatchRepository>, Arc<ManualTimeProvider>) {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    let clock = Arc::new(ManualTimeProvider::new(1_700_000_000_000));
    let repository = Arc::new(SqliteBatchRepository::new(
        pool,
        clock.clone(),
        Arc::new(SequentialIdProvider::new("b")),
    ));
    (repository, clock)
}

#[tokio::test]
async fn test_prune_deletes_more_than_one_page() {
    let (repository, clock) = setup().await;

    for _ in 0..1500 {
        let record = repository.store(&NewBatch::default()).await.unwrap();
        repository.mark_as_finished(&record.id).await.unwrap();
    }
    let unfinished = repository.store(&NewBatch::default()).await.unwrap();

    clock.advance(Duration::from_secs(1));
    let deleted = repository.prune(clock.now_secs()).await.unwrap();

    assert_eq!(deleted, 1500);
    let left = repository.get(10, None).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, unfinished.id);
}

#[tokio::test]
async fn test_scheduler_applies_each_retention_window() {
    let (repository, clock) = setup().await;

    let finished = repository.store(&NewBatch::default()).await.unwrap();
    repository.mark_as_finished(&finished.id).await.unwrap();
    let stuck = repository.store(&NewBatch::default()).await.unwrap();
    let cancelled = repository.store(&NewBatch::default()).await.unwrap();
    repository.cancel(&cancelled.id).await.unwrap();

    clock.advance(HOUR * 30);
    let recent = repository.store(&NewBatch::default()).await.unwrap();
    repository.mark_as_finished(&recent.id).await.unwrap();

    let scheduler = PruneScheduler::new(
        repository.clone(),
        clock.clone(),
        PruneConfig {
            interval_hours: 1,
            finished_hours: 24,
            unfinished_hours: Some(48),
            cancelled_hours: Some(12),
        },
    );
    let stats = scheduler.run_now().await.unwrap();

    // the cancelled row is also finished, so the finished sweep takes it first
    assert_eq!(stats.finished, 2);
    assert_eq!(stats.unfinished, 0);
    assert_eq!(stats.cancelled, 0);

    let ids: Vec<_> = repository
        .get(10, None)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec![recent.id.clone(), stuck.id.clone()]);

    clock.advance(HOUR * 20);
    let stats = scheduler.run_now().await.unwrap();
    assert_eq!(stats.unfinished, 1);
    assert_eq!(stats.total(), 1);
}
