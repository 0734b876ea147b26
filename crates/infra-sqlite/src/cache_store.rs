// SQLite CacheStore Implementation (unique-lock entries)

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use batchline_core::error::Result;
use batchline_core::port::{CacheStore, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

pub struct SqliteCacheStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteCacheStore {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn add(&self, key: &str, owner: &str, ttl: Option<Duration>) -> Result<bool> {
        let now = self.time_provider.now_secs();
        let expiration = ttl.map(|ttl| now + ttl.as_secs() as i64);

        // Insert, or take over an expired entry; a live entry is left alone
        let result = sqlx::query(
            r#"
            INSERT INTO cache_locks (key, owner, expiration) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE
                SET owner = excluded.owner, expiration = excluded.expiration
                WHERE cache_locks.expiration IS NOT NULL AND cache_locks.expiration <= ?
            "#,
        )
        .bind(key)
        .bind(owner)
        .bind(expiration)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn forget(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM cache_locks WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use batchline_core::port::time_provider::mocks::ManualTimeProvider;
    use tokio_test::assert_ok;

    async fn setup() -> (SqliteCacheStore, Arc<ManualTimeProvider>) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let clock = Arc::new(ManualTimeProvider::new(1_000_000));
        (SqliteCacheStore::new(pool, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_add_if_absent_with_ttl() {
        let (cache, clock) = setup().await;
        let ttl = Some(Duration::from_secs(60));

        assert!(cache.add("lock", "a", ttl).await.unwrap());
        assert!(!cache.add("lock", "b", ttl).await.unwrap());

        clock.advance(Duration::from_secs(60));
        assert!(cache.add("lock", "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_entry_without_ttl_needs_forget() {
        let (cache, clock) = setup().await;

        assert!(cache.add("lock", "a", None).await.unwrap());
        clock.advance(Duration::from_secs(86_400));
        assert!(!cache.add("lock", "b", None).await.unwrap());

        assert_ok!(cache.forget("lock").await);
        assert!(cache.add("lock", "b", None).await.unwrap());
        // forgetting an absent key is fine
        assert_ok!(cache.forget("missing").await);
    }
}
