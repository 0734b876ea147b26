// Cache Store Port (Interface)

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Key-value cache with atomic add-if-absent
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Store `key` only if absent or expired; `None` TTL never expires
    ///
    /// Returns whether this call created the entry.
    async fn add(&self, key: &str, owner: &str, ttl: Option<Duration>) -> Result<bool>;

    /// Remove `key` regardless of owner
    async fn forget(&self, key: &str) -> Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::port::time_provider::TimeProvider;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Cache in memory, expiring against the injected clock
    pub struct InMemoryCache {
        entries: Mutex<HashMap<String, (String, Option<i64>)>>,
        time_provider: Arc<dyn TimeProvider>,
    }

    impl InMemoryCache {
        pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
            Self {
                entries: Mutex::new(HashMap::new()),
                time_provider,
            }
        }

        pub fn owner_of(&self, key: &str) -> Option<String> {
            let now = self.time_provider.now_millis();
            self.entries
                .lock()
                .unwrap()
                .get(key)
                .filter(|(_, expires)| expires.map_or(true, |at| at > now))
                .map(|(owner, _)| owner.clone())
        }
    }

    #[async_trait]
    impl CacheStore for InMemoryCache {
        async fn add(&self, key: &str, owner: &str, ttl: Option<Duration>) -> Result<bool> {
            let now = self.time_provider.now_millis();
            let mut entries = self.entries.lock().unwrap();

            if let Some((_, expires)) = entries.get(key) {
                if expires.map_or(true, |at| at > now) {
                    return Ok(false);
                }
            }

            let expires = ttl.map(|ttl| now + ttl.as_millis() as i64);
            entries.insert(key.to_string(), (owner.to_string(), expires));
            Ok(true)
        }

        async fn forget(&self, key: &str) -> Result<()> {
            self.entries.lock().unwrap().remove(key);
            Ok(())
        }
    }
}
