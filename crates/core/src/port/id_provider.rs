// ID Provider Port (for deterministic testing)

/// ID provider interface (allows deterministic IDs in tests)
pub trait IdProvider: Send + Sync {
    /// Generate a new unique ID
    fn generate_id(&self) -> String;
}

/// Time-ordered UUID v7 provider; batch IDs sort by creation time
pub struct OrderedUuidProvider;

impl IdProvider for OrderedUuidProvider {
    fn generate_id(&self) -> String {
        uuid::Uuid::now_v7().to_string()
    }
}

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Sequential IDs with a fixed prefix, zero padded so they sort
    pub struct SequentialIdProvider {
        prefix: String,
        next: AtomicU64,
    }

    impl SequentialIdProvider {
        pub fn new(prefix: impl Into<String>) -> Self {
            Self {
                prefix: prefix.into(),
                next: AtomicU64::new(1),
            }
        }
    }

    impl IdProvider for SequentialIdProvider {
        fn generate_id(&self) -> String {
            let n = self.next.fetch_add(1, Ordering::SeqCst);
            format!("{}{:08}", self.prefix, n)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_ids_sort_by_creation() {
        let provider = OrderedUuidProvider;
        let first = provider.generate_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = provider.generate_id();
        assert!(first < second);
    }

    #[test]
    fn test_sequential_ids() {
        let provider = mocks::SequentialIdProvider::new("batch-");
        assert_eq!(provider.generate_id(), "batch-00000001");
        assert_eq!(provider.generate_id(), "batch-00000002");
    }
}
