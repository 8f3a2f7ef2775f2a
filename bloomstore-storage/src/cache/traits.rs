//! Cache trait and statistics.
//!
//! The store holds two caches: raw meta bytes keyed by meta key, and
//! extracted block directories keyed by block key. Both sit behind
//! [`Cache`] so callers can supply their own implementation.

use async_trait::async_trait;
use bloomstore_core::BloomResult;

/// Key/value cache shared across tasks.
///
/// Implementations decide their own eviction policy. A `get` after a
/// successful `set` may still miss if the entry was evicted or expired.
#[async_trait]
pub trait Cache<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Look up `key`, counting a hit or miss.
    async fn get(&self, key: &str) -> BloomResult<Option<V>>;

    /// Insert or replace `key`.
    async fn set(&self, key: String, value: V) -> BloomResult<()>;

    /// Check for a live entry without touching recency or hit counters.
    async fn contains(&self, key: &str) -> BloomResult<bool>;

    async fn stats(&self) -> BloomResult<CacheStats>;
}

/// Approximate in-memory or on-disk cost of a cached value.
pub trait Weighted {
    fn weight(&self) -> u64;
}

impl Weighted for Vec<u8> {
    fn weight(&self) -> u64 {
        self.len() as u64
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Summed weight of live entries.
    pub memory_bytes: u64,
    /// Entries removed for capacity or expiry.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_vec_weight_is_length() {
        assert_eq!(vec![0u8; 17].weight(), 17);
        assert_eq!(Vec::<u8>::new().weight(), 0);
    }
}
