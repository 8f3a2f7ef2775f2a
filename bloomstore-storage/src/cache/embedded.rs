//! Bounded in-process cache with LRU eviction and lazy expiry.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use bloomstore_core::{BloomResult, CacheConfig, StorageError};
use tracing::debug;

use super::traits::{Cache, CacheStats, Weighted};

/// Invoked with each entry removed for capacity or expiry.
pub type EvictionCallback<V> = Arc<dyn Fn(&str, &V) + Send + Sync>;

struct Entry<V> {
    value: V,
    weight: u64,
    inserted_at: Instant,
    tick: u64,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    /// Recency order: smallest tick is least recently used.
    lru: BTreeMap<u64, String>,
    next_tick: u64,
    total_bytes: u64,
    stats: CacheStats,
}

impl<V> Inner<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            lru: BTreeMap::new(),
            next_tick: 0,
            total_bytes: 0,
            stats: CacheStats::default(),
        }
    }

    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn take(&mut self, key: &str) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(&entry.tick);
        self.total_bytes = self.total_bytes.saturating_sub(entry.weight);
        Some(entry)
    }

    fn over_capacity(&self, config: &CacheConfig) -> bool {
        self.entries.len() > config.max_size_items
            || (config.max_size_bytes > 0 && self.total_bytes > config.max_size_bytes)
    }
}

/// In-process cache bounded by entry count and summed weight.
///
/// Expired entries are dropped when they are next looked up. When an insert
/// pushes the cache over either bound, least recently used entries are
/// evicted until it fits again; the entry just inserted is always kept.
/// Replacing a key does not count as an eviction.
pub struct EmbeddedCache<V> {
    name: String,
    config: CacheConfig,
    inner: Mutex<Inner<V>>,
    on_evict: Option<EvictionCallback<V>>,
}

impl<V> fmt::Debug for EmbeddedCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedCache")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

impl<V> EmbeddedCache<V>
where
    V: Clone + Weighted + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, config: CacheConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::new()),
            on_evict: None,
        }
    }

    pub fn with_eviction_callback(mut self, callback: EvictionCallback<V>) -> Self {
        self.on_evict = Some(callback);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Remove `key` without invoking the eviction callback.
    pub fn remove(&self, key: &str) -> BloomResult<Option<V>> {
        let mut inner = self.lock()?;
        Ok(inner.take(key).map(|e| e.value))
    }

    /// Drop every entry without invoking the eviction callback.
    pub fn clear(&self) -> BloomResult<()> {
        let mut inner = self.lock()?;
        inner.entries.clear();
        inner.lru.clear();
        inner.total_bytes = 0;
        Ok(())
    }

    fn lock(&self) -> BloomResult<std::sync::MutexGuard<'_, Inner<V>>> {
        Ok(self.inner.lock().map_err(|_| StorageError::LockPoisoned)?)
    }

    /// Run the eviction callback outside the lock.
    fn notify(&self, evicted: Vec<(String, V)>) {
        if evicted.is_empty() {
            return;
        }
        debug!(cache = %self.name, count = evicted.len(), "Evicted cache entries");
        if let Some(callback) = &self.on_evict {
            for (key, value) in &evicted {
                callback(key, value);
            }
        }
    }

    fn get_sync(&self, key: &str) -> BloomResult<Option<V>> {
        let mut evicted = Vec::new();
        let found = {
            let mut inner = self.lock()?;
            let expired = match inner.entries.get(key) {
                Some(entry) => entry.inserted_at.elapsed() > self.config.ttl,
                None => {
                    inner.stats.misses += 1;
                    return Ok(None);
                }
            };
            if expired {
                if let Some(entry) = inner.take(key) {
                    evicted.push((key.to_string(), entry.value));
                }
                inner.stats.evictions += 1;
                inner.stats.misses += 1;
                None
            } else {
                let tick = inner.bump();
                let Inner { entries, lru, .. } = &mut *inner;
                let value = entries.get_mut(key).map(|entry| {
                    lru.remove(&entry.tick);
                    lru.insert(tick, key.to_string());
                    entry.tick = tick;
                    entry.value.clone()
                });
                inner.stats.hits += 1;
                value
            }
        };
        self.notify(evicted);
        Ok(found)
    }

    fn set_sync(&self, key: String, value: V) -> BloomResult<()> {
        let mut evicted = Vec::new();
        {
            let mut inner = self.lock()?;
            inner.take(&key);

            let weight = value.weight();
            let tick = inner.bump();
            inner.lru.insert(tick, key.clone());
            inner.total_bytes += weight;
            inner.entries.insert(
                key,
                Entry {
                    value,
                    weight,
                    inserted_at: Instant::now(),
                    tick,
                },
            );

            while inner.entries.len() > 1 && inner.over_capacity(&self.config) {
                let oldest = match inner.lru.first_key_value() {
                    Some((_, k)) => k.clone(),
                    None => break,
                };
                if let Some(entry) = inner.take(&oldest) {
                    inner.stats.evictions += 1;
                    evicted.push((oldest, entry.value));
                }
            }
        }
        self.notify(evicted);
        Ok(())
    }

    fn contains_sync(&self, key: &str) -> BloomResult<bool> {
        let inner = self.lock()?;
        Ok(inner
            .entries
            .get(key)
            .map(|e| e.inserted_at.elapsed() <= self.config.ttl)
            .unwrap_or(false))
    }

    fn stats_sync(&self) -> BloomResult<CacheStats> {
        let inner = self.lock()?;
        Ok(CacheStats {
            entry_count: inner.entries.len() as u64,
            memory_bytes: inner.total_bytes,
            ..inner.stats.clone()
        })
    }
}

#[async_trait]
impl<V> Cache<V> for EmbeddedCache<V>
where
    V: Clone + Weighted + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> BloomResult<Option<V>> {
        self.get_sync(key)
    }

    async fn set(&self, key: String, value: V) -> BloomResult<()> {
        self.set_sync(key, value)
    }

    async fn contains(&self, key: &str) -> BloomResult<bool> {
        self.contains_sync(key)
    }

    async fn stats(&self) -> BloomResult<CacheStats> {
        self.stats_sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn cache(items: usize) -> EmbeddedCache<Vec<u8>> {
        EmbeddedCache::new("test", CacheConfig::new().with_max_items(items))
    }

    #[tokio::test]
    async fn test_get_set_counts_hits_and_misses() {
        let c = cache(10);
        assert_eq!(c.get("a").await.unwrap(), None);
        c.set("a".to_string(), vec![1, 2, 3]).await.unwrap();
        assert_eq!(c.get("a").await.unwrap(), Some(vec![1, 2, 3]));

        let stats = c.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.memory_bytes, 3);
    }

    #[tokio::test]
    async fn test_evicts_least_recently_used() {
        let c = cache(2);
        c.set("a".to_string(), vec![1]).await.unwrap();
        c.set("b".to_string(), vec![2]).await.unwrap();
        // touch a so b becomes the eviction candidate
        c.get("a").await.unwrap();
        c.set("c".to_string(), vec![3]).await.unwrap();

        assert!(c.contains("a").await.unwrap());
        assert!(!c.contains("b").await.unwrap());
        assert!(c.contains("c").await.unwrap());
        assert_eq!(c.stats().await.unwrap().evictions, 1);
    }

    #[tokio::test]
    async fn test_byte_bound_keeps_newest_entry() {
        let c: EmbeddedCache<Vec<u8>> = EmbeddedCache::new(
            "bytes",
            CacheConfig::new().with_max_items(100).with_max_bytes(10),
        );
        c.set("a".to_string(), vec![0; 6]).await.unwrap();
        c.set("b".to_string(), vec![0; 6]).await.unwrap();
        assert!(!c.contains("a").await.unwrap());
        assert!(c.contains("b").await.unwrap());

        // oversized entry still lands, everything else goes
        c.set("big".to_string(), vec![0; 64]).await.unwrap();
        assert!(c.contains("big").await.unwrap());
        assert_eq!(c.stats().await.unwrap().entry_count, 1);
    }

    #[tokio::test]
    async fn test_replace_does_not_evict() {
        let evicted = Arc::new(StdMutex::new(Vec::new()));
        let sink = evicted.clone();
        let c = cache(2).with_eviction_callback(Arc::new(move |k: &str, _v: &Vec<u8>| {
            sink.lock().unwrap().push(k.to_string());
        }));
        c.set("a".to_string(), vec![1]).await.unwrap();
        c.set("a".to_string(), vec![2, 2]).await.unwrap();

        assert_eq!(c.get("a").await.unwrap(), Some(vec![2, 2]));
        assert!(evicted.lock().unwrap().is_empty());
        assert_eq!(c.stats().await.unwrap().memory_bytes, 2);
    }

    #[tokio::test]
    async fn test_callback_sees_capacity_evictions() {
        let evicted = Arc::new(StdMutex::new(Vec::new()));
        let sink = evicted.clone();
        let c = cache(1).with_eviction_callback(Arc::new(move |k: &str, _v: &Vec<u8>| {
            sink.lock().unwrap().push(k.to_string());
        }));
        c.set("a".to_string(), vec![1]).await.unwrap();
        c.set("b".to_string(), vec![2]).await.unwrap();
        assert_eq!(*evicted.lock().unwrap(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let c: EmbeddedCache<Vec<u8>> = EmbeddedCache::new(
            "ttl",
            CacheConfig::new().with_ttl(Duration::from_millis(20)),
        );
        c.set("a".to_string(), vec![1]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(!c.contains("a").await.unwrap());
        assert_eq!(c.get("a").await.unwrap(), None);
        let stats = c.stats().await.unwrap();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entry_count, 0);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let c = cache(10);
        c.set("a".to_string(), vec![1]).await.unwrap();
        c.set("b".to_string(), vec![2]).await.unwrap();
        assert_eq!(c.remove("a").unwrap(), Some(vec![1]));
        assert_eq!(c.remove("a").unwrap(), None);
        c.clear().unwrap();
        let stats = c.stats().await.unwrap();
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.memory_bytes, 0);
    }
}
