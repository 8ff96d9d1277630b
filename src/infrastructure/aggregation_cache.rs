use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct AggregationCacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for AggregationCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 1024,
        }
    }
}

#[derive(Debug, Default)]
pub struct AggregationCacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    created_at: Instant,
}

/// Cache of successful backend payloads, keyed by endpoint key plus the
/// caller's forwarded headers (see `RequestContext::cache_key`). Failures are
/// never stored, so a broken backend is retried on the next request.
#[derive(Debug, Clone)]
pub struct AggregationCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    config: AggregationCacheConfig,
    metrics: Arc<AggregationCacheMetrics>,
}

impl Default for AggregationCache {
    fn default() -> Self {
        Self::new(AggregationCacheConfig::default())
    }
}

impl AggregationCache {
    pub fn new(config: AggregationCacheConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            config,
            metrics: Arc::new(AggregationCacheMetrics::default()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let fresh = self
            .entries
            .get(key)
            .filter(|entry| entry.created_at.elapsed() < self.config.ttl)
            .map(|entry| entry.value.clone());

        match fresh {
            Some(value) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                self.entries
                    .remove_if(key, |_, entry| entry.created_at.elapsed() >= self.config.ttl);
                None
            }
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        if self.config.ttl.is_zero() {
            return;
        }
        if self.entries.len() >= self.config.max_entries {
            self.evict_expired();
        }
        if self.entries.len() >= self.config.max_entries {
            // Still full of live entries; drop the oldest one.
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.created_at)
                .map(|entry| entry.key().clone());
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
                self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                created_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn metrics(&self) -> &AggregationCacheMetrics {
        &self.metrics
    }

    fn evict_expired(&self) {
        let ttl = self.config.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.created_at.elapsed() < ttl);
        let evicted = before.saturating_sub(self.entries.len());
        self.metrics
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entries_expire_after_ttl() {
        let cache = AggregationCache::new(AggregationCacheConfig {
            ttl: Duration::from_millis(20),
            max_entries: 8,
        });
        cache.insert("Catalog_en", json!({ "a": 1 }));
        assert_eq!(cache.get("Catalog_en"), Some(json!({ "a": 1 })));

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get("Catalog_en"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn full_cache_drops_oldest_entry() {
        let cache = AggregationCache::new(AggregationCacheConfig {
            ttl: Duration::from_secs(60),
            max_entries: 2,
        });
        cache.insert("a", json!(1));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("b", json!(2));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("c", json!(3));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("c"), Some(json!(3)));
    }

    #[test]
    fn zero_ttl_disables_caching() {
        let cache = AggregationCache::new(AggregationCacheConfig {
            ttl: Duration::ZERO,
            max_entries: 8,
        });
        cache.insert("a", json!(1));
        assert!(cache.is_empty());
    }
}
