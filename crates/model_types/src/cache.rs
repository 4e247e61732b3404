//! Process-local TTL cache with an injected clock and explicit invalidation.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::Clock;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

struct Entry<V> {
    value: V,
    inserted_at_ms: i64,
}

pub struct TtlCache<K, V> {
    ttl_ms: i64,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<K, Entry<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl_ms: ttl.as_millis() as i64,
            clock,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fetch a live entry; an expired one is dropped and counted as a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock();
        let fresh = match entries.get(key) {
            Some(e) if now - e.inserted_at_ms < self.ttl_ms => Some(e.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        };
        drop(entries);

        match fresh {
            Some(v) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(v)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let inserted_at_ms = self.clock.now_ms();
        self.entries.lock().insert(
            key,
            Entry {
                value,
                inserted_at_ms,
            },
        );
    }

    pub fn invalidate(&self, key: &K) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Drop every entry whose key matches `pred`. Returns how many went.
    pub fn invalidate_where(&self, pred: impl Fn(&K) -> bool) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|k, _| !pred(k));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let ttl = self.ttl_ms;
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| now - e.inserted_at_ms < ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn setup() -> (Arc<ManualClock>, TtlCache<String, u32>) {
        let clock = Arc::new(ManualClock::new(0));
        let cache = TtlCache::new(Duration::from_secs(60), clock.clone());
        (clock, cache)
    }

    #[test]
    fn entries_expire_after_ttl() {
        let (clock, cache) = setup();
        cache.insert("a".into(), 1);
        assert_eq!(cache.get(&"a".into()), Some(1));

        clock.advance(Duration::from_secs(61));
        assert_eq!(cache.get(&"a".into()), None);
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_ratio() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn invalidate_where_matches_prefix() {
        let (_clock, cache) = setup();
        cache.insert("risk_scorer/v1".into(), 1);
        cache.insert("risk_scorer/v2".into(), 2);
        cache.insert("trend_predictor/v1".into(), 3);

        let removed = cache.invalidate_where(|k| k.starts_with("risk_scorer/"));
        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.invalidate(&"trend_predictor/v1".into()));
        assert!(!cache.invalidate(&"trend_predictor/v1".into()));
    }

    #[test]
    fn purge_only_drops_stale() {
        let (clock, cache) = setup();
        cache.insert("old".into(), 1);
        clock.advance(Duration::from_secs(30));
        cache.insert("new".into(), 2);
        clock.advance(Duration::from_secs(31));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.get(&"new".into()), Some(2));
    }
}
