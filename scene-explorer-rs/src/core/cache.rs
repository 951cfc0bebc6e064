//! Bounded least-recently-used store for parsed tables and maps.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

/// Default number of entries kept per store.
pub const DEFAULT_CAPACITY: usize = 24;

/// Thread-safe LRU store handing out shared values.
///
/// Values are stored as `Arc<V>` so a hit costs one reference-count bump.
/// Two threads that miss on the same key may both compute the value; the
/// later `put` wins, which is harmless for deterministic loaders.
pub struct LruStore<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, Arc<V>>>,
}

impl<K: Hash + Eq, V> LruStore<K, V> {
    /// Creates a store holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Returns the cached value and marks it most recently used.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries.lock().get(key).map(Arc::clone)
    }

    /// Inserts a value, evicting the least recently used entry when full.
    pub fn put(&self, key: K, value: Arc<V>) {
        self.entries.lock().put(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_evicts_least_recent() {
        let store: LruStore<&str, i32> = LruStore::new(2);
        store.put("a", Arc::new(1));
        store.put("b", Arc::new(2));
        assert_eq!(store.get(&"a").as_deref(), Some(&1));
        store.put("c", Arc::new(3));

        assert!(store.get(&"b").is_none());
        assert_eq!(store.get(&"a").as_deref(), Some(&1));
        assert_eq!(store.get(&"c").as_deref(), Some(&3));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let store: LruStore<u8, u8> = LruStore::new(0);
        store.put(1, Arc::new(1));
        assert_eq!(store.len(), 1);
    }
}
