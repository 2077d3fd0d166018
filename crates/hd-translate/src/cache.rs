//! In-process LRU cache with per-entry TTL
//!
//! Backed by an ordered map: a hit moves the entry to the back, insertion at
//! capacity evicts the front (least recently used). Expired entries are
//! dropped on access. `get` and `set` are safe to call concurrently.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

pub struct LruTtlCache<K, V> {
    capacity: usize,
    ttl: Duration,
    map: Mutex<IndexMap<K, Entry<V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> LruTtlCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            map: Mutex::new(IndexMap::with_capacity(capacity.min(1024))),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut map = self.map.lock();
        let index = map.get_index_of(key)?;
        let fresh = map
            .get_index(index)
            .map(|(_, entry)| entry.inserted_at.elapsed() < self.ttl)
            .unwrap_or(false);
        if !fresh {
            map.shift_remove_index(index);
            return None;
        }
        // Move to back (most recently used).
        let last = map.len() - 1;
        map.move_index(index, last);
        map.get_index(last).map(|(_, entry)| entry.value.clone())
    }

    pub fn put(&self, key: K, value: V) {
        let mut map = self.map.lock();
        map.shift_remove(&key);
        if map.len() >= self.capacity {
            map.shift_remove_index(0);
        }
        map.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_and_miss() {
        let cache = LruTtlCache::new(10, Duration::from_secs(60));
        cache.put("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
    }

    #[test]
    fn test_capacity_evicts_lru() {
        let cache = LruTtlCache::new(2, Duration::from_secs(60));
        cache.put("a", 1);
        cache.put("b", 2);
        // Touch "a" so "b" is least recently used.
        assert_eq!(cache.get(&"a"), Some(1));
        cache.put("c", 3);

        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = LruTtlCache::new(10, Duration::from_millis(20));
        cache.put("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get(&"a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_overwrite_refreshes() {
        let cache = LruTtlCache::new(2, Duration::from_secs(60));
        cache.put("a", 1);
        cache.put("a", 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"a"), Some(2));
    }
}
