use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

struct Inner<K, V> {
    capacity: usize,
    // Front = most recently used.
    order: Vec<K>,
    map: HashMap<K, V>,
}

impl<K: Eq + Hash + Clone, V: Clone> Inner<K, V> {
    fn get(&mut self, key: &K) -> Option<V> {
        if self.map.contains_key(key) {
            self.touch(key);
            self.map.get(key).cloned()
        } else {
            None
        }
    }

    fn put(&mut self, key: K, value: V) -> Option<V> {
        let old = self.map.insert(key.clone(), value);
        if old.is_some() {
            self.touch(&key);
            return old;
        }
        self.order.insert(0, key);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop() {
                self.map.remove(&evicted);
            }
        }
        None
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        self.order.retain(|k| k != key);
        self.map.remove(key)
    }

    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos);
            self.order.insert(0, k);
        }
    }
}

/// A fixed-capacity, internally synchronized least-recently-used cache.
///
/// Backs the skinny path arena's node and item caches, which want bounded
/// memory with recency-based eviction, shared across threads without an
/// external lock at each call site.
pub struct LruCache<K, V> {
    inner: Mutex<Inner<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "LRU cache capacity must be positive");
        Self {
            inner: Mutex::new(Inner {
                capacity,
                order: Vec::with_capacity(capacity),
                map: HashMap::with_capacity(capacity),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }

    /// Returns a clone of the cached value, marking it most-recently-used.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key)
    }

    /// Like [`Self::get`], but does not disturb recency order.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.inner.lock().map.get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().map.contains_key(key)
    }

    /// Inserts `key`/`value`, evicting the least-recently-used entry if the
    /// cache is at capacity and `key` is new.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        self.inner.lock().put(key, value)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().remove(key)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.order.clear();
        inner.map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_put_get() {
        let c = LruCache::new(2);
        c.put(1, "a");
        c.put(2, "b");
        assert_eq!(c.get(&1), Some("a"));
        assert_eq!(c.get(&2), Some("b"));
    }

    #[test]
    fn eviction_drops_least_recently_used() {
        let c = LruCache::new(2);
        c.put(1, "a");
        c.put(2, "b");
        c.get(&1); // 1 is now most recent, 2 is least recent
        c.put(3, "c"); // evicts 2
        assert!(c.contains(&1));
        assert!(!c.contains(&2));
        assert!(c.contains(&3));
    }

    #[test]
    fn reinsert_does_not_grow_past_capacity() {
        let c = LruCache::new(2);
        c.put(1, "a");
        c.put(1, "b");
        assert_eq!(c.len(), 1);
        assert_eq!(c.peek(&1), Some("b"));
    }

    #[test]
    fn remove_drops_entry() {
        let c = LruCache::new(2);
        c.put(1, "a");
        c.remove(&1);
        assert!(!c.contains(&1));
        assert_eq!(c.len(), 0);
    }
}
