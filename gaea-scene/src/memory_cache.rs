use std::collections::HashMap;
use std::hash::Hash;

struct CacheEntry<V> {
    value: V,
    size: usize,
    last_used: u64,
}

/// A least-recently-used cache with a byte capacity. When an insertion
/// pushes usage past the capacity, entries are evicted oldest first until
/// usage falls to the low-water mark.
pub struct MemoryCache<K, V> {
    capacity: usize,
    low_water: usize,
    used_capacity: usize,
    clock: u64,
    entries: HashMap<K, CacheEntry<V>>,
}

impl<K: Eq + Hash + Clone, V> MemoryCache<K, V> {
    pub fn new(capacity: usize, low_water: usize) -> Self {
        Self {
            capacity,
            low_water: low_water.min(capacity),
            used_capacity: 0,
            clock: 0,
            entries: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        return self.capacity;
    }

    pub fn used_capacity(&self) -> usize {
        return self.used_capacity;
    }

    pub fn len(&self) -> usize {
        return self.entries.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.entries.is_empty();
    }

    pub fn contains_key(&self, key: &K) -> bool {
        return self.entries.contains_key(key);
    }

    /// Looks up an entry and marks it most recently used.
    pub fn entry_for_key(&mut self, key: &K) -> Option<&V> {
        self.clock += 1;
        let clock = self.clock;
        let entry = self.entries.get_mut(key)?;
        entry.last_used = clock;
        return Some(&entry.value);
    }

    /// Inserts an entry, replacing any previous entry under the same key.
    /// Returns the entries evicted to make room, oldest first.
    pub fn put_entry(&mut self, key: K, value: V, size: usize) -> Vec<(K, V)> {
        self.clock += 1;
        if let Some(old) = self.entries.insert(
            key,
            CacheEntry {
                value,
                size,
                last_used: self.clock,
            },
        ) {
            self.used_capacity -= old.size;
        }
        self.used_capacity += size;

        let mut evicted = Vec::new();
        if self.used_capacity > self.capacity {
            let mut by_age: Vec<(K, u64)> = self
                .entries
                .iter()
                .map(|(k, e)| (k.clone(), e.last_used))
                .collect();
            by_age.sort_by_key(|(_, last_used)| *last_used);

            for (key, _) in by_age {
                if self.used_capacity <= self.low_water {
                    break;
                }
                if let Some(entry) = self.entries.remove(&key) {
                    self.used_capacity -= entry.size;
                    evicted.push((key, entry.value));
                }
            }
        }
        return evicted;
    }

    pub fn remove_entry(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.used_capacity -= entry.size;
        return Some(entry.value);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.used_capacity = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used_down_to_low_water() {
        let mut cache: MemoryCache<u32, &str> = MemoryCache::new(10, 6);
        assert!(cache.put_entry(1, "a", 4).is_empty());
        assert!(cache.put_entry(2, "b", 4).is_empty());

        // Touch 1 so 2 becomes the oldest.
        assert_eq!(cache.entry_for_key(&1), Some(&"a"));

        let evicted = cache.put_entry(3, "c", 4);
        assert_eq!(evicted, vec![(2, "b")]);
        assert!(cache.contains_key(&1));
        assert!(cache.contains_key(&3));
        assert!(cache.used_capacity() <= 6);
    }

    #[test]
    fn replacing_an_entry_adjusts_usage() {
        let mut cache: MemoryCache<u32, &str> = MemoryCache::new(10, 10);
        cache.put_entry(1, "a", 4);
        cache.put_entry(1, "b", 6);
        assert_eq!(cache.used_capacity(), 6);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.entry_for_key(&1), Some(&"b"));
    }

    #[test]
    fn remove_and_clear() {
        let mut cache: MemoryCache<u32, &str> = MemoryCache::new(10, 10);
        cache.put_entry(1, "a", 4);
        assert_eq!(cache.remove_entry(&1), Some("a"));
        assert_eq!(cache.used_capacity(), 0);

        cache.put_entry(2, "b", 4);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.used_capacity(), 0);
    }
}
