//! Per-connection, per-collection LRU cache of deserialized values.
//!
//! A cached entry is keyed by row key and carries the row version it was
//! deserialized from. Lookups hit only on an exact version match, so an
//! entry that outlived its row is a miss, never a wrong answer. Sibling
//! connections additionally receive invalidation messages after each commit
//! (see the connection mailbox), which evict known-dead entries promptly.

use std::any::Any;
use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::collection::Collection;
use crate::types::RowVersion;

struct CacheEntry<V> {
    row_version: RowVersion,
    value: V,
}

/// LRU of deserialized values for one collection on one connection.
pub(crate) struct ValueCache<V> {
    entries: LruCache<String, CacheEntry<V>>,
}

impl<V: Clone> ValueCache<V> {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Return the cached value only if it was deserialized from exactly
    /// `row_version`.
    pub fn get(&mut self, key: &str, row_version: RowVersion) -> Option<V> {
        let stale = match self.entries.get(key) {
            Some(entry) if entry.row_version == row_version => {
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if stale {
            // Evict rather than let the dead entry linger at the front of
            // the LRU.
            self.entries.pop(key);
        }
        None
    }

    pub fn put(&mut self, key: &str, row_version: RowVersion, value: V) {
        self.entries
            .put(key.to_string(), CacheEntry { row_version, value });
    }

    pub fn invalidate(&mut self, key: &str) {
        self.entries.pop(key);
    }

    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }
}

/// Type-erased cache operations, used by the coherency mailbox which only
/// knows collection names and keys.
trait AnyValueCache: Send {
    fn invalidate(&mut self, key: &str);
    fn invalidate_all(&mut self);
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<V: Clone + Send + 'static> AnyValueCache for ValueCache<V> {
    fn invalidate(&mut self, key: &str) {
        ValueCache::invalidate(self, key);
    }

    fn invalidate_all(&mut self) {
        ValueCache::invalidate_all(self);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// All value caches owned by one connection, one slot per collection.
#[derive(Default)]
pub(crate) struct CacheSet {
    slots: HashMap<String, Box<dyn AnyValueCache>>,
}

impl CacheSet {
    /// The typed cache for a collection, created lazily. `None` when the
    /// collection disables caching.
    pub fn for_collection<C: Collection>(
        &mut self,
        collection: &C,
    ) -> Option<&mut ValueCache<C::Value>> {
        let capacity = NonZeroUsize::new(collection.value_cache_capacity()?)?;
        let slot = self
            .slots
            .entry(collection.name().to_string())
            .or_insert_with(|| Box::new(ValueCache::<C::Value>::new(capacity)));
        slot.as_any_mut().downcast_mut::<ValueCache<C::Value>>()
    }

    pub fn invalidate(&mut self, collection: &str, key: &str) {
        if let Some(slot) = self.slots.get_mut(collection) {
            slot.invalidate(key);
        }
    }

    pub fn invalidate_all_in(&mut self, collection: &str) {
        if let Some(slot) = self.slots.get_mut(collection) {
            slot.invalidate_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> ValueCache<String> {
        ValueCache::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn test_hit_requires_exact_version() {
        let mut c = cache(4);
        c.put("a", 1, "one".to_string());
        assert_eq!(c.get("a", 1), Some("one".to_string()));
        // A different snapshot version is a miss, and the stale entry is gone.
        assert_eq!(c.get("a", 2), None);
        assert_eq!(c.get("a", 1), None);
    }

    #[test]
    fn test_lru_eviction_on_overflow() {
        let mut c = cache(2);
        c.put("a", 1, "a".to_string());
        c.put("b", 1, "b".to_string());
        // Touch "a" so "b" is the LRU entry.
        assert!(c.get("a", 1).is_some());
        c.put("c", 1, "c".to_string());
        assert_eq!(c.get("b", 1), None);
        assert_eq!(c.get("a", 1), Some("a".to_string()));
        assert_eq!(c.get("c", 1), Some("c".to_string()));
    }

    #[test]
    fn test_invalidate() {
        let mut c = cache(4);
        c.put("a", 1, "a".to_string());
        c.put("b", 1, "b".to_string());
        c.invalidate("a");
        assert_eq!(c.get("a", 1), None);
        assert_eq!(c.get("b", 1), Some("b".to_string()));
        c.invalidate_all();
        assert_eq!(c.get("b", 1), None);
    }
}
