//! LRU cache for parsed objects.

use std::num::NonZeroUsize;

use gitport_hash::Oid;
use lru::LruCache;

use crate::Object;

/// LRU cache over parsed objects, keyed by OID.
pub struct ObjectCache {
    cache: LruCache<Oid, Object>,
}

impl ObjectCache {
    /// Create with the given capacity (number of objects).
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap()),
            ),
        }
    }

    /// Get a cached object, promoting it to most-recently-used.
    pub fn get(&mut self, oid: &Oid) -> Option<&Object> {
        self.cache.get(oid)
    }

    pub fn insert(&mut self, oid: Oid, obj: Object) {
        self.cache.push(oid, obj);
    }

    pub fn contains(&self, oid: &Oid) -> bool {
        self.cache.contains(oid)
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Blob;

    fn entry(n: u8) -> (Oid, Object) {
        let mut bytes = [0u8; 20];
        bytes[0] = n;
        (
            Oid::from_bytes(&bytes).unwrap(),
            Object::Blob(Blob::new(vec![n])),
        )
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = ObjectCache::new(2);
        let (a, obj_a) = entry(1);
        let (b, obj_b) = entry(2);
        let (c, obj_c) = entry(3);

        cache.insert(a, obj_a);
        cache.insert(b, obj_b);
        cache.get(&a); // promote a
        cache.insert(c, obj_c); // evicts b

        assert!(cache.contains(&a));
        assert!(!cache.contains(&b));
        assert!(cache.contains(&c));
    }

    #[test]
    fn zero_capacity_clamps_to_one() {
        let mut cache = ObjectCache::new(0);
        let (a, obj_a) = entry(1);
        cache.insert(a, obj_a);
        assert_eq!(cache.len(), 1);
    }
}
