//! Concurrent resolver storage
//!
//! Uses DashMap for lock-free concurrent access.

use crate::{DependencyKey, Resolver};
use ahash::RandomState;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

/// Thread-safe map from dependency key to resolver
///
/// Resolvers are handed out as `Arc` so that no shard lock is held while a
/// resolver runs; a resolver may therefore resolve or register further
/// dependencies on the same storage.
pub(crate) struct ResolverStorage {
    resolvers: DashMap<DependencyKey, Arc<Resolver>, RandomState>,
}

impl ResolverStorage {
    /// Create new empty storage with optimized shard count.
    ///
    /// Uses 8 shards; typical containers hold a few dozen keys and the
    /// default of `num_cpus * 4` shards only slows down `copy()`.
    #[inline]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create with pre-allocated capacity and optimized shards.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        let shard_amount = if capacity <= 16 {
            8
        } else if capacity <= 64 {
            16
        } else {
            32
        };
        Self {
            resolvers: DashMap::with_capacity_and_hasher_and_shard_amount(
                capacity,
                RandomState::new(),
                shard_amount,
            ),
        }
    }

    /// Insert a resolver, returning the one it replaced
    #[inline]
    pub fn insert(&self, key: DependencyKey, resolver: Resolver) -> Option<Arc<Resolver>> {
        self.resolvers.insert(key, Arc::new(resolver))
    }

    /// Update or create the resolver for `key` under the entry lock.
    ///
    /// `update` sees the current resolver, if any, and returns a resolver to
    /// install, or `None` when it modified the existing one in place.
    pub fn upsert<F>(&self, key: DependencyKey, update: F)
    where
        F: FnOnce(Option<&Resolver>) -> Option<Resolver>,
    {
        match self.resolvers.entry(key) {
            Entry::Occupied(mut entry) => {
                if let Some(resolver) = update(Some(&**entry.get())) {
                    entry.insert(Arc::new(resolver));
                }
            }
            Entry::Vacant(entry) => {
                if let Some(resolver) = update(None) {
                    entry.insert(Arc::new(resolver));
                }
            }
        }
    }

    /// Get the resolver for a key
    #[inline]
    pub fn get(&self, key: &DependencyKey) -> Option<Arc<Resolver>> {
        self.resolvers.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Check if key exists
    #[inline]
    pub fn contains(&self, key: &DependencyKey) -> bool {
        self.resolvers.contains_key(key)
    }

    /// Remove a resolver
    #[inline]
    pub fn remove(&self, key: &DependencyKey) -> bool {
        self.resolvers.remove(key).is_some()
    }

    /// Get number of registered resolvers
    #[inline]
    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Get all registered keys
    pub fn keys(&self) -> Vec<DependencyKey> {
        self.resolvers.iter().map(|r| r.key().clone()).collect()
    }

    /// Independent copy: every resolver is cloned, so later mutation of
    /// either storage (or of a resolver's internal state) is not shared.
    pub fn snapshot(&self) -> Self {
        let copy = Self::with_capacity(self.len());
        for entry in self.resolvers.iter() {
            copy.resolvers
                .insert(entry.key().clone(), Arc::new(Resolver::clone(entry.value())));
        }
        copy
    }
}

impl Default for ResolverStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResolverStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverStorage")
            .field("count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> DependencyKey {
        DependencyKey::name(name)
    }

    #[test]
    fn test_storage_insert_and_get() {
        let storage = ResolverStorage::new();
        assert!(storage.insert(key("a"), Resolver::singleton(1u32)).is_none());
        assert!(storage.insert(key("a"), Resolver::singleton(2u32)).is_some());

        assert_eq!(storage.len(), 1);
        assert_eq!(storage.get(&key("a")).unwrap().kind(), "singleton");
    }

    #[test]
    fn test_storage_remove() {
        let storage = ResolverStorage::new();
        storage.insert(key("a"), Resolver::Container);
        assert!(storage.contains(&key("a")));

        assert!(storage.remove(&key("a")));
        assert!(!storage.contains(&key("a")));
        assert!(storage.is_empty());
    }

    #[test]
    fn test_snapshot_independent() {
        let storage = ResolverStorage::new();
        storage.insert(key("a"), Resolver::singleton(1u32));

        let copy = storage.snapshot();
        copy.insert(key("b"), Resolver::singleton(2u32));
        storage.remove(&key("a"));

        assert!(copy.contains(&key("a")));
        assert!(!storage.contains(&key("b")));
    }

    #[test]
    fn test_upsert_in_place_and_replace() {
        let storage = ResolverStorage::new();
        storage.upsert(key("a"), |existing| {
            assert!(existing.is_none());
            Some(Resolver::singleton(1u32))
        });

        let before = storage.get(&key("a")).unwrap();
        storage.upsert(key("a"), |existing| {
            assert_eq!(existing.map(Resolver::kind), Some("singleton"));
            None
        });
        assert!(Arc::ptr_eq(&before, &storage.get(&key("a")).unwrap()));

        storage.upsert(key("a"), |_| Some(Resolver::Container));
        assert_eq!(storage.get(&key("a")).unwrap().kind(), "container");
    }

    #[test]
    fn test_snapshot_copies_singleton_values() {
        let storage = ResolverStorage::new();
        storage.insert(key("a"), Resolver::singleton(1u32));
        let copy = storage.snapshot();

        if let Resolver::Singleton(values) = &*storage.get(&key("a")).unwrap() {
            values.add_value(2u32, Some(crate::Param::from("extra")));
        }

        let copied = copy.get(&key("a")).unwrap();
        let Resolver::Singleton(copied) = &*copied else {
            panic!("expected singleton");
        };
        assert_eq!(copied.len(), 1);
    }
}
