//! Create-on-first-use object caches shared across the contexts of a screen.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, RwLock};

use hashbrown::HashMap;

use crate::state::StateKey;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Counters {
    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn stats(&self, entries: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
        }
    }
}

/// A fixed table of lazily created objects indexed by a small discrete key.
///
/// Populated slots are read without taking any lock; creation is serialized
/// by `create_lock` and re-checks the slot after acquiring it.
#[derive(Debug)]
pub struct SlotCache<V> {
    slots: Vec<OnceLock<V>>,
    create_lock: Mutex<()>,
    counters: Counters,
}

impl<V> SlotCache<V> {
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| OnceLock::new()).collect(),
            create_lock: Mutex::new(()),
            counters: Counters::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<&V> {
        self.slots.get(slot)?.get()
    }

    /// Return the object in `slot`, creating it with `create` on first use.
    ///
    /// A `None` from `create` leaves the slot empty so a later call retries.
    pub fn get_or_create(&self, slot: usize, create: impl FnOnce() -> Option<V>) -> Option<&V> {
        let cell = self.slots.get(slot)?;
        if let Some(v) = cell.get() {
            self.counters.hit();
            return Some(v);
        }

        let _guard = self
            .create_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(v) = cell.get() {
            self.counters.hit();
            return Some(v);
        }
        self.counters.miss();
        let value = create()?;
        // Only creators holding `create_lock` set slots, so this cannot race.
        let _ = cell.set(value);
        cell.get()
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.slots.iter().filter(|s| s.get().is_some()).count();
        self.counters.stats(entries)
    }
}

/// Objects keyed by semantic state value.
///
/// Lookups take a shared lock; creation upgrades to the exclusive lock and
/// checks again before calling the factory.
#[derive(Debug)]
pub struct KeyedCache<K, V> {
    buckets: RwLock<HashMap<u64, Vec<(K, V)>>>,
    counters: Counters,
}

impl<K, V> Default for KeyedCache<K, V> {
    fn default() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            counters: Counters::default(),
        }
    }
}

fn key_hash<K: StateKey>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash_key(&mut hasher);
    hasher.finish()
}

impl<K: StateKey, V: Clone> KeyedCache<K, V> {
    pub fn get(&self, key: &K) -> Option<V> {
        let hash = key_hash(key);
        let buckets = self
            .buckets
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        lookup(&buckets, hash, key)
    }

    pub fn get_or_create(&self, key: &K, create: impl FnOnce() -> Option<V>) -> Option<V> {
        let hash = key_hash(key);
        {
            let buckets = self
                .buckets
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(v) = lookup(&buckets, hash, key) {
                self.counters.hit();
                return Some(v);
            }
        }

        let mut buckets = self
            .buckets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(v) = lookup(&buckets, hash, key) {
            self.counters.hit();
            return Some(v);
        }
        self.counters.miss();
        let value = create()?;
        buckets
            .entry(hash)
            .or_default()
            .push((key.clone(), value.clone()));
        Some(value)
    }

    /// Remove every entry, returning the cached values.
    pub fn drain(&self) -> Vec<V> {
        let mut buckets = self
            .buckets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        buckets
            .drain()
            .flat_map(|(_, bucket)| bucket.into_iter().map(|(_, v)| v))
            .collect()
    }

    pub fn len(&self) -> usize {
        let buckets = self
            .buckets
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.stats(self.len())
    }
}

fn lookup<K: StateKey, V: Clone>(buckets: &HashMap<u64, Vec<(K, V)>>, hash: u64, key: &K) -> Option<V> {
    buckets
        .get(&hash)?
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::BlendState;
    use std::sync::Arc;

    #[test]
    fn slot_cache_creates_once() {
        let cache = SlotCache::new(4);
        let mut calls = 0;
        assert_eq!(
            cache.get_or_create(2, || {
                calls += 1;
                Some(7u32)
            }),
            Some(&7)
        );
        assert_eq!(cache.get_or_create(2, || unreachable!()), Some(&7));
        assert_eq!(calls, 1);
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                entries: 1
            }
        );
    }

    #[test]
    fn slot_cache_failed_creation_retries() {
        let cache: SlotCache<u32> = SlotCache::new(1);
        assert_eq!(cache.get_or_create(0, || None), None);
        assert_eq!(cache.get_or_create(0, || Some(3)), Some(&3));
        assert_eq!(cache.get_or_create(5, || Some(3)), None);
    }

    #[test]
    fn slot_cache_is_shared_across_threads() {
        let cache = Arc::new(SlotCache::new(1));
        let created = Arc::new(AtomicU64::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let created = created.clone();
                std::thread::spawn(move || {
                    *cache
                        .get_or_create(0, || {
                            created.fetch_add(1, Ordering::SeqCst);
                            Some(42u32)
                        })
                        .unwrap()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 42);
        }
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn keyed_cache_hits_on_equal_value() {
        let cache: KeyedCache<BlendState, u32> = KeyedCache::default();
        let a = BlendState::disabled();
        assert_eq!(cache.get_or_create(&a, || Some(1)), Some(1));
        assert_eq!(cache.get_or_create(&a.clone(), || Some(2)), Some(1));
        let mut b = a;
        b.alpha_to_coverage = true;
        assert_eq!(cache.get_or_create(&b, || Some(3)), Some(3));
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 2,
                entries: 2
            }
        );
        let mut drained = cache.drain();
        drained.sort();
        assert_eq!(drained, vec![1, 3]);
        assert!(cache.is_empty());
    }
}
