//! Replacement policies for the batch cache.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Trait for cache replacement algorithms.
pub trait Replacer<K>: Send + Sync {
    /// Records that the given key was accessed.
    fn record_access(&self, key: K);

    /// Marks a key as evictable or not.
    fn set_evictable(&self, key: K, evictable: bool);

    /// Selects a victim for eviction.
    ///
    /// Returns None if no keys are evictable.
    fn evict(&self) -> Option<K>;

    /// Removes a key from the replacer.
    fn remove(&self, key: K);

    /// Returns the number of evictable keys.
    fn size(&self) -> usize;
}

/// Least-recently-used replacement.
///
/// Every access stamps the key with a monotonically increasing tick.
/// Evictable keys are kept in a tick-ordered map so the victim is always
/// the evictable key with the oldest stamp.
pub struct LruReplacer<K> {
    inner: Mutex<LruInner<K>>,
}

struct LruInner<K> {
    /// Next access tick.
    tick: u64,
    /// Last access tick and evictability of every tracked key.
    entries: HashMap<K, LruEntry>,
    /// Evictable keys ordered by last access.
    order: BTreeMap<u64, K>,
}

#[derive(Clone, Copy)]
struct LruEntry {
    tick: u64,
    evictable: bool,
}

impl<K: Copy + Eq + Hash> LruReplacer<K> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LruInner {
                tick: 0,
                entries: HashMap::new(),
                order: BTreeMap::new(),
            }),
        }
    }

    /// Returns the number of tracked keys, evictable or not.
    pub fn tracked(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

impl<K: Copy + Eq + Hash> Default for LruReplacer<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + Eq + Hash + Send> Replacer<K> for LruReplacer<K> {
    fn record_access(&self, key: K) {
        let mut inner = self.inner.lock();
        let tick = inner.tick;
        inner.tick += 1;

        let previous = inner.entries.insert(
            key,
            LruEntry {
                tick,
                evictable: false,
            },
        );
        if let Some(previous) = previous {
            if previous.evictable {
                inner.order.remove(&previous.tick);
                inner.order.insert(tick, key);
            }
            if let Some(entry) = inner.entries.get_mut(&key) {
                entry.evictable = previous.evictable;
            }
        }
    }

    fn set_evictable(&self, key: K, evictable: bool) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.get(&key).copied() else {
            return;
        };
        if entry.evictable == evictable {
            return;
        }

        if evictable {
            inner.order.insert(entry.tick, key);
        } else {
            inner.order.remove(&entry.tick);
        }
        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.evictable = evictable;
        }
    }

    fn evict(&self) -> Option<K> {
        let mut inner = self.inner.lock();
        let (_, key) = inner.order.pop_first()?;
        inner.entries.remove(&key);
        Some(key)
    }

    fn remove(&self, key: K) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.remove(&key) {
            if entry.evictable {
                inner.order.remove(&entry.tick);
            }
        }
    }

    fn size(&self) -> usize {
        self.inner.lock().order.len()
    }
}
