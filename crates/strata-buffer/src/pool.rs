//! Memory-budgeted batch cache.

use crate::frame::{BatchFrame, FrameState};
use crate::replacer::{LruReplacer, Replacer};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use strata_common::config::DEFAULT_CACHE_MEMORY_BYTES;
use strata_common::value::estimate_batch_size;
use strata_common::{BatchId, ManagerId, StorageConfig, TupleBatch};
use sysinfo::System;
use tracing::debug;

/// Smallest budget `auto_sized` will choose (16 MB).
const MIN_AUTO_MEMORY_BYTES: usize = 16 * 1024 * 1024;

/// A dirty batch that was moved to limbo to make room in the cache.
/// Caller must persist it and then call `complete_eviction`.
#[derive(Debug)]
pub struct EvictedBatch {
    pub batch_id: BatchId,
    pub owner: ManagerId,
    pub level: usize,
    pub data: Arc<TupleBatch>,
    pub version: u64,
}

/// Configuration for the batch cache.
#[derive(Debug, Clone)]
pub struct BatchCacheConfig {
    /// Memory budget for resident batches in bytes.
    pub memory_bytes: usize,
}

impl Default for BatchCacheConfig {
    fn default() -> Self {
        Self {
            memory_bytes: DEFAULT_CACHE_MEMORY_BYTES,
        }
    }
}

impl BatchCacheConfig {
    pub fn from_storage(config: &StorageConfig) -> Self {
        Self {
            memory_bytes: config.cache_memory_bytes,
        }
    }

    /// Creates a configuration sized to 25% of available system RAM.
    ///
    /// Minimum 16 MB so that small hosts still keep a useful working set.
    pub fn auto_sized() -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let memory_bytes = (available_bytes / 4).max(MIN_AUTO_MEMORY_BYTES);
        Self { memory_bytes }
    }
}

/// Batch cache.
///
/// Holds the tuple batches of every batch manager sharing one memory budget:
/// - Access-recency replacement over resident frames
/// - Dirty tracking with per-modification versions
/// - A limbo state for frames whose write-back is in flight
///
/// The cache never performs I/O. Dirty victims are returned from `put` as
/// [`EvictedBatch`] values; clean victims are dropped since their stored
/// copy is current.
pub struct BatchCache {
    config: BatchCacheConfig,
    inner: Mutex<CacheInner>,
    replacer: LruReplacer<BatchId>,
}

struct CacheInner {
    frames: HashMap<BatchId, BatchFrame>,
    /// Bytes held by resident frames.
    resident_bytes: usize,
    /// Next modification version.
    next_version: u64,
}

impl BatchCache {
    pub fn new(config: BatchCacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CacheInner {
                frames: HashMap::new(),
                resident_bytes: 0,
                next_version: 1,
            }),
            replacer: LruReplacer::new(),
        }
    }

    /// Creates a cache sized to 25% of available system RAM.
    pub fn auto_sized() -> Self {
        Self::new(BatchCacheConfig::auto_sized())
    }

    pub fn memory_budget(&self) -> usize {
        self.config.memory_bytes
    }

    /// Returns the bytes held by resident frames.
    pub fn resident_bytes(&self) -> usize {
        self.inner.lock().resident_bytes
    }

    /// Returns the number of frames, resident or in limbo.
    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, batch_id: BatchId) -> bool {
        self.inner.lock().frames.contains_key(&batch_id)
    }

    /// Returns the number of frames waiting for their write-back.
    pub fn limbo_count(&self) -> usize {
        self.inner
            .lock()
            .frames
            .values()
            .filter(|f| f.state() == FrameState::Limbo)
            .count()
    }

    /// Fetches a batch.
    ///
    /// A frame in limbo is re-admitted as resident without I/O.
    /// Returns None if the batch is not cached.
    pub fn get(&self, batch_id: BatchId) -> Option<Arc<TupleBatch>> {
        let mut inner = self.inner.lock();
        let frame = inner.frames.get_mut(&batch_id)?;
        let data = frame.data();
        if frame.state() == FrameState::Limbo {
            frame.set_state(FrameState::Resident);
            let size = frame.size();
            inner.resident_bytes += size;
            self.replacer.record_access(batch_id);
            self.replacer.set_evictable(batch_id, true);
        } else {
            self.replacer.record_access(batch_id);
        }
        Some(data)
    }

    /// Stores modified batch contents under a fresh version.
    ///
    /// Returns any dirty batches evicted to make room. Caller must persist them.
    pub fn put(
        &self,
        batch_id: BatchId,
        owner: ManagerId,
        level: usize,
        data: Arc<TupleBatch>,
    ) -> Vec<EvictedBatch> {
        let mut inner = self.inner.lock();
        let version = inner.next_version;
        inner.next_version += 1;
        self.admit(&mut inner, batch_id, owner, level, data, true, version);
        self.evict_over_budget(&mut inner, batch_id)
    }

    /// Stores batch contents that were just read back from storage.
    ///
    /// The frame is clean and keeps the version it was written under.
    pub fn put_clean(
        &self,
        batch_id: BatchId,
        owner: ManagerId,
        level: usize,
        data: Arc<TupleBatch>,
        version: u64,
    ) -> Vec<EvictedBatch> {
        let mut inner = self.inner.lock();
        self.admit(&mut inner, batch_id, owner, level, data, false, version);
        self.evict_over_budget(&mut inner, batch_id)
    }

    #[allow(clippy::too_many_arguments)]
    fn admit(
        &self,
        inner: &mut CacheInner,
        batch_id: BatchId,
        owner: ManagerId,
        level: usize,
        data: Arc<TupleBatch>,
        dirty: bool,
        version: u64,
    ) {
        let size = estimate_batch_size(&data);
        match inner.frames.get_mut(&batch_id) {
            Some(frame) => {
                let old_size = if frame.is_resident() { frame.size() } else { 0 };
                frame.replace(data, size, version);
                frame.set_dirty(dirty);
                frame.set_state(FrameState::Resident);
                inner.resident_bytes = inner.resident_bytes - old_size + size;
            }
            None => {
                let frame = BatchFrame::new(batch_id, owner, level, data, size, dirty, version);
                inner.frames.insert(batch_id, frame);
                inner.resident_bytes += size;
            }
        }
        self.replacer.record_access(batch_id);
        self.replacer.set_evictable(batch_id, true);
    }

    /// Evicts least-recently-used frames until resident bytes fit the budget.
    ///
    /// The frame just admitted is kept even when it alone exceeds the budget.
    fn evict_over_budget(&self, inner: &mut CacheInner, keep: BatchId) -> Vec<EvictedBatch> {
        let mut evicted = Vec::new();
        if inner.resident_bytes <= self.config.memory_bytes {
            return evicted;
        }

        self.replacer.set_evictable(keep, false);
        while inner.resident_bytes > self.config.memory_bytes {
            let Some(victim_id) = self.replacer.evict() else {
                break;
            };
            let Some(frame) = inner.frames.get_mut(&victim_id) else {
                continue;
            };
            inner.resident_bytes -= frame.size();

            if frame.is_dirty() {
                frame.set_state(FrameState::Limbo);
                evicted.push(EvictedBatch {
                    batch_id: victim_id,
                    owner: frame.owner(),
                    level: frame.level(),
                    data: frame.data(),
                    version: frame.version(),
                });
            } else {
                inner.frames.remove(&victim_id);
            }
        }
        self.replacer.set_evictable(keep, true);

        if !evicted.is_empty() {
            debug!(
                count = evicted.len(),
                resident_bytes = inner.resident_bytes,
                budget = self.config.memory_bytes,
                "moved dirty batches to limbo"
            );
        }
        evicted
    }

    /// Finishes the write-back of an evicted batch.
    ///
    /// If the frame still carries `version`, a limbo frame is dropped and a
    /// re-admitted frame is marked clean. A newer version is left untouched.
    /// Returns true if the frame was dropped.
    pub fn complete_eviction(&self, batch_id: BatchId, version: u64) -> bool {
        let mut inner = self.inner.lock();
        let Some(frame) = inner.frames.get_mut(&batch_id) else {
            return false;
        };
        if frame.version() != version {
            return false;
        }
        match frame.state() {
            FrameState::Limbo => {
                inner.frames.remove(&batch_id);
                true
            }
            FrameState::Resident => {
                frame.set_dirty(false);
                false
            }
        }
    }

    /// Removes a batch from the cache.
    ///
    /// Returns true if the batch was cached.
    pub fn remove(&self, batch_id: BatchId) -> bool {
        let mut inner = self.inner.lock();
        Self::remove_locked(&mut inner, &self.replacer, batch_id)
    }

    fn remove_locked(
        inner: &mut CacheInner,
        replacer: &LruReplacer<BatchId>,
        batch_id: BatchId,
    ) -> bool {
        match inner.frames.remove(&batch_id) {
            Some(frame) => {
                if frame.is_resident() {
                    inner.resident_bytes -= frame.size();
                }
                replacer.remove(batch_id);
                true
            }
            None => false,
        }
    }

    /// Removes every batch belonging to one manager.
    ///
    /// Returns the number of batches removed.
    pub fn remove_owner(&self, owner: ManagerId) -> usize {
        let mut inner = self.inner.lock();
        let ids: Vec<BatchId> = inner
            .frames
            .values()
            .filter(|f| f.owner() == owner)
            .map(BatchFrame::batch_id)
            .collect();
        for &batch_id in &ids {
            Self::remove_locked(&mut inner, &self.replacer, batch_id);
        }
        ids.len()
    }

    /// Returns statistics about the cache.
    pub fn stats(&self) -> BatchCacheStats {
        let inner = self.inner.lock();
        let mut limbo_frames = 0;
        let mut dirty_frames = 0;
        for frame in inner.frames.values() {
            if frame.state() == FrameState::Limbo {
                limbo_frames += 1;
            }
            if frame.is_dirty() {
                dirty_frames += 1;
            }
        }
        BatchCacheStats {
            memory_budget: self.config.memory_bytes,
            resident_bytes: inner.resident_bytes,
            cached_frames: inner.frames.len(),
            limbo_frames,
            dirty_frames,
        }
    }
}

/// Statistics about the batch cache.
#[derive(Debug, Clone)]
pub struct BatchCacheStats {
    /// Configured memory budget in bytes.
    pub memory_budget: usize,
    /// Bytes held by resident frames.
    pub resident_bytes: usize,
    /// Number of frames, resident or in limbo.
    pub cached_frames: usize,
    /// Number of frames waiting for write-back.
    pub limbo_frames: usize,
    /// Number of frames not yet persisted.
    pub dirty_frames: usize,
}
