//! Batch managers.
//!
//! A [`BatchManager`] persists and retrieves the tuple batches backing tree
//! pages. [`SpillBatchManager`] keeps batches in the shared [`BatchCache`]
//! and writes evicted batches to its own [`FileStore`];
//! [`MemoryBatchManager`] keeps everything in memory.

use crate::codec::{checked_u32, decode_batch, encode_batch};
use crate::disk::{FileStorageConfig, FileStorageManager};
use crate::segment::FileStore;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use strata_buffer::{BatchCache, BatchCacheConfig, EvictedBatch};
use strata_common::{BatchId, ManagerId, Result, StorageConfig, StrataError, TupleBatch};
use tracing::{debug, trace};

/// Persists and retrieves tuple batches by opaque identifier.
pub trait BatchManager: Send + Sync {
    /// Allocates a new, empty batch for a page at the given tree level.
    fn create_batch(&self, level: usize) -> Result<BatchId>;

    /// Retrieves a batch, reading it back from storage if it was evicted.
    fn get_batch(&self, batch_id: BatchId) -> Result<Arc<TupleBatch>>;

    /// Stores new contents for a batch.
    fn set_batch(&self, batch_id: BatchId, batch: TupleBatch) -> Result<()>;

    /// Releases a batch permanently.
    fn remove_batch(&self, batch_id: BatchId) -> Result<()>;

    /// Releases every resource held by this manager.
    fn remove(&self) -> Result<()>;

    /// Returns the number of live batches.
    fn batch_count(&self) -> usize;
}

// =============================================================================
// BufferManager
// =============================================================================

/// Where the latest written copy of a batch lives in its owner's store.
#[derive(Debug, Clone, Copy)]
struct Location {
    offset: u64,
    length: u32,
    version: u64,
}

#[derive(Debug)]
struct BatchEntry {
    level: usize,
    location: Option<Location>,
}

/// Per-manager state shared with the buffer manager for write-back.
struct OwnerState {
    name: String,
    store: Arc<FileStore>,
    entries: Mutex<HashMap<BatchId, BatchEntry>>,
    removed: AtomicBool,
}

impl OwnerState {
    fn check_live(&self, id: ManagerId) -> Result<()> {
        if self.removed.load(Ordering::Acquire) {
            return Err(StrataError::ManagerRemoved(id));
        }
        Ok(())
    }
}

/// Shared memory and file resources for every spilling batch manager.
///
/// One buffer manager serves many trees. It owns the batch cache, the file
/// storage manager, and the batch ID allocator, and routes every evicted
/// batch to the store of the manager that created it.
pub struct BufferManager {
    cache: BatchCache,
    storage: FileStorageManager,
    next_batch: AtomicU64,
    next_manager: AtomicU32,
    owners: RwLock<HashMap<ManagerId, Arc<OwnerState>>>,
}

impl BufferManager {
    pub fn new(cache_config: BatchCacheConfig, storage_config: FileStorageConfig) -> Result<Self> {
        Ok(Self {
            cache: BatchCache::new(cache_config),
            storage: FileStorageManager::new(storage_config)?,
            next_batch: AtomicU64::new(1),
            next_manager: AtomicU32::new(1),
            owners: RwLock::new(HashMap::new()),
        })
    }

    /// Creates a buffer manager from the shared storage configuration.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        Self::new(
            BatchCacheConfig::from_storage(config),
            FileStorageConfig::from(config),
        )
    }

    pub fn cache(&self) -> &BatchCache {
        &self.cache
    }

    pub fn storage(&self) -> &FileStorageManager {
        &self.storage
    }

    /// Returns the number of registered batch managers.
    pub fn manager_count(&self) -> usize {
        self.owners.read().len()
    }

    /// Creates a spilling batch manager whose evicted batches go to a store
    /// named after `name`.
    pub fn create_manager(self: &Arc<Self>, name: &str) -> SpillBatchManager {
        let id = self.next_manager.fetch_add(1, Ordering::Relaxed);
        let store_name = format!("{}{}", name, id);
        let state = Arc::new(OwnerState {
            store: self.storage.create_store(&store_name),
            name: store_name,
            entries: Mutex::new(HashMap::new()),
            removed: AtomicBool::new(false),
        });
        self.owners.write().insert(id, Arc::clone(&state));
        debug!(manager = id, store = %state.name, "created spill batch manager");

        SpillBatchManager {
            id,
            buffer: Arc::clone(self),
            state,
        }
    }

    fn allocate_batch_id(&self) -> BatchId {
        BatchId(self.next_batch.fetch_add(1, Ordering::Relaxed))
    }

    /// Persists batches evicted from the cache to their owners' stores.
    fn write_back(&self, evicted: Vec<EvictedBatch>) -> Result<()> {
        for batch in evicted {
            let owner = self.owners.read().get(&batch.owner).cloned();
            let Some(owner) = owner.filter(|o| !o.removed.load(Ordering::Acquire)) else {
                self.cache.complete_eviction(batch.batch_id, batch.version);
                continue;
            };

            let bytes = encode_batch(&batch.data)?;
            let length = checked_u32("batch_length", bytes.len())?;
            let offset = owner.store.append(&bytes)?;
            let location = Location {
                offset,
                length,
                version: batch.version,
            };

            {
                let mut entries = owner.entries.lock();
                if let Some(entry) = entries.get_mut(&batch.batch_id) {
                    let newer = entry
                        .location
                        .map_or(true, |current| current.version < location.version);
                    if newer {
                        entry.location = Some(location);
                    }
                }
            }
            self.cache.complete_eviction(batch.batch_id, batch.version);
            trace!(
                batch = %batch.batch_id,
                level = batch.level,
                store = %owner.name,
                offset,
                length = location.length,
                "wrote back evicted batch"
            );
        }
        Ok(())
    }
}

// =============================================================================
// SpillBatchManager
// =============================================================================

/// Batch manager that spills to segment files under memory pressure.
///
/// The backing store is append-only: a rewritten or removed batch leaves its
/// old bytes in place until [`BatchManager::remove`] deletes the store, so a
/// long-lived tree under heavy churn grows its spill files accordingly.
pub struct SpillBatchManager {
    id: ManagerId,
    buffer: Arc<BufferManager>,
    state: Arc<OwnerState>,
}

impl SpillBatchManager {
    pub fn id(&self) -> ManagerId {
        self.id
    }

    /// Returns the name of the backing store.
    pub fn store_name(&self) -> &str {
        &self.state.name
    }

    /// Returns the bytes written to the backing store.
    pub fn spilled_bytes(&self) -> u64 {
        self.state.store.length()
    }

    fn entry_level(&self, batch_id: BatchId) -> Result<usize> {
        self.state
            .entries
            .lock()
            .get(&batch_id)
            .map(|entry| entry.level)
            .ok_or(StrataError::BatchNotFound {
                batch_id: batch_id.as_u64(),
            })
    }
}

impl BatchManager for SpillBatchManager {
    fn create_batch(&self, level: usize) -> Result<BatchId> {
        self.state.check_live(self.id)?;
        let batch_id = self.buffer.allocate_batch_id();
        self.state.entries.lock().insert(
            batch_id,
            BatchEntry {
                level,
                location: None,
            },
        );
        Ok(batch_id)
    }

    fn get_batch(&self, batch_id: BatchId) -> Result<Arc<TupleBatch>> {
        self.state.check_live(self.id)?;
        if let Some(data) = self.buffer.cache.get(batch_id) {
            return Ok(data);
        }

        let (level, location) = {
            let entries = self.state.entries.lock();
            let entry = entries.get(&batch_id).ok_or(StrataError::BatchNotFound {
                batch_id: batch_id.as_u64(),
            })?;
            (entry.level, entry.location)
        };
        let Some(location) = location else {
            return Ok(Arc::new(Vec::new()));
        };

        let bytes = self
            .state
            .store
            .read_vec(location.offset, location.length as usize)?;
        let data = Arc::new(decode_batch(batch_id, &bytes)?);
        let evicted = self.buffer.cache.put_clean(
            batch_id,
            self.id,
            level,
            Arc::clone(&data),
            location.version,
        );
        self.buffer.write_back(evicted)?;
        Ok(data)
    }

    fn set_batch(&self, batch_id: BatchId, batch: TupleBatch) -> Result<()> {
        self.state.check_live(self.id)?;
        let level = self.entry_level(batch_id)?;
        let evicted = self
            .buffer
            .cache
            .put(batch_id, self.id, level, Arc::new(batch));
        self.buffer.write_back(evicted)
    }

    fn remove_batch(&self, batch_id: BatchId) -> Result<()> {
        self.state.check_live(self.id)?;
        self.state.entries.lock().remove(&batch_id);
        self.buffer.cache.remove(batch_id);
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        if self.state.removed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let cached = self.buffer.cache.remove_owner(self.id);
        self.buffer.owners.write().remove(&self.id);
        let batches = {
            let mut entries = self.state.entries.lock();
            let count = entries.len();
            entries.clear();
            count
        };
        self.state.store.remove()?;
        debug!(
            manager = self.id,
            store = %self.state.name,
            batches,
            cached,
            "removed spill batch manager"
        );
        Ok(())
    }

    fn batch_count(&self) -> usize {
        self.state.entries.lock().len()
    }
}

// =============================================================================
// MemoryBatchManager
// =============================================================================

/// Batch manager that keeps every batch in memory.
pub struct MemoryBatchManager {
    batches: Mutex<HashMap<BatchId, Arc<TupleBatch>>>,
    next_batch: AtomicU64,
    removed: AtomicBool,
}

impl MemoryBatchManager {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(HashMap::new()),
            next_batch: AtomicU64::new(1),
            removed: AtomicBool::new(false),
        }
    }

    fn check_live(&self) -> Result<()> {
        if self.removed.load(Ordering::Acquire) {
            return Err(StrataError::ManagerRemoved(0));
        }
        Ok(())
    }
}

impl Default for MemoryBatchManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchManager for MemoryBatchManager {
    fn create_batch(&self, _level: usize) -> Result<BatchId> {
        self.check_live()?;
        let batch_id = BatchId(self.next_batch.fetch_add(1, Ordering::Relaxed));
        self.batches.lock().insert(batch_id, Arc::new(Vec::new()));
        Ok(batch_id)
    }

    fn get_batch(&self, batch_id: BatchId) -> Result<Arc<TupleBatch>> {
        self.check_live()?;
        self.batches
            .lock()
            .get(&batch_id)
            .cloned()
            .ok_or(StrataError::BatchNotFound {
                batch_id: batch_id.as_u64(),
            })
    }

    fn set_batch(&self, batch_id: BatchId, batch: TupleBatch) -> Result<()> {
        self.check_live()?;
        match self.batches.lock().get_mut(&batch_id) {
            Some(slot) => {
                *slot = Arc::new(batch);
                Ok(())
            }
            None => Err(StrataError::BatchNotFound {
                batch_id: batch_id.as_u64(),
            }),
        }
    }

    fn remove_batch(&self, batch_id: BatchId) -> Result<()> {
        self.check_live()?;
        self.batches.lock().remove(&batch_id);
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        self.removed.store(true, Ordering::Release);
        self.batches.lock().clear();
        Ok(())
    }

    fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }
}
