//! File storage manager and the open file handle cache.

use crate::segment::FileStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use strata_buffer::{LruReplacer, Replacer};
use strata_common::config::{DEFAULT_MAX_OPEN_FILES, DEFAULT_MAX_SEGMENT_SIZE};
use strata_common::{Result, StorageConfig, StrataError};
use tracing::debug;

/// Configuration for the file storage manager.
#[derive(Debug, Clone)]
pub struct FileStorageConfig {
    /// Directory holding segment files.
    pub dir: PathBuf,
    /// Maximum size of one segment file in bytes.
    pub max_segment_size: u64,
    /// Maximum number of simultaneously open segment files.
    pub max_open_files: usize,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for FileStorageConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().join("strata"),
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            fsync_enabled: false,
        }
    }
}

impl From<&StorageConfig> for FileStorageConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            dir: config.spill_dir.clone(),
            max_segment_size: config.max_segment_size,
            max_open_files: config.max_open_files,
            fsync_enabled: config.fsync_enabled,
        }
    }
}

/// Bounded cache of open segment files keyed by segment serial number.
///
/// Evicting a handle drops the cache's reference; the descriptor closes
/// once no in-flight read or write still holds it.
pub(crate) struct HandleCache {
    capacity: usize,
    open: Mutex<HashMap<u64, Arc<File>>>,
    replacer: LruReplacer<u64>,
}

impl HandleCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            open: Mutex::new(HashMap::new()),
            replacer: LruReplacer::new(),
        }
    }

    /// Returns the open handle for a segment, opening it if necessary.
    pub(crate) fn get(&self, segment: u64, path: &Path) -> Result<Arc<File>> {
        let mut open = self.open.lock();
        if let Some(file) = open.get(&segment) {
            let file = Arc::clone(file);
            self.replacer.record_access(segment);
            return Ok(file);
        }

        let file = Arc::new(OpenOptions::new().read(true).write(true).open(path)?);
        self.admit(&mut open, segment, Arc::clone(&file));
        Ok(file)
    }

    /// Registers a freshly created segment file.
    pub(crate) fn insert(&self, segment: u64, file: File) -> Arc<File> {
        let file = Arc::new(file);
        let mut open = self.open.lock();
        self.admit(&mut open, segment, Arc::clone(&file));
        file
    }

    fn admit(&self, open: &mut HashMap<u64, Arc<File>>, segment: u64, file: Arc<File>) {
        open.insert(segment, file);
        self.replacer.record_access(segment);
        self.replacer.set_evictable(segment, true);

        while open.len() > self.capacity {
            self.replacer.set_evictable(segment, false);
            let victim = self.replacer.evict();
            self.replacer.set_evictable(segment, true);
            match victim {
                Some(victim) => {
                    open.remove(&victim);
                    debug!(segment = victim, "closed least recently used segment handle");
                }
                None => break,
            }
        }
    }

    /// Drops the handle of a segment that is being deleted.
    pub(crate) fn close(&self, segment: u64) {
        self.open.lock().remove(&segment);
        self.replacer.remove(segment);
    }

    pub(crate) fn len(&self) -> usize {
        self.open.lock().len()
    }
}

/// Manages the spill directory and the segment files of every store.
///
/// Each logical store is a [`FileStore`] whose contents span one or more
/// physical segment files. All stores share one bounded handle cache.
pub struct FileStorageManager {
    config: FileStorageConfig,
    handles: Arc<HandleCache>,
    /// Serial number source for segments of all stores.
    next_segment: Arc<AtomicU64>,
}

impl FileStorageManager {
    /// Creates a new file storage manager, creating the directory if needed.
    pub fn new(config: FileStorageConfig) -> Result<Self> {
        if config.max_segment_size == 0 {
            return Err(StrataError::InvalidParameter {
                name: "max_segment_size".to_string(),
                value: "0".to_string(),
            });
        }
        std::fs::create_dir_all(&config.dir)?;

        Ok(Self {
            handles: Arc::new(HandleCache::new(config.max_open_files)),
            config,
            next_segment: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Returns the directory holding segment files.
    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    pub fn config(&self) -> &FileStorageConfig {
        &self.config
    }

    /// Returns the number of currently open segment files.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Creates an empty logical store. No file is created until the first write.
    pub fn create_store(&self, name: &str) -> Arc<FileStore> {
        Arc::new(FileStore::new(
            name.to_string(),
            self.config.clone(),
            Arc::clone(&self.handles),
            Arc::clone(&self.next_segment),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::FileExt;
    use tempfile::tempdir;

    fn create_test_manager(dir: &Path, max_open_files: usize) -> FileStorageManager {
        FileStorageManager::new(FileStorageConfig {
            dir: dir.to_path_buf(),
            max_segment_size: 1024,
            max_open_files,
            fsync_enabled: false,
        })
        .unwrap()
    }

    #[test]
    fn test_file_storage_manager_new() {
        let dir = tempdir().unwrap();
        let spill = dir.path().join("nested").join("spill");
        let manager = create_test_manager(&spill, 4);

        assert!(spill.exists());
        assert_eq!(manager.dir(), spill.as_path());
        assert_eq!(manager.open_handles(), 0);
    }

    #[test]
    fn test_file_storage_manager_rejects_zero_segment_size() {
        let dir = tempdir().unwrap();
        let result = FileStorageManager::new(FileStorageConfig {
            dir: dir.path().to_path_buf(),
            max_segment_size: 0,
            ..Default::default()
        });
        assert!(matches!(result, Err(StrataError::InvalidParameter { .. })));
    }

    #[test]
    fn test_config_from_storage_config() {
        let storage = StorageConfig {
            max_open_files: 3,
            ..StorageConfig::with_spill_dir("/tmp/strata-spill")
        };
        let config = FileStorageConfig::from(&storage);
        assert_eq!(config.dir, PathBuf::from("/tmp/strata-spill"));
        assert_eq!(config.max_open_files, 3);
        assert_eq!(config.max_segment_size, DEFAULT_MAX_SEGMENT_SIZE);
    }

    #[test]
    fn test_handle_cache_evicts_lru() {
        let dir = tempdir().unwrap();
        let cache = HandleCache::new(2);

        let paths: Vec<PathBuf> = (0..3).map(|i| dir.path().join(format!("seg{}", i))).collect();
        for path in &paths {
            File::create(path).unwrap();
        }

        cache.get(0, &paths[0]).unwrap();
        cache.get(1, &paths[1]).unwrap();
        // Touch 0 so that 1 is the least recently used handle.
        cache.get(0, &paths[0]).unwrap();
        cache.get(2, &paths[2]).unwrap();

        assert_eq!(cache.len(), 2);
        let open = cache.open.lock();
        assert!(open.contains_key(&0));
        assert!(!open.contains_key(&1));
        assert!(open.contains_key(&2));
    }

    #[test]
    fn test_handle_survives_eviction_while_held() {
        let dir = tempdir().unwrap();
        let cache = HandleCache::new(1);
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        File::create(&a).unwrap();
        File::create(&b).unwrap();

        let held = cache.get(0, &a).unwrap();
        cache.get(1, &b).unwrap();
        assert_eq!(cache.len(), 1);

        // The evicted handle stays usable for its holder.
        held.write_all_at(b"still open", 0).unwrap();
        let mut buf = [0u8; 10];
        held.read_exact_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"still open");
    }

    #[test]
    fn test_handle_cache_missing_file() {
        let dir = tempdir().unwrap();
        let cache = HandleCache::new(2);
        let result = cache.get(0, &dir.path().join("missing"));
        assert!(matches!(result, Err(StrataError::Io(_))));
    }

    #[test]
    fn test_handle_cache_close() {
        let dir = tempdir().unwrap();
        let cache = HandleCache::new(2);
        let path = dir.path().join("seg");
        File::create(&path).unwrap();

        cache.get(5, &path).unwrap();
        cache.close(5);
        assert_eq!(cache.len(), 0);
    }
}
