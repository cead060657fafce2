//! Segmented logical stores.
//!
//! A [`FileStore`] presents one contiguous byte range backed by a sequence
//! of segment files. Each segment covers `[start, start + len)` of the
//! logical range and never grows beyond the configured maximum size.

use crate::disk::{FileStorageConfig, HandleCache};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_common::{Result, StrataError};
use tracing::debug;

/// Prefix of every segment file name.
pub const SEGMENT_PREFIX: &str = "strata";

/// Suffix of every segment file name.
pub const SEGMENT_SUFFIX: &str = ".seg";

/// One physical segment file of a store.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Serial number, unique across all stores; keys the handle cache.
    pub serial: u64,
    /// Position within its store, starting at 0.
    pub sequence: u32,
    pub path: PathBuf,
    /// Logical offset of the first byte of this segment.
    pub start: u64,
    /// Bytes written to this segment.
    pub len: u64,
}

impl Segment {
    /// Returns the logical offset one past the last written byte.
    pub fn end(&self) -> u64 {
        self.start + self.len
    }

    /// Returns true if `offset` falls within the written part of this segment.
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset < self.end()
    }
}

/// A logical byte store spanning one or more segment files.
///
/// Writers are serialized by a per-store mutex. Readers resolve the segment
/// under a short read lock and then read positionally without blocking
/// other readers.
pub struct FileStore {
    name: String,
    config: FileStorageConfig,
    handles: Arc<HandleCache>,
    next_serial: Arc<AtomicU64>,
    /// Segments keyed by their logical start offset.
    segments: RwLock<BTreeMap<u64, Segment>>,
    write_lock: Mutex<()>,
    length: AtomicU64,
    removed: RwLock<bool>,
}

impl FileStore {
    pub(crate) fn new(
        name: String,
        config: FileStorageConfig,
        handles: Arc<HandleCache>,
        next_serial: Arc<AtomicU64>,
    ) -> Self {
        Self {
            name,
            config,
            handles,
            next_serial,
            segments: RwLock::new(BTreeMap::new()),
            write_lock: Mutex::new(()),
            length: AtomicU64::new(0),
            removed: RwLock::new(false),
        }
    }

    /// Returns the logical name of this store.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the logical length in bytes.
    pub fn length(&self) -> u64 {
        self.length.load(Ordering::Acquire)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.read().len()
    }

    /// Returns the paths of all segment files in logical order.
    pub fn segment_paths(&self) -> Vec<PathBuf> {
        self.segments.read().values().map(|s| s.path.clone()).collect()
    }

    fn check_live(&self) -> Result<()> {
        if *self.removed.read() {
            return Err(StrataError::StoreRemoved(self.name.clone()));
        }
        Ok(())
    }

    /// Appends bytes at the end of the store.
    ///
    /// Returns the logical offset of the first appended byte.
    pub fn append(&self, data: &[u8]) -> Result<u64> {
        let _guard = self.write_lock.lock();
        let offset = self.length();
        self.write_locked(offset, data)?;
        Ok(offset)
    }

    /// Writes bytes at a logical offset.
    ///
    /// The offset must not lie beyond the current end; writing at the end
    /// extends the store, rolling to a new segment when the current one is full.
    pub fn write_direct(&self, offset: u64, data: &[u8]) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.write_locked(offset, data)
    }

    fn write_locked(&self, mut offset: u64, mut data: &[u8]) -> Result<()> {
        self.check_live()?;
        let length = self.length();
        if offset > length {
            return Err(StrataError::InvalidParameter {
                name: "offset".to_string(),
                value: format!("{} beyond end {} of store {}", offset, length, self.name),
            });
        }

        while !data.is_empty() {
            let segment = match self.floor_segment(offset) {
                Some(segment) if offset - segment.start < self.config.max_segment_size => segment,
                _ => self.roll_segment(offset)?,
            };

            let within = offset - segment.start;
            let room = self.config.max_segment_size - within;
            let chunk = (data.len() as u64).min(room) as usize;

            let file = self.handles.get(segment.serial, &segment.path)?;
            file.write_all_at(&data[..chunk], within)?;
            if self.config.fsync_enabled {
                file.sync_data()?;
            }

            let written_end = offset + chunk as u64;
            if written_end > segment.end() {
                if let Some(entry) = self.segments.write().get_mut(&segment.start) {
                    entry.len = written_end - segment.start;
                }
            }
            if written_end > self.length() {
                self.length.store(written_end, Ordering::Release);
            }

            offset = written_end;
            data = &data[chunk..];
        }
        Ok(())
    }

    /// Returns the segment with the greatest start offset at or before `offset`.
    fn floor_segment(&self, offset: u64) -> Option<Segment> {
        self.segments
            .read()
            .range(..=offset)
            .next_back()
            .map(|(_, segment)| segment.clone())
    }

    /// Creates a new segment file starting at logical offset `start`.
    fn roll_segment(&self, start: u64) -> Result<Segment> {
        let sequence = self.segments.read().len() as u32;
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let prefix = format!("{}_{}_{}_", SEGMENT_PREFIX, self.name, sequence);

        let named = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(SEGMENT_SUFFIX)
            .tempfile_in(&self.config.dir)?;
        let (file, path): (File, PathBuf) = named.keep().map_err(|e| e.error)?;
        self.handles.insert(serial, file);

        let segment = Segment {
            serial,
            sequence,
            path,
            start,
            len: 0,
        };
        self.segments.write().insert(start, segment.clone());
        debug!(
            store = %self.name,
            sequence,
            start,
            path = %segment.path.display(),
            "rolled to new segment"
        );
        Ok(segment)
    }

    /// Reads `buf.len()` bytes starting at a logical offset.
    pub fn read_direct(&self, mut offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check_live()?;
        let mut filled = 0usize;
        while filled < buf.len() {
            let segment = self
                .floor_segment(offset)
                .filter(|segment| segment.contains(offset))
                .ok_or_else(|| StrataError::SegmentNotFound {
                    store: self.name.clone(),
                    offset,
                })?;

            let within = offset - segment.start;
            let available = segment.len - within;
            let chunk = ((buf.len() - filled) as u64).min(available) as usize;

            let file = self.handles.get(segment.serial, &segment.path)?;
            file.read_exact_at(&mut buf[filled..filled + chunk], within)?;

            filled += chunk;
            offset += chunk as u64;
        }
        Ok(())
    }

    /// Reads `len` bytes starting at a logical offset into a new buffer.
    pub fn read_vec(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_direct(offset, &mut buf)?;
        Ok(buf)
    }

    /// Deletes every segment file. Later reads and writes fail.
    pub fn remove(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        {
            let mut removed = self.removed.write();
            if *removed {
                return Ok(());
            }
            *removed = true;
        }

        let segments = std::mem::take(&mut *self.segments.write());
        for segment in segments.values() {
            self.handles.close(segment.serial);
            remove_file_if_exists(&segment.path)?;
        }
        self.length.store(0, Ordering::Release);
        debug!(store = %self.name, segments = segments.len(), "removed store");
        Ok(())
    }
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
