//! Configuration structures for Strata.

use crate::error::{Result, StrataError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default maximum size of one physical segment file (2 GiB).
pub const DEFAULT_MAX_SEGMENT_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Default capacity of the open file handle cache.
pub const DEFAULT_MAX_OPEN_FILES: usize = 64;

/// Default memory budget of the batch cache (256 MB).
pub const DEFAULT_CACHE_MEMORY_BYTES: usize = 256 * 1024 * 1024;

/// Default byte budget of one tree page (64 KB).
pub const DEFAULT_PAGE_SIZE_BYTES: usize = 64 * 1024;

/// Storage configuration for spilled working sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding segment files.
    pub spill_dir: PathBuf,
    /// Maximum size of one segment file in bytes.
    pub max_segment_size: u64,
    /// Maximum number of simultaneously open segment files.
    pub max_open_files: usize,
    /// Memory budget of the batch cache in bytes.
    pub cache_memory_bytes: usize,
    /// Default byte budget of one tree page.
    pub page_size_bytes: usize,
    /// Sync segment files after every write.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            spill_dir: std::env::temp_dir().join("strata"),
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            cache_memory_bytes: DEFAULT_CACHE_MEMORY_BYTES,
            page_size_bytes: DEFAULT_PAGE_SIZE_BYTES,
            fsync_enabled: false,
        }
    }
}

impl StorageConfig {
    /// Creates a configuration spilling into `spill_dir` with default limits.
    pub fn with_spill_dir(spill_dir: impl Into<PathBuf>) -> Self {
        Self {
            spill_dir: spill_dir.into(),
            ..Default::default()
        }
    }

    /// Checks that every limit is usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_segment_size == 0 {
            return Err(invalid("max_segment_size", self.max_segment_size));
        }
        if self.max_open_files == 0 {
            return Err(invalid("max_open_files", self.max_open_files));
        }
        if self.page_size_bytes == 0 {
            return Err(invalid("page_size_bytes", self.page_size_bytes));
        }
        if self.spill_dir.as_os_str().is_empty() {
            return Err(StrataError::ConfigError("spill_dir is empty".to_string()));
        }
        Ok(())
    }
}

fn invalid(name: &str, value: impl ToString) -> StrataError {
    StrataError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
    }
}
