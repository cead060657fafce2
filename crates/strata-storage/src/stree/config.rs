//! Configuration for STree instances.

use strata_common::config::DEFAULT_PAGE_SIZE_BYTES;
use strata_common::types::estimate_row_size;
use strata_common::{StorageConfig, TypeId};

/// Smallest page capacity a tree will use, in entries.
pub const MIN_PAGE_CAPACITY: usize = 4;

/// Configuration for an STree instance.
#[derive(Debug, Clone)]
pub struct STreeConfig {
    /// Approximate payload bytes per page.
    pub page_size_bytes: usize,

    /// Explicit page capacity in entries, bypassing the byte budget.
    pub page_capacity: Option<usize>,

    /// Floor for the derived page capacity.
    pub min_page_capacity: usize,

    /// Fixed seed for the leveling generator. Zero or None draws a random seed.
    pub seed: Option<u32>,

    /// Pages below `capacity / merge_divisor` entries are merge candidates.
    pub merge_divisor: usize,

    /// Splits keep `capacity / split_divisor` entries in the original page.
    pub split_divisor: usize,
}

impl Default for STreeConfig {
    fn default() -> Self {
        Self {
            page_size_bytes: DEFAULT_PAGE_SIZE_BYTES,
            page_capacity: None,
            min_page_capacity: MIN_PAGE_CAPACITY,
            seed: None,
            merge_divisor: 4,
            split_divisor: 2,
        }
    }
}

impl STreeConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration using the page budget of the storage configuration.
    pub fn from_storage(config: &StorageConfig) -> Self {
        Self::default().with_page_size_bytes(config.page_size_bytes)
    }

    /// Sets the page budget in bytes.
    pub fn with_page_size_bytes(mut self, bytes: usize) -> Self {
        self.page_size_bytes = bytes;
        self
    }

    /// Sets an explicit page capacity in entries.
    ///
    /// The capacity is rounded down to a power of two and clamped to the floor.
    pub fn with_page_capacity(mut self, capacity: usize) -> Self {
        self.page_capacity = Some(capacity);
        self
    }

    /// Sets the minimum page capacity.
    pub fn with_min_page_capacity(mut self, capacity: usize) -> Self {
        self.min_page_capacity = capacity.max(2);
        self
    }

    /// Fixes the leveling seed for reproducible trees.
    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets the merge threshold divisor.
    pub fn with_merge_divisor(mut self, divisor: usize) -> Self {
        self.merge_divisor = divisor.max(2);
        self
    }

    /// Sets the split point divisor.
    pub fn with_split_divisor(mut self, divisor: usize) -> Self {
        self.split_divisor = divisor.max(2);
        self
    }

    /// Computes the page capacity in entries for rows of the given types.
    ///
    /// The result is the largest power of two not exceeding the byte budget
    /// divided by the estimated row size, never below the floor.
    pub fn page_capacity_for(&self, types: &[TypeId]) -> usize {
        let floor = self.min_page_capacity.max(2).next_power_of_two();
        let raw = match self.page_capacity {
            Some(capacity) => capacity,
            None => self.page_size_bytes / estimate_row_size(types).max(1),
        };
        prev_power_of_two(raw).max(floor)
    }
}

/// Returns the largest power of two not exceeding `n`, or 0 for 0.
fn prev_power_of_two(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        1 << (usize::BITS - 1 - n.leading_zeros())
    }
}
