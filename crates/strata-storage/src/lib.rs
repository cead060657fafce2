//! Storage layer for Strata.
//!
//! This crate provides:
//! - Segmented file stores with a bounded open-handle cache
//! - Binary encoding of tuple batches
//! - Batch managers that keep page contents in a shared cache and spill
//!   evicted batches to disk
//! - The STree ordered index and its Browser cursor

mod codec;
mod disk;
mod manager;
mod segment;
pub mod stree;

pub use codec::{decode_batch, encode_batch, BATCH_HEADER_SIZE, CHECKSUM_SIZE};
pub use disk::{FileStorageConfig, FileStorageManager};
pub use manager::{BatchManager, BufferManager, MemoryBatchManager, SpillBatchManager};
pub use segment::{FileStore, Segment, SEGMENT_PREFIX, SEGMENT_SUFFIX};
pub use stree::{Browser, Direction, STree, STreeConfig, SearchResult, TreeStats};
