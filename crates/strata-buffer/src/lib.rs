//! Batch cache management for Strata.
//!
//! This crate provides in-memory caching of tuple batches with:
//! - A shared memory budget across every batch manager
//! - Least-recently-used eviction
//! - A limbo state for batches whose write-back is in flight
//! - Versioned dirty tracking so stale write-backs are ignored

mod frame;
mod pool;
mod replacer;

pub use frame::{BatchFrame, FrameState};
pub use pool::{BatchCache, BatchCacheConfig, BatchCacheStats, EvictedBatch};
pub use replacer::{LruReplacer, Replacer};
