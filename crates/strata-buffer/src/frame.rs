//! Batch cache frames.

use std::sync::Arc;
use strata_common::{BatchId, ManagerId, TupleBatch};

/// Residency state of a cached batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Counted against the memory budget and eligible for eviction.
    Resident,
    /// Chosen for eviction; the write-back is in flight. Readers may still
    /// take the batch, which re-admits it as resident.
    Limbo,
}

/// A frame in the batch cache holding one tuple batch.
///
/// Each frame contains:
/// - The batch contents, shared with readers through an `Arc`
/// - The owning manager and tree level, used to route write-back
/// - A version that changes on every modification
pub struct BatchFrame {
    batch_id: BatchId,
    owner: ManagerId,
    level: usize,
    data: Arc<TupleBatch>,
    /// Estimated in-memory size of `data` in bytes.
    size: usize,
    is_dirty: bool,
    version: u64,
    state: FrameState,
}

impl BatchFrame {
    /// Creates a resident frame.
    pub fn new(
        batch_id: BatchId,
        owner: ManagerId,
        level: usize,
        data: Arc<TupleBatch>,
        size: usize,
        is_dirty: bool,
        version: u64,
    ) -> Self {
        Self {
            batch_id,
            owner,
            level,
            data,
            size,
            is_dirty,
            version,
            state: FrameState::Resident,
        }
    }

    #[inline]
    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    #[inline]
    pub fn owner(&self) -> ManagerId {
        self.owner
    }

    #[inline]
    pub fn level(&self) -> usize {
        self.level
    }

    /// Returns a shared handle to the batch contents.
    #[inline]
    pub fn data(&self) -> Arc<TupleBatch> {
        Arc::clone(&self.data)
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    #[inline]
    pub fn set_dirty(&mut self, dirty: bool) {
        self.is_dirty = dirty;
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }

    #[inline]
    pub fn is_resident(&self) -> bool {
        self.state == FrameState::Resident
    }

    /// Replaces the contents, marking the frame dirty under a new version.
    pub fn replace(&mut self, data: Arc<TupleBatch>, size: usize, version: u64) {
        self.data = data;
        self.size = size;
        self.version = version;
        self.is_dirty = true;
    }

    pub fn set_state(&mut self, state: FrameState) {
        self.state = state;
    }
}

impl std::fmt::Debug for BatchFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchFrame")
            .field("batch_id", &self.batch_id)
            .field("owner", &self.owner)
            .field("level", &self.level)
            .field("rows", &self.data.len())
            .field("size", &self.size)
            .field("is_dirty", &self.is_dirty)
            .field("version", &self.version)
            .field("state", &self.state)
            .finish()
    }
}
