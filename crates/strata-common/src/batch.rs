//! Batch identifiers.

use serde::{Deserialize, Serialize};

/// Opaque identity of one persisted tuple batch.
///
/// Batch IDs are allocated process-wide by the buffer manager so that a
/// single cache can hold the batches of many trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BatchId(pub u64);

impl BatchId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "batch#{}", self.0)
    }
}

/// Identity of a batch manager, used to route evicted batches to their store.
pub type ManagerId = u32;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_batch_id_ordering_and_hash() {
        let a = BatchId::new(1);
        let b = BatchId::new(2);
        assert!(a < b);
        assert_eq!(a.as_u64(), 1);

        let set: HashSet<BatchId> = [a, b, BatchId(1)].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_batch_id_display() {
        assert_eq!(BatchId(42).to_string(), "batch#42");
    }
}
