use std::collections::HashSet;
use std::sync::RwLock;

use crate::sync::{read, write};

/// External ids that have been deleted but whose slots are not yet
/// reclaimed.
///
/// Marking is a single short write lock, so deletes never wait on a graph
/// merge and are visible to the next read.
#[derive(Debug, Default)]
pub struct TombstoneSet {
    deleted: RwLock<HashSet<u64>>,
}

impl TombstoneSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `id` was newly tombstoned, false if it already was.
    pub fn mark(&self, id: u64) -> bool {
        write(&self.deleted).insert(id)
    }

    #[inline]
    pub fn contains(&self, id: u64) -> bool {
        read(&self.deleted).contains(&id)
    }

    /// Lifts a tombstone, used when a deleted id is inserted again.
    pub fn unmark(&self, id: u64) -> bool {
        write(&self.deleted).remove(&id)
    }

    pub fn len(&self) -> usize {
        read(&self.deleted).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.deleted).is_empty()
    }

    pub fn snapshot(&self) -> HashSet<u64> {
        read(&self.deleted).clone()
    }

    /// Drops tombstones for ids whose slots compaction has reclaimed.
    pub fn purge<I: IntoIterator<Item = u64>>(&self, ids: I) {
        let mut deleted = write(&self.deleted);
        for id in ids {
            deleted.remove(&id);
        }
    }
}
