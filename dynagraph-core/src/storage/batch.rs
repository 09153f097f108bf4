use crate::storage::buffer::BufferedEntry;
use crate::storage::vectors::{Slot, VectorStore};

/// Row-major copy of the vectors of one flush.
///
/// # Purpose
/// Partitioning and local graph construction run without holding the store
/// lock; they work on this private copy and refer to points by row.
pub struct Batch {
    dimension: usize,
    entries: Vec<BufferedEntry>,
    data: Vec<f32>,
}

impl Batch {
    /// Copies the vectors of `entries` out of `store`.
    pub fn gather(store: &VectorStore, entries: &[BufferedEntry]) -> Self {
        let dimension = store.dimension();
        let mut data = Vec::with_capacity(entries.len() * dimension);
        for entry in entries {
            data.extend_from_slice(store.get(entry.slot));
        }
        Self {
            dimension,
            entries: entries.to_vec(),
            data,
        }
    }

    /// Builds a batch from raw rows; rows are assigned consecutive slots.
    #[cfg(test)]
    pub fn from_rows(dimension: usize, rows: &[Vec<f32>]) -> Self {
        let entries = (0..rows.len())
            .map(|i| BufferedEntry { id: i as u64, slot: i as Slot })
            .collect();
        Self {
            dimension,
            entries,
            data: rows.iter().flatten().copied().collect(),
        }
    }

    #[inline]
    pub fn row(&self, index: usize) -> &[f32] {
        let offset = index * self.dimension;
        &self.data[offset..offset + self.dimension]
    }

    #[inline]
    pub fn slot(&self, index: usize) -> Slot {
        self.entries[index].slot
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}
