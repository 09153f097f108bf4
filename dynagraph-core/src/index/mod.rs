pub mod builder;
pub mod distance;
pub mod graph;
pub mod inserter;
pub mod search;
pub mod simd;

use serde::Serialize;

use crate::error::Result;

/// Id reserved for padding result rows.
pub const SENTINEL_ID: u64 = u64::MAX;

/// One query hit. Rows shorter than `k` are padded with `Neighbor::SENTINEL`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbor {
    pub id: u64,
    pub distance: f32,
}

impl Neighbor {
    pub const SENTINEL: Neighbor = Neighbor { id: SENTINEL_ID, distance: f32::INFINITY };

    pub fn is_sentinel(&self) -> bool {
        self.id == SENTINEL_ID
    }
}

/// Minimal single-vector surface shared by index implementations.
pub trait VectorIndex {
    fn insert(&self, id: u64, vector: &[f32]) -> Result<()>;
    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<Neighbor>>;
    /// Returns false if `id` was already deleted.
    fn remove(&self, id: u64) -> Result<bool>;
}
