use thiserror::Error;

use crate::config::ElementType;

/// Every failure the index surfaces to a caller.
///
/// An empty index is deliberately absent: querying one yields a
/// sentinel-padded row instead of an error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    #[error("Dimension mismatch: index expects {expected}, vector has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Id {0} is already live and updates on reinsert are disabled")]
    DuplicateId(u64),
    #[error("Id {0} was never stored in this index")]
    UnknownId(u64),
    #[error("Id {0} is reserved for result padding")]
    ReservedId(u64),
    #[error("Capacity exceeded: {max_points} resident points (compaction may reclaim slots)")]
    CapacityExceeded { max_points: usize },
    #[error("Shape mismatch: {ids} ids for {values} values at dimension {dimension}")]
    ShapeMismatch { ids: usize, values: usize, dimension: usize },
    #[error("Element type mismatch: index stores {expected:?}, got {actual:?}")]
    ElementTypeMismatch { expected: ElementType, actual: ElementType },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;
