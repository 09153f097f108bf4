pub mod batch;
pub mod buffer;
pub mod tombstones;
pub mod vectors;

pub use buffer::{BufferedEntry, Flush, IngestBuffer, StageOutcome};
pub use tombstones::TombstoneSet;
pub use vectors::{Slot, VectorStore};
