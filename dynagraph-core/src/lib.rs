//! DynaGraph: a streaming approximate nearest-neighbor index.
//!
//! Points arrive through an ingest buffer, are committed in clustered
//! batches (or one at a time for small flushes) into a bounded-degree
//! proximity graph, and are answered by a router that merges graph search
//! with an exact scan of whatever is still buffered. Deletes are tombstones
//! until `compact` reclaims them.

pub mod config;
pub mod deletion;
pub mod engine;
pub mod error;
pub mod index;
pub mod partition;
pub mod pool;
pub mod router;
pub mod storage;
mod sync;
pub mod telemetry;

pub use config::{Element, ElementType, IndexConfig, IndexParams};
pub use deletion::CompactionReport;
pub use engine::{DeleteReport, DynaGraphIndex, InsertReport, PointState, SearchResults};
pub use error::{IndexError, Result};
pub use index::distance::{Distance, DistanceKernel, Metric};
pub use index::graph::ConnectivityReport;
pub use index::{Neighbor, VectorIndex, SENTINEL_ID};
pub use telemetry::StatsSnapshot;
