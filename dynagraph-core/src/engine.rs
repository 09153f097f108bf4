use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Instant;

use log::{debug, info};
use serde::Serialize;

use crate::config::{Element, IndexConfig};
use crate::deletion::{CompactionReport, DeletionManager};
use crate::error::{IndexError, Result};
use crate::index::builder::{GraphBuilder, LocalGraph};
use crate::index::distance::DistanceKernel;
use crate::index::graph::{ConnectivityReport, ProximityGraph};
use crate::index::inserter::{ConcurrentInserter, LinkOutcome};
use crate::index::{Neighbor, VectorIndex, SENTINEL_ID};
use crate::partition::ClusterPartitioner;
use crate::pool::WorkerPool;
use crate::router::QueryRouter;
use crate::storage::batch::Batch;
use crate::storage::{BufferedEntry, Flush, IngestBuffer, Slot, StageOutcome, VectorStore};
use crate::sync::{lock, read, write};
use crate::telemetry::{IndexStats, StatsSnapshot};

/// Where an accepted point sits when `insert` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PointState {
    /// Staged in the ingest buffer; found by exact scan until the next flush.
    Buffered,
    /// Linked into the proximity graph.
    Committed,
}

/// Per-point results of one `insert` call, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertReport {
    pub outcomes: Vec<Result<PointState>>,
}

impl InsertReport {
    pub fn accepted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn committed(&self) -> usize {
        self.outcomes.iter().filter(|o| matches!(o, Ok(PointState::Committed))).count()
    }

    pub fn buffered(&self) -> usize {
        self.outcomes.iter().filter(|o| matches!(o, Ok(PointState::Buffered))).count()
    }

    pub fn errors(&self) -> impl Iterator<Item = (usize, &IndexError)> {
        self.outcomes.iter().enumerate().filter_map(|(i, o)| o.as_ref().err().map(|e| (i, e)))
    }

    pub fn is_ok(&self) -> bool {
        self.outcomes.iter().all(|o| o.is_ok())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub tombstoned: usize,
    pub already_deleted: usize,
    pub unknown: Vec<u64>,
}

/// Row-major `rows x k` query results, sentinel padded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResults {
    pub k: usize,
    pub ids: Vec<u64>,
    pub distances: Vec<f32>,
}

impl SearchResults {
    fn from_rows(k: usize, rows: Vec<Vec<Neighbor>>) -> Self {
        let mut ids = Vec::with_capacity(rows.len() * k);
        let mut distances = Vec::with_capacity(rows.len() * k);
        for n in rows.into_iter().flatten() {
            ids.push(n.id);
            distances.push(n.distance);
        }
        Self { k, ids, distances }
    }

    pub fn rows(&self) -> usize {
        if self.k == 0 {
            0
        } else {
            self.ids.len() / self.k
        }
    }

    pub fn ids(&self, row: usize) -> &[u64] {
        &self.ids[row * self.k..(row + 1) * self.k]
    }

    pub fn distances(&self, row: usize) -> &[f32] {
        &self.distances[row * self.k..(row + 1) * self.k]
    }
}

/// The streaming index: an explicit context owning every component.
///
/// # Locks
/// `gate` (shared by inserts and flushes, exclusive for compaction), then
/// `buffer`, `graph`, `store`, and the tombstone set, always in that order.
/// Queries snapshot the buffer and release it before touching the graph.
pub struct DynaGraphIndex {
    config: IndexConfig,
    gate: RwLock<()>,
    buffer: Mutex<IngestBuffer>,
    graph: RwLock<ProximityGraph>,
    store: RwLock<VectorStore>,
    deletion: DeletionManager,
    partitioner: ClusterPartitioner,
    builder: GraphBuilder,
    inserter: ConcurrentInserter,
    router: QueryRouter,
    insert_pool: WorkerPool,
    search_pool: WorkerPool,
    stats: IndexStats,
    flush_seq: AtomicU64,
}

impl DynaGraphIndex {
    pub fn setup(config: IndexConfig) -> Result<Self> {
        config.validate()?;
        let params = &config.params;
        info!(
            "Initializing DynaGraph index (Dim: {}, Max: {}, Metric: {}, L: {}, R: {}, Batch: {})",
            config.dimension,
            config.max_points,
            config.metric,
            params.search_list_size,
            params.max_degree,
            params.batch_size
        );
        let kernel = DistanceKernel::new(config.metric);
        Ok(Self {
            gate: RwLock::new(()),
            buffer: Mutex::new(IngestBuffer::new(params.batch_size)),
            graph: RwLock::new(ProximityGraph::new(params.max_degree)),
            store: RwLock::new(VectorStore::new(config.dimension, config.max_points, params.update_on_reinsert)),
            deletion: DeletionManager::new(kernel, params.alpha, params.max_degree, params.compaction_threshold),
            partitioner: ClusterPartitioner::new(params),
            builder: GraphBuilder::new(params, kernel),
            inserter: ConcurrentInserter::new(params, kernel),
            router: QueryRouter::new(kernel, params.search_list_size),
            insert_pool: WorkerPool::new("insert", params.insert_workers()),
            search_pool: WorkerPool::new("search", params.search_workers()),
            stats: IndexStats::default(),
            flush_seq: AtomicU64::new(0),
            config,
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn check_shape<T: Element>(&self, vectors: &[T], ids: &[u64]) -> Result<()> {
        if T::TYPE != self.config.element_type {
            return Err(IndexError::ElementTypeMismatch {
                expected: self.config.element_type,
                actual: T::TYPE,
            });
        }
        if vectors.len() != ids.len() * self.config.dimension {
            return Err(IndexError::ShapeMismatch {
                ids: ids.len(),
                values: vectors.len(),
                dimension: self.config.dimension,
            });
        }
        Ok(())
    }

    /// Stores one point. A tombstoned id is revived onto a fresh slot; its
    /// old slot is retired for compaction.
    fn store_point(&self, store: &mut VectorStore, id: u64, vector: &[f32]) -> Result<Slot> {
        if id == SENTINEL_ID {
            return Err(IndexError::ReservedId(id));
        }
        let tombstones = self.deletion.tombstones();
        if tombstones.contains(id) {
            if vector.len() != store.dimension() {
                return Err(IndexError::DimensionMismatch { expected: store.dimension(), actual: vector.len() });
            }
            if store.resident() >= store.max_points() {
                return Err(IndexError::CapacityExceeded { max_points: store.max_points() });
            }
            store.detach(id);
            tombstones.unmark(id);
        }
        store.store(id, vector)
    }

    /// Stores a batch of vectors and routes it through the ingest buffer.
    ///
    /// Points are validated individually: a rejected point is reported in
    /// its slot of the `InsertReport` and never affects the others. Calls
    /// with at least `batch_size` valid points commit full batches directly
    /// and stage only the remainder. Returns after every flush this call
    /// triggered has been merged.
    ///
    /// # Errors
    /// `ElementTypeMismatch` or `ShapeMismatch` reject the whole call before
    /// anything is stored.
    pub fn insert<T: Element>(&self, vectors: &[T], ids: &[u64]) -> Result<InsertReport> {
        self.check_shape(vectors, ids)?;
        let start = Instant::now();
        let dim = self.config.dimension;
        let batch_size = self.config.params.batch_size;
        let _gate = read(&self.gate);

        let mut outcomes: Vec<Result<Slot>> = Vec::with_capacity(ids.len());
        let mut flushes = Vec::new();
        {
            let mut buffer = lock(&self.buffer);
            let mut store = write(&self.store);
            let mut accepted = Vec::with_capacity(ids.len());
            for (&id, raw) in ids.iter().zip(vectors.chunks_exact(dim)) {
                let vector: Vec<f32> = raw.iter().map(|&v| v.into()).collect();
                let outcome = self.store_point(&mut store, id, &vector);
                if let Ok(slot) = outcome {
                    accepted.push(BufferedEntry { id, slot });
                }
                outcomes.push(outcome);
            }
            drop(store);

            let mut rest = accepted.as_slice();
            while rest.len() >= batch_size {
                let (chunk, tail) = rest.split_at(batch_size);
                flushes.push(buffer.register(chunk.to_vec()));
                rest = tail;
            }
            for &entry in rest {
                if let StageOutcome::FlushTriggered(flush) = buffer.stage(entry) {
                    flushes.push(flush);
                }
            }
        }

        for flush in flushes {
            self.commit_flush(flush, false);
        }

        let report = {
            let graph = read(&self.graph);
            InsertReport {
                outcomes: outcomes
                    .into_iter()
                    .map(|outcome| {
                        outcome.map(|slot| {
                            if graph.is_committed(slot) {
                                PointState::Committed
                            } else {
                                PointState::Buffered
                            }
                        })
                    })
                    .collect(),
            }
        };
        self.stats.insert_latency.record(start.elapsed());
        Ok(report)
    }

    /// One-shot load: inserts everything and commits whatever is left in the
    /// buffer, so every accepted point is `Committed` on return.
    pub fn build<T: Element>(&self, vectors: &[T], ids: &[u64]) -> Result<InsertReport> {
        let mut report = self.insert(vectors, ids)?;
        self.flush();
        for outcome in report.outcomes.iter_mut() {
            if let Ok(state) = outcome {
                *state = PointState::Committed;
            }
        }
        info!("Build complete: {} points committed", self.committed_len());
        Ok(report)
    }

    /// Inserts one point straight into the graph through the incremental
    /// path, bypassing the buffer.
    pub fn insert_point<T: Element>(&self, id: u64, vector: &[T]) -> Result<PointState> {
        self.check_shape(vector, &[id])?;
        let start = Instant::now();
        let _gate = read(&self.gate);
        let flush = {
            let mut buffer = lock(&self.buffer);
            let mut store = write(&self.store);
            let vector: Vec<f32> = vector.iter().map(|&v| v.into()).collect();
            let slot = self.store_point(&mut store, id, &vector)?;
            buffer.register(vec![BufferedEntry { id, slot }])
        };
        self.commit_flush(flush, true);
        self.stats.insert_latency.record(start.elapsed());
        Ok(PointState::Committed)
    }

    /// Commits the active buffer contents. Returns the number of points
    /// flushed.
    pub fn flush(&self) -> usize {
        let _gate = read(&self.gate);
        self.flush_locked()
    }

    fn flush_locked(&self) -> usize {
        let drained = lock(&self.buffer).drain();
        match drained {
            Some(flush) => {
                let n = flush.entries.len();
                self.commit_flush(flush, false);
                n
            }
            None => 0,
        }
    }

    /// Links a flush into the graph and retires it from the buffer. Must be
    /// called with the gate held.
    fn commit_flush(&self, flush: Flush, incremental: bool) {
        let seq = self.flush_seq.fetch_add(1, Ordering::Relaxed);
        let entries = flush.entries.as_slice();
        if incremental || entries.len() < self.config.params.incremental_threshold {
            self.commit_incremental(entries);
        } else {
            self.commit_batch(entries, seq);
        }
        lock(&self.buffer).complete(flush.ticket);
        IndexStats::add(&self.stats.flushes, 1);
    }

    fn commit_batch(&self, entries: &[BufferedEntry], seq: u64) {
        let batch = Batch::gather(&read(&self.store), entries);
        let seed = self.config.params.seed ^ seq.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        let clusters = self.partitioner.partition(&batch, seed);
        let locals: Vec<LocalGraph> = self
            .insert_pool
            .map(&clusters, |cluster| self.builder.build_cluster(&batch, cluster));
        IndexStats::add(&self.stats.clusters_built, locals.len());

        let mut graph = write(&self.graph);
        let store = read(&self.store);
        let mut bridge_edges = 0;
        for local in locals {
            let merge = self.builder.merge(&mut graph, &store, local);
            bridge_edges += merge.bridge_edges + merge.back_edges;
            if merge.promoted {
                IndexStats::add(&self.stats.promoted_entry_points, 1);
            }
        }
        let repair = self.builder.restore_connectivity(&mut graph, &store);
        IndexStats::add(&self.stats.bridge_edges, bridge_edges);
        IndexStats::add(&self.stats.repaired_slots, repair.linked);
        IndexStats::add(&self.stats.promoted_entry_points, repair.promoted);
        debug!(
            "Flush {} merged: {} points in {} clusters, {} bridge edges, graph {} committed",
            seq,
            entries.len(),
            clusters.len(),
            bridge_edges,
            graph.committed_len()
        );
    }

    fn commit_incremental(&self, entries: &[BufferedEntry]) {
        let slots: Vec<Slot> = entries.iter().map(|e| e.slot).collect();
        let outcomes = self.inserter.insert_many(&self.insert_pool, &self.graph, &self.store, &slots);
        let promoted = outcomes.iter().filter(|o| **o == LinkOutcome::Promoted).count();
        IndexStats::add(&self.stats.incremental_inserts, slots.len());
        IndexStats::add(&self.stats.promoted_entry_points, promoted);

        let mut graph = write(&self.graph);
        let store = read(&self.store);
        let repair = self.builder.restore_connectivity(&mut graph, &store);
        IndexStats::add(&self.stats.repaired_slots, repair.linked);
        IndexStats::add(&self.stats.promoted_entry_points, repair.promoted);
    }

    /// Nearest `k` live points to `vector`, padded to exactly `k` with
    /// `Neighbor::SENTINEL`.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if vector.len() != self.config.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            });
        }
        let start = Instant::now();
        let buffered = lock(&self.buffer).snapshot();
        let graph = read(&self.graph);
        let store = read(&self.store);
        let hits = self.router.search(&graph, &store, self.deletion.tombstones(), &buffered, vector, k);
        IndexStats::add(&self.stats.queries, 1);
        self.stats.query_latency.record(start.elapsed());
        Ok(hits)
    }

    /// Runs `vectors.len() / dimension` queries on the search pool.
    pub fn query_batch(&self, vectors: &[f32], k: usize) -> Result<SearchResults> {
        let dim = self.config.dimension;
        if vectors.len() % dim != 0 {
            return Err(IndexError::ShapeMismatch {
                ids: vectors.len() / dim,
                values: vectors.len(),
                dimension: dim,
            });
        }
        let start = Instant::now();
        let queries: Vec<&[f32]> = vectors.chunks_exact(dim).collect();
        let buffered = lock(&self.buffer).snapshot();
        let graph = read(&self.graph);
        let store = read(&self.store);
        let tombstones = self.deletion.tombstones();
        let rows = self.search_pool.map(&queries, |query| {
            self.router.search(&graph, &store, tombstones, &buffered, query, k)
        });
        IndexStats::add(&self.stats.queries, queries.len());
        self.stats.query_latency.record(start.elapsed());
        Ok(SearchResults::from_rows(k, rows))
    }

    /// Tombstones `ids`; deleted points vanish from every later query.
    pub fn delete(&self, ids: &[u64]) -> DeleteReport {
        let store = read(&self.store);
        let mut report = DeleteReport::default();
        for &id in ids {
            match self.deletion.delete(&store, id) {
                Ok(true) => report.tombstoned += 1,
                Ok(false) => report.already_deleted += 1,
                Err(_) => report.unknown.push(id),
            }
        }
        report
    }

    pub fn delete_one(&self, id: u64) -> Result<bool> {
        self.deletion.delete(&read(&self.store), id)
    }

    pub fn should_compact(&self) -> bool {
        self.deletion.should_compact(&read(&self.store))
    }

    /// Flushes the buffer, then removes tombstoned and retired points from
    /// the graph and reclaims their slots. Blocks inserts for its duration.
    pub fn compact(&self) -> Result<CompactionReport> {
        let _gate = write(&self.gate);
        self.flush_locked();
        let mut graph = write(&self.graph);
        let mut store = write(&self.store);
        let report = self.deletion.compact(&mut graph, &mut store, &self.builder);
        IndexStats::add(&self.stats.compactions, 1);
        Ok(report)
    }

    pub fn is_built(&self) -> bool {
        !read(&self.graph).is_empty()
    }

    /// Live ids, buffered or committed, excluding tombstoned ones.
    pub fn len(&self) -> usize {
        let store = read(&self.store);
        store.live().saturating_sub(self.deletion.tombstones().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Points stored but not yet linked, in-flight flushes included.
    pub fn buffered_len(&self) -> usize {
        let buffer = lock(&self.buffer);
        buffer.len() + buffer.in_flight_len()
    }

    pub fn committed_len(&self) -> usize {
        read(&self.graph).committed_len()
    }

    pub fn connectivity(&self) -> ConnectivityReport {
        read(&self.graph).connectivity()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl VectorIndex for DynaGraphIndex {
    fn insert(&self, id: u64, vector: &[f32]) -> Result<()> {
        let report = DynaGraphIndex::insert(self, vector, &[id])?;
        match report.outcomes.into_iter().next() {
            Some(Err(e)) => Err(e),
            _ => Ok(()),
        }
    }

    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<Neighbor>> {
        self.query(query, top_k)
    }

    fn remove(&self, id: u64) -> Result<bool> {
        self.delete_one(id)
    }
}
