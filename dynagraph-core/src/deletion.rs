use std::collections::HashSet;

use log::{debug, info};
use serde::Serialize;

use crate::error::{IndexError, Result};
use crate::index::builder::GraphBuilder;
use crate::index::distance::DistanceKernel;
use crate::index::graph::{ConnectivityReport, Neighborhood, ProximityGraph};
use crate::index::search::{candidates_for, robust_prune};
use crate::storage::{Slot, TombstoneSet, VectorStore};

/// What one compaction pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CompactionReport {
    /// Slots detached from the graph and returned to the store's free list.
    pub reclaimed: usize,
    /// Live slots whose neighbor lists were rebuilt around dead ones.
    pub repaired: usize,
    pub replaced_entry_points: usize,
    pub connectivity: ConnectivityReport,
}

/// Tombstone deletion and the compaction that reclaims it.
#[derive(Debug)]
pub struct DeletionManager {
    tombstones: TombstoneSet,
    kernel: DistanceKernel,
    alpha: f32,
    max_degree: usize,
    threshold: f32,
}

impl DeletionManager {
    pub fn new(kernel: DistanceKernel, alpha: f32, max_degree: usize, threshold: f32) -> Self {
        Self {
            tombstones: TombstoneSet::new(),
            kernel,
            alpha,
            max_degree,
            threshold,
        }
    }

    pub fn tombstones(&self) -> &TombstoneSet {
        &self.tombstones
    }

    /// Tombstones `id`. Returns false if it already was.
    ///
    /// # Errors
    /// `UnknownId` if `id` has no slot, either because it was never stored or
    /// because a compaction already reclaimed it.
    pub fn delete(&self, store: &VectorStore, id: u64) -> Result<bool> {
        if !store.contains(id) {
            return Err(IndexError::UnknownId(id));
        }
        Ok(self.tombstones.mark(id))
    }

    /// Slots holding a vector no query can return: tombstoned or retired.
    pub fn dead_slots(&self, store: &VectorStore) -> HashSet<Slot> {
        let mut dead: HashSet<Slot> = self
            .tombstones
            .snapshot()
            .into_iter()
            .filter_map(|id| store.slot_of(id))
            .collect();
        dead.extend(store.retired_slots());
        dead
    }

    pub fn should_compact(&self, store: &VectorStore) -> bool {
        let resident = store.resident();
        if resident == 0 {
            return false;
        }
        let dead = self.dead_slots(store).len();
        dead > 0 && dead as f32 / resident as f32 > self.threshold
    }

    /// Removes every dead slot from the graph and the store.
    ///
    /// The caller must have committed all buffered points and hold exclusive
    /// access to both structures.
    ///
    /// # Logic
    /// 1. Each live slot with a dead out-neighbor gets its list rebuilt by
    ///    alpha-pruning its live neighbors plus the live neighbors of its dead
    ///    ones.
    /// 2. Dead entry points are replaced by one of their live neighbors.
    /// 3. Dead slots are detached and reclaimed; their tombstones purged.
    /// 4. Connectivity is re-verified and repaired.
    pub fn compact(&self, graph: &mut ProximityGraph, store: &mut VectorStore, builder: &GraphBuilder) -> CompactionReport {
        let mut report = CompactionReport::default();
        let dead_ids = self.tombstones.snapshot();
        let dead = self.dead_slots(store);
        if dead.is_empty() {
            report.connectivity = graph.connectivity();
            return report;
        }
        info!("Compacting {} dead slots ({} tombstoned ids)", dead.len(), dead_ids.len());

        let live: Vec<Slot> = graph.committed_slots().filter(|s| !dead.contains(s)).collect();
        for &slot in &live {
            let neighbors = graph.neighbors(slot);
            if !neighbors.iter().any(|n| dead.contains(n)) {
                continue;
            }
            let mut targets: Vec<Slot> = Vec::with_capacity(neighbors.len() * 2);
            for &n in neighbors {
                if dead.contains(&n) {
                    targets.extend(graph.neighbors(n).iter().filter(|&&m| m != slot && !dead.contains(&m)));
                } else {
                    targets.push(n);
                }
            }
            targets.sort_unstable();
            targets.dedup();
            let pool = candidates_for(slot, &targets, &*store, &self.kernel);
            let pruned = robust_prune(slot, &pool, &*store, &self.kernel, self.alpha, self.max_degree);
            graph.set_neighbors(slot, &pruned);
            report.repaired += 1;
        }

        let dead_entries: Vec<Slot> = graph.entry_points().iter().copied().filter(|e| dead.contains(e)).collect();
        for entry in dead_entries {
            let replacement = graph
                .neighbors(entry)
                .iter()
                .copied()
                .find(|n| !dead.contains(n) && graph.is_committed(*n))
                .or_else(|| live.first().copied());
            if let Some(slot) = replacement {
                if graph.add_entry_point(slot) {
                    report.replaced_entry_points += 1;
                }
            }
        }

        for &slot in &dead {
            graph.detach(slot);
        }
        for &slot in &dead {
            store.reclaim(slot);
        }
        report.reclaimed = dead.len();
        self.tombstones.purge(dead_ids);

        let repair = builder.restore_connectivity(graph, store);
        report.connectivity = graph.connectivity();
        debug!(
            "Compaction done: {} reclaimed, {} repaired, {} entry points replaced, {} promoted",
            report.reclaimed, report.repaired, report.replaced_entry_points, repair.promoted
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexParams;
    use crate::index::distance::Metric;

    fn line(n: u64) -> (ProximityGraph, VectorStore) {
        let mut store = VectorStore::new(1, 32, false);
        let mut graph = ProximityGraph::new(4);
        for i in 0..n {
            let slot = store.store(i, &[i as f32]).unwrap();
            graph.commit(slot);
        }
        for i in 0..n as Slot {
            let mut next = Vec::new();
            if i > 0 {
                next.push(i - 1);
            }
            if (i as u64) + 1 < n {
                next.push(i + 1);
            }
            graph.set_neighbors(i, &next);
        }
        graph.add_entry_point(0);
        (graph, store)
    }

    fn manager() -> DeletionManager {
        DeletionManager::new(DistanceKernel::new(Metric::Euclidean), 1.2, 4, 0.1)
    }

    fn builder() -> GraphBuilder {
        GraphBuilder::new(&IndexParams::default(), DistanceKernel::new(Metric::Euclidean))
    }

    #[test]
    fn test_delete_idempotent_and_unknown() {
        let (_, store) = line(3);
        let deletion = manager();
        assert_eq!(deletion.delete(&store, 1), Ok(true));
        assert_eq!(deletion.delete(&store, 1), Ok(false));
        assert_eq!(deletion.delete(&store, 77), Err(IndexError::UnknownId(77)));
        assert_eq!(deletion.tombstones().len(), 1);
    }

    #[test]
    fn test_compaction_bypasses_dead_middle() {
        let (mut graph, mut store) = line(5);
        let deletion = manager();
        deletion.delete(&store, 2).unwrap();
        assert!(deletion.should_compact(&store));

        let report = deletion.compact(&mut graph, &mut store, &builder());
        assert_eq!(report.reclaimed, 1);
        assert_eq!(report.repaired, 2);
        assert!(report.connectivity.is_connected());
        assert_eq!(report.connectivity.committed, 4);
        assert!(graph.neighbors(1).contains(&3));
        assert!(!store.contains(2));
        assert!(deletion.tombstones().is_empty());
        assert_eq!(deletion.delete(&store, 2), Err(IndexError::UnknownId(2)));
    }

    #[test]
    fn test_dead_entry_point_replaced() {
        let (mut graph, mut store) = line(3);
        let deletion = manager();
        deletion.delete(&store, 0).unwrap();
        let report = deletion.compact(&mut graph, &mut store, &builder());
        assert_eq!(report.replaced_entry_points, 1);
        assert_eq!(graph.entry_points(), &[1]);
        assert!(report.connectivity.is_connected());
    }

    #[test]
    fn test_delete_everything() {
        let (mut graph, mut store) = line(3);
        let deletion = manager();
        for id in 0..3 {
            deletion.delete(&store, id).unwrap();
        }
        let report = deletion.compact(&mut graph, &mut store, &builder());
        assert_eq!(report.reclaimed, 3);
        assert_eq!(graph.committed_len(), 0);
        assert!(graph.entry_points().is_empty());
        assert_eq!(store.resident(), 0);
    }
}
