use std::collections::HashSet;

use crate::index::distance::{Distance, DistanceKernel};
use crate::index::graph::ProximityGraph;
use crate::index::search::beam_search;
use crate::index::Neighbor;
use crate::storage::{BufferedEntry, TombstoneSet, VectorStore};

/// Answers k-NN queries over the committed graph plus the ingest buffer.
///
/// # Logic
/// Graph candidates come from a beam search of list size `max(L, k)` over
/// every entry point; buffered points are scanned exactly. The two sets are
/// merged by slot, dead points are dropped, and the row is ordered by
/// `(distance, id)` and padded with sentinels to exactly `k`.
#[derive(Debug, Clone)]
pub struct QueryRouter {
    kernel: DistanceKernel,
    list_size: usize,
}

impl QueryRouter {
    pub fn new(kernel: DistanceKernel, list_size: usize) -> Self {
        Self { kernel, list_size }
    }

    /// `buffered` must be snapshotted before the graph and store locks were
    /// taken, so a point mid-flush is seen either here or in the graph.
    pub fn search(
        &self,
        graph: &ProximityGraph,
        store: &VectorStore,
        tombstones: &TombstoneSet,
        buffered: &[BufferedEntry],
        query: &[f32],
        k: usize,
    ) -> Vec<Neighbor> {
        if k == 0 {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let mut hits = Vec::with_capacity(self.list_size.max(k) + buffered.len());
        if !graph.is_empty() {
            let result = beam_search(graph, store, &self.kernel, query, graph.entry_points(), self.list_size.max(k));
            for c in result.nearest {
                if seen.insert(c.node) {
                    if let Some(id) = store.id_of(c.node) {
                        hits.push(Neighbor { id, distance: c.distance });
                    }
                }
            }
        }
        for entry in buffered {
            // Retired slots (superseded by a reinsert) no longer map back to
            // the entry's id.
            if seen.insert(entry.slot) && store.id_of(entry.slot) == Some(entry.id) {
                hits.push(Neighbor {
                    id: entry.id,
                    distance: self.kernel.distance(query, store.get(entry.slot)),
                });
            }
        }

        hits.retain(|n| !tombstones.contains(n.id));
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
        hits.truncate(k);
        hits.resize(k, Neighbor::SENTINEL);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::distance::Metric;

    fn fixture() -> (ProximityGraph, VectorStore) {
        let mut store = VectorStore::new(1, 16, false);
        let mut graph = ProximityGraph::new(4);
        for i in 0..4u64 {
            let slot = store.store(i, &[i as f32]).unwrap();
            graph.commit(slot);
        }
        graph.set_neighbors(0, &[1]);
        graph.set_neighbors(1, &[0, 2]);
        graph.set_neighbors(2, &[1, 3]);
        graph.set_neighbors(3, &[2]);
        graph.add_entry_point(0);
        (graph, store)
    }

    fn router() -> QueryRouter {
        QueryRouter::new(DistanceKernel::new(Metric::Euclidean), 8)
    }

    #[test]
    fn test_merges_graph_and_buffer() {
        let (graph, mut store) = fixture();
        let slot = store.store(10, &[2.9]).unwrap();
        let buffered = [BufferedEntry { id: 10, slot }];
        let hits = router().search(&graph, &store, &TombstoneSet::new(), &buffered, &[3.0], 2);
        let ids: Vec<u64> = hits.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![3, 10]);
    }

    #[test]
    fn test_tombstones_filtered_and_padded() {
        let (graph, store) = fixture();
        let tombstones = TombstoneSet::new();
        tombstones.mark(3);
        let hits = router().search(&graph, &store, &tombstones, &[], &[3.0], 5);
        assert_eq!(hits.len(), 5);
        assert!(hits.iter().all(|n| n.id != 3));
        assert_eq!(hits[0].id, 2);
        assert!(hits[3].is_sentinel());
        assert_eq!(hits[4].distance, f32::INFINITY);
    }

    #[test]
    fn test_empty_index_and_zero_k() {
        let graph = ProximityGraph::new(4);
        let store = VectorStore::new(1, 4, false);
        let tombstones = TombstoneSet::new();
        let hits = router().search(&graph, &store, &tombstones, &[], &[0.0], 3);
        assert!(hits.iter().all(Neighbor::is_sentinel));
        assert!(router().search(&graph, &store, &tombstones, &[], &[0.0], 0).is_empty());
    }

    #[test]
    fn test_ties_break_by_id() {
        let mut store = VectorStore::new(1, 4, false);
        let a = store.store(9, &[1.0]).unwrap();
        let b = store.store(4, &[-1.0]).unwrap();
        let buffered = [BufferedEntry { id: 9, slot: a }, BufferedEntry { id: 4, slot: b }];
        let hits = router().search(&ProximityGraph::new(4), &store, &TombstoneSet::new(), &buffered, &[0.0], 2);
        assert_eq!(hits[0].id, 4);
        assert_eq!(hits[1].id, 9);
    }
}
