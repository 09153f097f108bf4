use std::sync::RwLock;

use log::trace;

use crate::config::IndexParams;
use crate::index::builder::attach_edge;
use crate::index::distance::DistanceKernel;
use crate::index::graph::ProximityGraph;
use crate::index::search::{beam_search, candidates_for, robust_prune, Candidate};
use crate::pool::WorkerPool;
use crate::storage::vectors::{Slot, VectorStore};
use crate::sync::{read, write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// At least one existing slot took a reverse edge to the new point.
    Linked,
    /// Nothing pointed back, so the point joined the entry set.
    Promoted,
}

/// Point-at-a-time insertion into the live graph.
///
/// # Logic
/// Phase 1 (read locks, parallel): beam search from the entry set and keep
/// the search's prune pool. Phase 2 (graph write lock, sequential): prune to
/// R, write the out-edges, then add reverse edges, evicting a farther edge
/// from full lists.
#[derive(Debug, Clone)]
pub struct ConcurrentInserter {
    kernel: DistanceKernel,
    alpha: f32,
    list_size: usize,
    max_degree: usize,
}

impl ConcurrentInserter {
    pub fn new(params: &IndexParams, kernel: DistanceKernel) -> Self {
        Self {
            kernel,
            alpha: params.alpha,
            list_size: params.search_list_size,
            max_degree: params.max_degree,
        }
    }

    fn plan(&self, graph: &ProximityGraph, store: &VectorStore, slot: Slot) -> Vec<Candidate> {
        beam_search(graph, store, &self.kernel, store.get(slot), graph.entry_points(), self.list_size).prune_pool()
    }

    fn link(&self, graph: &mut ProximityGraph, store: &VectorStore, slot: Slot, pool: &[Candidate]) -> LinkOutcome {
        let neighbors: Vec<Slot> = robust_prune(slot, pool, store, &self.kernel, self.alpha, self.max_degree)
            .into_iter()
            .filter(|&n| graph.is_committed(n))
            .collect();
        graph.commit(slot);
        graph.set_neighbors(slot, &neighbors);

        let accepted = neighbors
            .iter()
            .filter(|&&n| attach_edge(graph, store, &self.kernel, n, slot))
            .count();
        if accepted == 0 {
            graph.add_entry_point(slot);
            trace!("Slot {} promoted to entry point", slot);
            LinkOutcome::Promoted
        } else {
            trace!("Slot {} linked ({} out, {} reverse)", slot, neighbors.len(), accepted);
            LinkOutcome::Linked
        }
    }

    /// Inserts a single stored slot.
    pub fn insert_one(
        &self,
        graph: &RwLock<ProximityGraph>,
        store: &RwLock<VectorStore>,
        slot: Slot,
    ) -> LinkOutcome {
        let pool = {
            let graph = read(graph);
            let store = read(store);
            self.plan(&graph, &store, slot)
        };
        let mut graph = write(graph);
        let store = read(store);
        if graph.is_empty() {
            graph.commit(slot);
            graph.add_entry_point(slot);
            return LinkOutcome::Promoted;
        }
        self.link(&mut graph, &store, slot, &pool)
    }

    /// Inserts `slots` with phase 1 fanned out over `workers`.
    ///
    /// Points of the same call also consider each other as candidates during
    /// phase 2, so a burst into a sparse graph does not fan in on one node.
    pub fn insert_many(
        &self,
        workers: &WorkerPool,
        graph: &RwLock<ProximityGraph>,
        store: &RwLock<VectorStore>,
        slots: &[Slot],
    ) -> Vec<LinkOutcome> {
        let mut outcomes = Vec::with_capacity(slots.len());
        let mut rest = slots;
        {
            let mut graph = write(graph);
            if graph.is_empty() {
                if let Some((&first, tail)) = slots.split_first() {
                    graph.commit(first);
                    graph.add_entry_point(first);
                    outcomes.push(LinkOutcome::Promoted);
                    rest = tail;
                }
            }
        }
        if rest.is_empty() {
            return outcomes;
        }

        let plans = {
            let graph = read(graph);
            let store = read(store);
            workers.map(rest, |&slot| self.plan(&graph, &store, slot))
        };

        let mut graph = write(graph);
        let store = read(store);
        let mut peers: Vec<Slot> = Vec::with_capacity(rest.len());
        for (&slot, mut pool) in rest.iter().zip(plans) {
            pool.extend(candidates_for(slot, &peers, &*store, &self.kernel));
            outcomes.push(self.link(&mut graph, &store, slot, &pool));
            peers.push(slot);
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::builder::GraphBuilder;
    use crate::index::distance::Metric;
    use crate::index::graph::Neighborhood;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn setup(n: usize, dim: usize) -> (RwLock<ProximityGraph>, RwLock<VectorStore>, Vec<Slot>) {
        let mut rng = StdRng::seed_from_u64(11);
        let mut store = VectorStore::new(dim, n, false);
        let slots = (0..n as u64)
            .map(|id| {
                let v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
                store.store(id, &v).unwrap()
            })
            .collect();
        (RwLock::new(ProximityGraph::new(8)), RwLock::new(store), slots)
    }

    fn inserter() -> ConcurrentInserter {
        let params = IndexParams { max_degree: 8, search_list_size: 24, ..IndexParams::default() };
        ConcurrentInserter::new(&params, DistanceKernel::new(Metric::Euclidean))
    }

    #[test]
    fn test_first_point_becomes_entry() {
        let (graph, store, slots) = setup(2, 4);
        let inserter = inserter();
        assert_eq!(inserter.insert_one(&graph, &store, slots[0]), LinkOutcome::Promoted);
        assert_eq!(read(&graph).entry_points(), &[slots[0]]);
        assert_eq!(inserter.insert_one(&graph, &store, slots[1]), LinkOutcome::Linked);
        let graph = read(&graph);
        assert_eq!(graph.neighbors(slots[1]), &[slots[0]]);
        assert_eq!(graph.neighbors(slots[0]), &[slots[1]]);
    }

    #[test]
    fn test_insert_many_keeps_graph_connected() {
        let (graph, store, slots) = setup(60, 6);
        let pool = WorkerPool::new("insert", 3);
        let outcomes = inserter().insert_many(&pool, &graph, &store, &slots);
        assert_eq!(outcomes.len(), 60);
        assert_eq!(outcomes[0], LinkOutcome::Promoted);
        let mut graph = write(&graph);
        assert_eq!(graph.committed_len(), 60);
        let params = IndexParams { max_degree: 8, ..IndexParams::default() };
        let builder = GraphBuilder::new(&params, DistanceKernel::new(Metric::Euclidean));
        let repair = builder.restore_connectivity(&mut graph, &read(&store));
        assert!(repair.linked + repair.promoted <= 2);
        assert!(graph.connectivity().is_connected());
        assert!(graph.committed_slots().all(|s| graph.degree(s) <= 8));
    }
}
