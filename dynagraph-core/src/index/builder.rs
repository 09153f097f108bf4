use std::collections::{HashSet, VecDeque};

use log::{debug, warn};

use crate::config::IndexParams;
use crate::index::distance::{Distance, DistanceKernel};
use crate::index::graph::{Neighborhood, ProximityGraph};
use crate::index::search::{beam_search, candidates_for, robust_prune, Candidate, VectorSource};
use crate::partition::Cluster;
use crate::storage::batch::Batch;
use crate::storage::vectors::{Slot, VectorStore};

/// Cluster rows addressed by their position in the cluster.
struct ClusterRows<'a> {
    batch: &'a Batch,
    members: &'a [usize],
}

impl VectorSource for ClusterRows<'_> {
    #[inline]
    fn vector(&self, node: u32) -> &[f32] {
        self.batch.row(self.members[node as usize])
    }
}

/// A cluster's graph before it is spliced into the global one. Node `i` is
/// `slots[i]`; node 0 is the medoid.
#[derive(Debug)]
pub struct LocalGraph {
    slots: Vec<Slot>,
    adjacency: Vec<Vec<u32>>,
}

impl LocalGraph {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn medoid(&self) -> Option<Slot> {
        self.slots.first().copied()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    pub bridge_edges: usize,
    pub back_edges: usize,
    pub promoted: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RepairReport {
    pub linked: usize,
    pub promoted: usize,
}

/// Batch construction: local Vamana-style graphs per cluster, spliced into
/// the global graph and re-linked member by member, followed by a
/// reachability repair.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    kernel: DistanceKernel,
    alpha: f32,
    list_size: usize,
    max_degree: usize,
    bridge_anchors: usize,
    bridge_degree: usize,
}

impl GraphBuilder {
    pub fn new(params: &IndexParams, kernel: DistanceKernel) -> Self {
        Self {
            kernel,
            alpha: params.alpha,
            list_size: params.search_list_size,
            max_degree: params.max_degree,
            bridge_anchors: params.bridge_anchors,
            // Anchors keep at least half their degree for local edges.
            bridge_degree: params.bridge_degree.min(params.max_degree / 2).max(1),
        }
    }

    /// Builds the proximity graph of one cluster in isolation.
    ///
    /// # Logic
    /// Members are inserted in centroid order starting from the medoid. Each
    /// one beam-searches the partial graph from the medoid, keeps a pruned
    /// neighbor list, and is added as a reverse edge to those neighbors
    /// (re-pruning any list that overflows R).
    pub fn build_cluster(&self, batch: &Batch, cluster: &Cluster) -> LocalGraph {
        let rows = ClusterRows { batch, members: &cluster.members };
        let n = cluster.len();
        let mut adjacency: Vec<Vec<u32>> = vec![Vec::new(); n];

        for node in 1..n as u32 {
            let result = beam_search(
                adjacency.as_slice(),
                &rows,
                &self.kernel,
                rows.vector(node),
                &[0],
                self.list_size,
            );
            let neighbors = robust_prune(node, &result.prune_pool(), &rows, &self.kernel, self.alpha, self.max_degree);
            for &peer in &neighbors {
                let list = &mut adjacency[peer as usize];
                if list.contains(&node) {
                    continue;
                }
                list.push(node);
                if list.len() > self.max_degree {
                    let pool = candidates_for(peer, list, &rows, &self.kernel);
                    adjacency[peer as usize] =
                        robust_prune(peer, &pool, &rows, &self.kernel, self.alpha, self.max_degree);
                }
            }
            adjacency[node as usize] = neighbors;
        }

        LocalGraph {
            slots: cluster.members.iter().map(|&row| batch.slot(row)).collect(),
            adjacency,
        }
    }

    /// Splices `local` into `graph`.
    ///
    /// # Logic
    /// 1. On a non-empty graph the first `bridge_anchors` members search the
    ///    global graph *before* the splice and keep edges to their nearest
    ///    `bridge_degree` global slots, with back-edges from those slots.
    /// 2. The local edges are written and the slots committed. The first
    ///    cluster into an empty graph registers its medoid as entry point.
    /// 3. Every member then searches the spliced graph from the entry set
    ///    and its own medoid, re-prunes its list over what it found plus its
    ///    local edges, and asks each kept neighbor for a reverse edge.
    ///    Afterwards a greedy walk through older slots can enter the cluster
    ///    at any member, not only at the anchors.
    /// 4. If no slot outside the cluster ended up pointing into it, the
    ///    medoid becomes an entry point.
    pub fn merge(&self, graph: &mut ProximityGraph, store: &VectorStore, local: LocalGraph) -> MergeReport {
        let mut report = MergeReport::default();
        let Some(medoid) = local.medoid() else {
            return report;
        };

        let was_empty = graph.is_empty();
        let bridges: Vec<Vec<Candidate>> = if was_empty {
            Vec::new()
        } else {
            let entries = graph.entry_points().to_vec();
            local
                .slots
                .iter()
                .take(self.bridge_anchors)
                .map(|&anchor| {
                    beam_search(&*graph, store, &self.kernel, store.get(anchor), &entries, self.list_size)
                        .nearest
                        .into_iter()
                        .filter(|c| graph.is_committed(c.node) && store.id_of(c.node).is_some())
                        .take(self.bridge_degree)
                        .collect()
                })
                .collect()
        };

        for &slot in &local.slots {
            graph.commit(slot);
        }
        for (i, neighbors) in local.adjacency.iter().enumerate() {
            let mut out: Vec<Slot> = neighbors.iter().map(|&j| local.slots[j as usize]).collect();
            if let Some(targets) = bridges.get(i) {
                out.truncate(self.max_degree.saturating_sub(targets.len()));
                out.extend(targets.iter().map(|c| c.node));
                report.bridge_edges += targets.len();
            }
            graph.set_neighbors(local.slots[i], &out);
        }

        if was_empty {
            graph.add_entry_point(medoid);
        } else {
            for (i, targets) in bridges.iter().enumerate() {
                for target in targets {
                    if attach_edge(graph, store, &self.kernel, target.node, local.slots[i]) {
                        report.back_edges += 1;
                    }
                }
            }
        }

        let members: HashSet<Slot> = local.slots.iter().copied().collect();
        let mut entries = graph.entry_points().to_vec();
        if !entries.contains(&medoid) {
            entries.push(medoid);
        }
        for &slot in &local.slots {
            let crossed = self.refine(graph, store, slot, &entries, &members);
            report.bridge_edges += crossed.0;
            report.back_edges += crossed.1;
        }

        if !was_empty && report.back_edges == 0 {
            warn!("No bridge back-edge landed for cluster of {}; promoting medoid {}", local.len(), medoid);
            report.promoted = graph.add_entry_point(medoid);
        }
        report
    }

    /// Re-links one freshly spliced slot against the whole graph. Returns
    /// the out-edges and newly landed reverse edges that cross the boundary
    /// of `members`.
    fn refine(
        &self,
        graph: &mut ProximityGraph,
        store: &VectorStore,
        slot: Slot,
        entries: &[Slot],
        members: &HashSet<Slot>,
    ) -> (usize, usize) {
        let mut pool = beam_search(&*graph, store, &self.kernel, store.get(slot), entries, self.list_size).prune_pool();
        pool.extend(candidates_for(slot, graph.neighbors(slot), store, &self.kernel));
        let neighbors: Vec<Slot> = robust_prune(slot, &pool, store, &self.kernel, self.alpha, self.max_degree)
            .into_iter()
            .filter(|&n| graph.is_committed(n))
            .collect();
        graph.set_neighbors(slot, &neighbors);

        let mut outward = 0;
        let mut inward = 0;
        for &n in &neighbors {
            let outside = !members.contains(&n);
            if outside {
                outward += 1;
            }
            let existed = graph.neighbors(n).contains(&slot);
            if attach_edge(graph, store, &self.kernel, n, slot) && outside && !existed {
                inward += 1;
            }
        }
        (outward, inward)
    }

    /// Re-establishes reachability of every committed slot from the entry set.
    ///
    /// # Logic
    /// BFS from the entry points; each slot left unmarked is linked from its
    /// nearest reachable slot (found by beam search), or promoted to an entry
    /// point when no candidate accepts the edge. A final BFS promotes anything
    /// an eviction along the way cut off.
    pub fn restore_connectivity(&self, graph: &mut ProximityGraph, store: &VectorStore) -> RepairReport {
        let mut report = RepairReport::default();
        if graph.is_empty() {
            return report;
        }
        if graph.entry_points().iter().all(|&e| !graph.is_committed(e)) {
            let first = graph.committed_slots().next();
            if let Some(first) = first {
                graph.add_entry_point(first);
                report.promoted += 1;
            }
        }

        let mut hops = graph.hops_from_entries();
        let unreachable: Vec<Slot> = graph
            .committed_slots()
            .filter(|&s| hops[s as usize].is_none())
            .collect();
        if unreachable.is_empty() {
            return report;
        }
        warn!("{} committed slots unreachable from entry points; repairing", unreachable.len());

        let mut queue = VecDeque::new();
        for slot in unreachable {
            if hops[slot as usize].is_some() {
                continue;
            }
            let entries = graph.entry_points().to_vec();
            let result = beam_search(&*graph, store, &self.kernel, store.get(slot), &entries, self.list_size);
            let mut anchor = None;
            for c in result.nearest.iter().filter(|c| c.node != slot).take(self.bridge_degree.max(4)) {
                let Some(depth) = hops.get(c.node as usize).copied().flatten() else {
                    continue;
                };
                if attach_edge(graph, store, &self.kernel, c.node, slot) {
                    anchor = Some(depth + 1);
                    break;
                }
            }
            match anchor {
                Some(depth) => {
                    hops[slot as usize] = Some(depth);
                    report.linked += 1;
                }
                None => {
                    graph.add_entry_point(slot);
                    hops[slot as usize] = Some(0);
                    report.promoted += 1;
                }
            }
            queue.push_back(slot);
            graph.walk(&mut hops, &mut queue);
        }

        // Evictions above may have cut off slots that were marked earlier.
        let mut hops = graph.hops_from_entries();
        let stranded: Vec<Slot> = graph
            .committed_slots()
            .filter(|&s| hops[s as usize].is_none())
            .collect();
        for slot in stranded {
            if hops[slot as usize].is_some() {
                continue;
            }
            graph.add_entry_point(slot);
            report.promoted += 1;
            hops[slot as usize] = Some(0);
            queue.push_back(slot);
            graph.walk(&mut hops, &mut queue);
        }
        debug!("Connectivity repair: {} linked, {} promoted", report.linked, report.promoted);
        report
    }
}

/// Adds `from -> to`, evicting `from`'s farthest edge when it is full.
///
/// Only an edge farther than `to` whose target keeps another in-edge may be
/// evicted. Returns true if the edge exists afterwards.
pub(crate) fn attach_edge(
    graph: &mut ProximityGraph,
    store: &VectorStore,
    kernel: &DistanceKernel,
    from: Slot,
    to: Slot,
) -> bool {
    if from == to {
        return false;
    }
    if graph.neighbors(from).contains(&to) || graph.push_neighbor(from, to) {
        return true;
    }
    let base = store.get(from);
    let incoming = kernel.distance(base, store.get(to));
    let mut weakest: Option<(f32, Slot)> = None;
    for &edge in graph.neighbors(from) {
        if graph.in_degree(edge) <= 1 {
            continue;
        }
        let d = kernel.distance(base, store.get(edge));
        if d > incoming && weakest.map_or(true, |(w, _)| d > w) {
            weakest = Some((d, edge));
        }
    }
    match weakest {
        Some((_, edge)) => graph.replace_neighbor(from, edge, to),
        None => false,
    }
}
