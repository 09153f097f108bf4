use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use crate::index::distance::Distance;
use crate::index::graph::Neighborhood;
use crate::storage::batch::Batch;
use crate::storage::vectors::VectorStore;

/// Lookup of a node's vector by the same index the graph uses.
pub trait VectorSource {
    fn vector(&self, node: u32) -> &[f32];
}

impl VectorSource for VectorStore {
    #[inline]
    fn vector(&self, slot: u32) -> &[f32] {
        self.get(slot)
    }
}

impl VectorSource for Batch {
    #[inline]
    fn vector(&self, row: u32) -> &[f32] {
        self.row(row as usize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub distance: f32,
    pub node: u32,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Ties on distance fall back to the node index so results are deterministic.
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.node.cmp(&other.node))
    }
}

// Wrapper for Min-Heap (BinaryHeap pops largest, so reverse comparisons)
#[derive(PartialEq, Eq)]
struct MinCandidate(Candidate);
impl PartialOrd for MinCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for MinCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.cmp(&self.0)
    }
}

/// Output of one beam search.
#[derive(Debug, Default)]
pub struct BeamResult {
    /// The closest `list_size` nodes seen, ascending.
    pub nearest: Vec<Candidate>,
    /// Every node whose neighbors were expanded, in expansion order.
    pub expanded: Vec<Candidate>,
}

impl BeamResult {
    /// Nearest and expanded nodes merged without duplicates; the pool robust
    /// prune selects from.
    pub fn prune_pool(&self) -> Vec<Candidate> {
        let mut seen = HashSet::with_capacity(self.nearest.len() + self.expanded.len());
        let mut pool = Vec::with_capacity(self.nearest.len() + self.expanded.len());
        for c in self.nearest.iter().chain(self.expanded.iter()) {
            if seen.insert(c.node) {
                pool.push(*c);
            }
        }
        pool
    }
}

/// Greedy best-first search bounded by `list_size`.
///
/// # Logic
/// Seeds the frontier with every entry node, then repeatedly expands the
/// closest unexpanded candidate until it is farther than the worst of the
/// `list_size` best results. Nodes are never expanded twice.
pub fn beam_search<G, V, D>(
    graph: &G,
    vectors: &V,
    metric: &D,
    query: &[f32],
    entries: &[u32],
    list_size: usize,
) -> BeamResult
where
    G: Neighborhood + ?Sized,
    V: VectorSource + ?Sized,
    D: Distance + ?Sized,
{
    let list_size = list_size.max(1);
    let mut visited = HashSet::new();
    let mut frontier = BinaryHeap::new();
    let mut results: BinaryHeap<Candidate> = BinaryHeap::new();
    let mut expanded = Vec::new();

    for &entry in entries {
        if !visited.insert(entry) {
            continue;
        }
        let c = Candidate { distance: metric.distance(query, vectors.vector(entry)), node: entry };
        frontier.push(MinCandidate(c));
        results.push(c);
        if results.len() > list_size {
            results.pop();
        }
    }

    while let Some(MinCandidate(top)) = frontier.pop() {
        if let Some(worst) = results.peek() {
            if top.distance > worst.distance && results.len() >= list_size {
                break;
            }
        }
        expanded.push(top);
        for &next in graph.neighbors(top.node) {
            if !visited.insert(next) {
                continue;
            }
            let d = metric.distance(query, vectors.vector(next));
            let admit = match results.peek() {
                Some(worst) => results.len() < list_size || d < worst.distance,
                None => true,
            };
            if admit {
                let c = Candidate { distance: d, node: next };
                frontier.push(MinCandidate(c));
                results.push(c);
                if results.len() > list_size {
                    results.pop();
                }
            }
        }
    }

    BeamResult { nearest: results.into_sorted_vec(), expanded }
}

/// Alpha-robust pruning: keeps at most `max_degree` of `candidates` for `node`.
///
/// # Logic
/// Walks candidates by ascending distance to `node`. Each kept neighbor `k`
/// removes every remaining `c` with `alpha * d(k, c) <= d(node, c)`. Larger
/// alpha removes fewer candidates and keeps more long-range edges.
pub fn robust_prune<V, D>(
    node: u32,
    candidates: &[Candidate],
    vectors: &V,
    metric: &D,
    alpha: f32,
    max_degree: usize,
) -> Vec<u32>
where
    V: VectorSource + ?Sized,
    D: Distance + ?Sized,
{
    let mut pool: Vec<Candidate> = candidates.iter().filter(|c| c.node != node).copied().collect();
    pool.sort();
    pool.dedup_by_key(|c| c.node);

    let mut kept: Vec<u32> = Vec::with_capacity(max_degree);
    let mut alive = vec![true; pool.len()];
    for i in 0..pool.len() {
        if kept.len() >= max_degree {
            break;
        }
        if !alive[i] {
            continue;
        }
        let chosen = pool[i];
        kept.push(chosen.node);
        let chosen_vec = vectors.vector(chosen.node);
        for j in (i + 1)..pool.len() {
            if alive[j] && occludes(alpha, metric.distance(chosen_vec, vectors.vector(pool[j].node)), pool[j].distance) {
                alive[j] = false;
            }
        }
    }
    kept
}

// Negative distances (inner product) are scaled towards zero so alpha keeps
// loosening the rule instead of tightening it.
#[inline]
fn occludes(alpha: f32, between: f32, to_node: f32) -> bool {
    let scaled = if between >= 0.0 { alpha * between } else { between / alpha };
    scaled <= to_node
}

/// Distances from `node` to `targets`, as prune candidates.
pub fn candidates_for<V, D>(node: u32, targets: &[u32], vectors: &V, metric: &D) -> Vec<Candidate>
where
    V: VectorSource + ?Sized,
    D: Distance + ?Sized,
{
    let base = vectors.vector(node);
    targets
        .iter()
        .map(|&t| Candidate { distance: metric.distance(base, vectors.vector(t)), node: t })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::distance::{DistanceKernel, Metric};

    fn line(n: usize) -> Batch {
        let rows: Vec<Vec<f32>> = (0..n).map(|i| vec![i as f32, 0.0]).collect();
        Batch::from_rows(2, &rows)
    }

    #[test]
    fn test_beam_search_walks_chain() {
        let batch = line(6);
        let adjacency: Vec<Vec<u32>> = (0..6u32).map(|i| if i < 5 { vec![i + 1] } else { vec![] }).collect();
        let kernel = DistanceKernel::new(Metric::Euclidean);
        let result = beam_search(adjacency.as_slice(), &batch, &kernel, &[5.0, 0.0], &[0], 3);
        let nodes: Vec<u32> = result.nearest.iter().map(|c| c.node).collect();
        assert_eq!(nodes, vec![5, 4, 3]);
        assert_eq!(result.nearest[0].distance, 0.0);
        assert!(result.expanded.len() >= 5);
    }

    #[test]
    fn test_multiple_entries_deduplicated() {
        let batch = line(3);
        let adjacency: Vec<Vec<u32>> = vec![vec![], vec![], vec![]];
        let kernel = DistanceKernel::new(Metric::Euclidean);
        let result = beam_search(adjacency.as_slice(), &batch, &kernel, &[2.0, 0.0], &[0, 2, 2], 10);
        let nodes: Vec<u32> = result.nearest.iter().map(|c| c.node).collect();
        assert_eq!(nodes, vec![2, 0]);
    }

    #[test]
    fn test_prune_drops_occluded_candidates() {
        // 1 sits between 0 and 2 on a line, so 2 is reachable through 1.
        let batch = line(3);
        let kernel = DistanceKernel::new(Metric::Euclidean);
        let pool = candidates_for(0, &[1, 2], &batch, &kernel);
        assert_eq!(robust_prune(0, &pool, &batch, &kernel, 1.0, 8), vec![1]);
    }

    #[test]
    fn test_prune_respects_max_degree_and_self() {
        let rows = vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, 0.0], vec![0.0, -1.0]];
        let batch = Batch::from_rows(2, &rows);
        let kernel = DistanceKernel::new(Metric::Euclidean);
        let pool = candidates_for(0, &[0, 1, 2, 3, 4], &batch, &kernel);
        let kept = robust_prune(0, &pool, &batch, &kernel, 1.2, 4);
        assert_eq!(kept.len(), 4);
        assert!(!kept.contains(&0));
        assert_eq!(robust_prune(0, &pool, &batch, &kernel, 1.2, 2).len(), 2);
    }
}
