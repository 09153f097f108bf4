use std::collections::VecDeque;

use serde::Serialize;

use crate::storage::vectors::Slot;

const EMPTY: u32 = u32::MAX;

/// Read access to out-edges, shared by the global graph and the per-cluster
/// scratch graphs.
pub trait Neighborhood {
    fn neighbors(&self, node: u32) -> &[u32];
}

impl Neighborhood for [Vec<u32>] {
    fn neighbors(&self, node: u32) -> &[u32] {
        self.get(node as usize).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Result of walking the graph from its entry slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConnectivityReport {
    pub committed: usize,
    pub reachable: usize,
    pub entry_points: usize,
    /// Longest shortest path (in hops) from the entry set to a reachable slot.
    pub max_hops: usize,
}

impl ConnectivityReport {
    pub fn is_connected(&self) -> bool {
        self.reachable == self.committed
    }
}

/// Bounded-degree directed graph over store slots.
///
/// # Layout
/// The "flat link arena": slot `s` owns `links[s * R .. (s + 1) * R]`,
/// filled from the front and padded with `u32::MAX`. In-degrees are kept
/// alongside so eviction can avoid orphaning a slot.
pub struct ProximityGraph {
    max_degree: usize,
    links: Vec<u32>,
    in_degree: Vec<u32>,
    committed: Vec<bool>,
    committed_count: usize,
    entry_points: Vec<Slot>,
}

impl ProximityGraph {
    pub fn new(max_degree: usize) -> Self {
        Self {
            max_degree,
            links: Vec::new(),
            in_degree: Vec::new(),
            committed: Vec::new(),
            committed_count: 0,
            entry_points: Vec::new(),
        }
    }

    fn ensure_slot(&mut self, slot: Slot) {
        let needed = slot as usize + 1;
        if self.committed.len() < needed {
            self.links.resize(needed * self.max_degree, EMPTY);
            self.in_degree.resize(needed, 0);
            self.committed.resize(needed, false);
        }
    }

    #[inline(always)]
    fn offset(&self, slot: Slot) -> usize {
        slot as usize * self.max_degree
    }

    pub fn degree(&self, slot: Slot) -> usize {
        self.neighbors(slot).len()
    }

    pub fn in_degree(&self, slot: Slot) -> u32 {
        self.in_degree.get(slot as usize).copied().unwrap_or(0)
    }

    /// Replaces the out-edges of `slot`. Extra entries beyond R are dropped.
    pub fn set_neighbors(&mut self, slot: Slot, neighbors: &[Slot]) {
        self.ensure_slot(slot);
        for target in self.neighbors(slot).to_vec() {
            self.in_degree[target as usize] -= 1;
        }
        let offset = self.offset(slot);
        let mut written = 0;
        for &target in neighbors.iter() {
            if written == self.max_degree {
                break;
            }
            if target == slot || self.links[offset..offset + written].contains(&target) {
                continue;
            }
            self.ensure_slot(target);
            self.links[offset + written] = target;
            self.in_degree[target as usize] += 1;
            written += 1;
        }
        self.links[offset + written..offset + self.max_degree].fill(EMPTY);
    }

    /// Appends an edge if there is room. Returns false when full, when the
    /// edge already exists, or for a self-loop.
    pub fn push_neighbor(&mut self, slot: Slot, target: Slot) -> bool {
        if slot == target {
            return false;
        }
        self.ensure_slot(slot);
        self.ensure_slot(target);
        let offset = self.offset(slot);
        for i in 0..self.max_degree {
            let current = self.links[offset + i];
            if current == target {
                return false;
            }
            if current == EMPTY {
                self.links[offset + i] = target;
                self.in_degree[target as usize] += 1;
                return true;
            }
        }
        false
    }

    /// Swaps the edge `slot -> old` for `slot -> new`.
    pub fn replace_neighbor(&mut self, slot: Slot, old: Slot, new: Slot) -> bool {
        if slot == new || self.neighbors(slot).contains(&new) {
            return false;
        }
        self.ensure_slot(new);
        let offset = self.offset(slot);
        let degree = self.degree(slot);
        match self.links[offset..offset + degree].iter().position(|&t| t == old) {
            Some(i) => {
                self.links[offset + i] = new;
                self.in_degree[old as usize] -= 1;
                self.in_degree[new as usize] += 1;
                true
            }
            None => false,
        }
    }

    pub fn commit(&mut self, slot: Slot) {
        self.ensure_slot(slot);
        if !self.committed[slot as usize] {
            self.committed[slot as usize] = true;
            self.committed_count += 1;
        }
    }

    #[inline]
    pub fn is_committed(&self, slot: Slot) -> bool {
        self.committed.get(slot as usize).copied().unwrap_or(false)
    }

    pub fn committed_len(&self) -> usize {
        self.committed_count
    }

    pub fn is_empty(&self) -> bool {
        self.committed_count == 0
    }

    pub fn committed_slots(&self) -> impl Iterator<Item = Slot> + '_ {
        self.committed
            .iter()
            .enumerate()
            .filter_map(|(slot, &c)| c.then_some(slot as Slot))
    }

    pub fn entry_points(&self) -> &[Slot] {
        &self.entry_points
    }

    pub fn add_entry_point(&mut self, slot: Slot) -> bool {
        if self.entry_points.contains(&slot) {
            return false;
        }
        self.entry_points.push(slot);
        true
    }

    /// Unlinks `slot` entirely: clears its out-edges, withdraws it from the
    /// entry set and uncommits it. In-edges must already be gone.
    pub fn detach(&mut self, slot: Slot) {
        if (slot as usize) >= self.committed.len() {
            return;
        }
        self.set_neighbors(slot, &[]);
        self.entry_points.retain(|&e| e != slot);
        if self.committed[slot as usize] {
            self.committed[slot as usize] = false;
            self.committed_count -= 1;
        }
    }

    /// BFS hop counts from the entry set; `None` for unreachable slots.
    pub fn hops_from_entries(&self) -> Vec<Option<u32>> {
        let mut hops = vec![None; self.committed.len()];
        let mut queue = VecDeque::new();
        for &entry in &self.entry_points {
            if self.is_committed(entry) && hops[entry as usize].is_none() {
                hops[entry as usize] = Some(0);
                queue.push_back(entry);
            }
        }
        self.walk(&mut hops, &mut queue);
        hops
    }

    /// Continues a BFS after new roots were pushed onto `queue`.
    pub fn walk(&self, hops: &mut Vec<Option<u32>>, queue: &mut VecDeque<Slot>) {
        if hops.len() < self.committed.len() {
            hops.resize(self.committed.len(), None);
        }
        while let Some(slot) = queue.pop_front() {
            let depth = hops[slot as usize].unwrap_or(0);
            for &next in self.neighbors(slot) {
                if self.is_committed(next) && hops[next as usize].is_none() {
                    hops[next as usize] = Some(depth + 1);
                    queue.push_back(next);
                }
            }
        }
    }

    pub fn connectivity(&self) -> ConnectivityReport {
        let hops = self.hops_from_entries();
        let mut reachable = 0;
        let mut max_hops = 0;
        for h in hops.iter().flatten() {
            reachable += 1;
            max_hops = max_hops.max(*h as usize);
        }
        ConnectivityReport {
            committed: self.committed_count,
            reachable,
            entry_points: self.entry_points.len(),
            max_hops,
        }
    }
}

impl Neighborhood for ProximityGraph {
    fn neighbors(&self, slot: Slot) -> &[Slot] {
        let offset = self.offset(slot);
        if offset + self.max_degree > self.links.len() {
            return &[];
        }
        let slice = &self.links[offset..offset + self.max_degree];
        let mut count = 0;
        while count < self.max_degree && slice[count] != EMPTY {
            count += 1;
        }
        &slice[..count]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degree_bound_and_padding() {
        let mut graph = ProximityGraph::new(2);
        graph.set_neighbors(0, &[1, 2, 3]);
        assert_eq!(graph.neighbors(0), &[1, 2]);
        assert_eq!(graph.degree(0), 2);
        assert!(!graph.push_neighbor(0, 3));
        graph.set_neighbors(0, &[3]);
        assert_eq!(graph.neighbors(0), &[3]);
        assert_eq!(graph.in_degree(1), 0);
        assert_eq!(graph.in_degree(3), 1);
    }

    #[test]
    fn test_push_rejects_duplicates_and_self_loops() {
        let mut graph = ProximityGraph::new(4);
        assert!(graph.push_neighbor(0, 1));
        assert!(!graph.push_neighbor(0, 1));
        assert!(!graph.push_neighbor(0, 0));
        assert!(graph.replace_neighbor(0, 1, 2));
        assert_eq!(graph.neighbors(0), &[2]);
        assert_eq!(graph.in_degree(1), 0);
    }

    #[test]
    fn test_connectivity_counts_reachable() {
        let mut graph = ProximityGraph::new(4);
        for slot in 0..4 {
            graph.commit(slot);
        }
        graph.set_neighbors(0, &[1]);
        graph.set_neighbors(1, &[2]);
        graph.add_entry_point(0);
        let report = graph.connectivity();
        assert_eq!(report.committed, 4);
        assert_eq!(report.reachable, 3);
        assert_eq!(report.max_hops, 2);
        assert!(!report.is_connected());

        graph.add_entry_point(3);
        assert!(graph.connectivity().is_connected());
    }

    #[test]
    fn test_detach_uncommits() {
        let mut graph = ProximityGraph::new(4);
        graph.commit(0);
        graph.commit(1);
        graph.set_neighbors(1, &[0]);
        graph.add_entry_point(1);
        graph.detach(1);
        assert!(!graph.is_committed(1));
        assert!(graph.entry_points().is_empty());
        assert_eq!(graph.in_degree(0), 0);
        assert_eq!(graph.committed_len(), 1);
    }
}
