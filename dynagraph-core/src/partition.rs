//! Spatial partitioning of a flush into clusters.
//!
//! Clusters are built into local graphs independently, so the partitioner
//! only has to produce compact groups; it always works in squared L2 since
//! k-means centroids are L2 means.

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::IndexParams;
use crate::index::distance::{Distance, DistanceKernel, Metric};
use crate::storage::batch::Batch;

/// A group of batch rows around a centroid.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub centroid: Vec<f32>,
    /// Batch rows ordered by distance to the centroid. `members[0]` is the
    /// medoid and the first bridge anchor.
    pub members: Vec<usize>,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

pub struct ClusterPartitioner {
    params: IndexParams,
    l2: DistanceKernel,
}

impl ClusterPartitioner {
    pub fn new(params: &IndexParams) -> Self {
        Self {
            params: params.clone(),
            l2: DistanceKernel::new(Metric::Euclidean),
        }
    }

    /// Splits `batch` into non-empty clusters; `seed` drives k-means++.
    ///
    /// A batch with fewer rows than the target cluster count collapses into
    /// a single cluster.
    pub fn partition(&self, batch: &Batch, seed: u64) -> Vec<Cluster> {
        if batch.is_empty() {
            return Vec::new();
        }
        let k = self.params.cluster_count(batch.len());
        let mut centroids = if batch.len() < k {
            vec![self.mean(batch, 0..batch.len())]
        } else {
            let mut rng = StdRng::seed_from_u64(seed);
            self.seed_centroids(batch, k, &mut rng)
        };

        let mut assignments = self.assign(batch, &centroids);
        for _ in 0..self.params.kmeans_iterations {
            let refined = self.update_centroids(batch, &assignments, &centroids);
            let next = self.assign(batch, &refined);
            centroids = refined;
            if next == assignments {
                break;
            }
            assignments = next;
        }

        let clusters = self.collect(batch, centroids, &assignments);
        debug!(
            "Partitioned {} points into {} clusters (target {})",
            batch.len(),
            clusters.len(),
            k
        );
        clusters
    }

    /// k-means++: each further centroid is drawn with probability
    /// proportional to its distance from the nearest chosen one.
    fn seed_centroids(&self, batch: &Batch, k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
        let n = batch.len();
        let mut centroids = vec![batch.row(rng.gen_range(0..n)).to_vec()];
        let mut nearest: Vec<f32> = (0..n)
            .map(|i| self.l2.distance(batch.row(i), &centroids[0]))
            .collect();

        while centroids.len() < k {
            let total: f64 = nearest.iter().map(|&d| d.max(0.0) as f64).sum();
            let pick = if total <= 0.0 {
                // Every point coincides with a centroid already.
                rng.gen_range(0..n)
            } else {
                let threshold = rng.gen::<f64>() * total;
                let mut cumulative = 0.0;
                let mut chosen = n - 1;
                for (i, &d) in nearest.iter().enumerate() {
                    cumulative += d.max(0.0) as f64;
                    if cumulative >= threshold {
                        chosen = i;
                        break;
                    }
                }
                chosen
            };
            let centroid = batch.row(pick).to_vec();
            for (i, best) in nearest.iter_mut().enumerate() {
                *best = best.min(self.l2.distance(batch.row(i), &centroid));
            }
            centroids.push(centroid);
        }
        centroids
    }

    fn assign(&self, batch: &Batch, centroids: &[Vec<f32>]) -> Vec<usize> {
        (0..batch.len())
            .map(|i| {
                let row = batch.row(i);
                let mut best = 0;
                let mut best_dist = f32::INFINITY;
                for (c, centroid) in centroids.iter().enumerate() {
                    let d = self.l2.distance(row, centroid);
                    if d < best_dist {
                        best_dist = d;
                        best = c;
                    }
                }
                best
            })
            .collect()
    }

    fn update_centroids(&self, batch: &Batch, assignments: &[usize], previous: &[Vec<f32>]) -> Vec<Vec<f32>> {
        let dim = batch.dimension();
        let mut sums = vec![vec![0.0f32; dim]; previous.len()];
        let mut counts = vec![0usize; previous.len()];
        for (i, &c) in assignments.iter().enumerate() {
            counts[c] += 1;
            for (s, &v) in sums[c].iter_mut().zip(batch.row(i)) {
                *s += v;
            }
        }
        sums.into_iter()
            .zip(counts)
            .zip(previous)
            .map(|((sum, count), old)| {
                if count == 0 {
                    old.clone()
                } else {
                    sum.into_iter().map(|s| s / count as f32).collect()
                }
            })
            .collect()
    }

    fn mean(&self, batch: &Batch, rows: std::ops::Range<usize>) -> Vec<f32> {
        let mut sum = vec![0.0f32; batch.dimension()];
        let count = rows.len().max(1) as f32;
        for i in rows {
            for (s, &v) in sum.iter_mut().zip(batch.row(i)) {
                *s += v;
            }
        }
        sum.iter_mut().for_each(|s| *s /= count);
        sum
    }

    fn collect(&self, batch: &Batch, centroids: Vec<Vec<f32>>, assignments: &[usize]) -> Vec<Cluster> {
        let mut members: Vec<Vec<(f32, usize)>> = vec![Vec::new(); centroids.len()];
        for (i, &c) in assignments.iter().enumerate() {
            members[c].push((self.l2.distance(batch.row(i), &centroids[c]), i));
        }
        centroids
            .into_iter()
            .zip(members)
            .filter(|(_, m)| !m.is_empty())
            .map(|(centroid, mut m)| {
                m.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
                Cluster {
                    centroid,
                    members: m.into_iter().map(|(_, i)| i).collect(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs(per_blob: usize) -> Batch {
        let mut rows = Vec::new();
        for center in [0.0f32, 100.0, -100.0] {
            for i in 0..per_blob {
                rows.push(vec![center + (i % 7) as f32 * 0.1, center - (i % 5) as f32 * 0.1]);
            }
        }
        Batch::from_rows(2, &rows)
    }

    fn partitioner(granularity: usize, minimum: usize) -> ClusterPartitioner {
        ClusterPartitioner::new(&IndexParams {
            cluster_granularity: granularity,
            minimum_clusters: minimum,
            ..IndexParams::default()
        })
    }

    #[test]
    fn test_every_row_assigned_once() {
        let batch = blobs(40);
        let clusters = partitioner(40, 2).partition(&batch, 7);
        let mut seen: Vec<usize> = clusters.iter().flat_map(|c| c.members.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..batch.len()).collect::<Vec<_>>());
        assert!(clusters.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn test_members_sorted_by_centroid_distance() {
        let batch = blobs(30);
        let l2 = DistanceKernel::new(Metric::Euclidean);
        for cluster in partitioner(30, 3).partition(&batch, 1) {
            let d: Vec<f32> = cluster.members.iter().map(|&m| l2.distance(batch.row(m), &cluster.centroid)).collect();
            assert!(d.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_separated_blobs_do_not_mix() {
        let batch = blobs(50);
        let clusters = partitioner(50, 3).partition(&batch, 42);
        for cluster in clusters {
            let blob = cluster.members[0] / 50;
            assert!(cluster.members.iter().all(|&m| m / 50 == blob));
        }
    }

    #[test]
    fn test_tiny_batch_is_one_cluster() {
        let batch = Batch::from_rows(2, &[vec![1.0, 1.0]]);
        let clusters = partitioner(500, 2).partition(&batch, 0);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members, vec![0]);
        assert!(partitioner(500, 2).partition(&Batch::from_rows(2, &[]), 0).is_empty());
    }

    #[test]
    fn test_seeded_partition_is_deterministic() {
        let batch = blobs(20);
        let a = partitioner(10, 2).partition(&batch, 99);
        let b = partitioner(10, 2).partition(&batch, 99);
        let members = |cs: &[Cluster]| cs.iter().map(|c| c.members.clone()).collect::<Vec<_>>();
        assert_eq!(members(&a), members(&b));
    }
}
