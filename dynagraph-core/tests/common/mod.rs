//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use dynagraph_core::{DynaGraphIndex, ElementType, IndexConfig, IndexParams, Metric};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Row-major points scattered around `centers` random centers, so graph
/// search has real neighborhoods to follow.
pub fn mixture(n: usize, dim: usize, centers: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let centroids: Vec<Vec<f32>> = (0..centers.max(1))
        .map(|_| (0..dim).map(|_| rng.gen_range(-10.0..10.0)).collect())
        .collect();
    let mut data = Vec::with_capacity(n * dim);
    for _ in 0..n {
        let c = &centroids[rng.gen_range(0..centroids.len())];
        data.extend(c.iter().map(|&x| x + rng.gen_range(-1.0f32..1.0)));
    }
    data
}

/// Row-major points drawn uniformly from `[-1, 1]^dim`.
pub fn uniform(n: usize, dim: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n * dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

pub fn row(data: &[f32], dim: usize, i: usize) -> &[f32] {
    &data[i * dim..(i + 1) * dim]
}

/// Parameters small enough for quick tests while staying navigable.
pub fn test_params(batch_size: usize) -> IndexParams {
    IndexParams {
        alpha: 1.2,
        search_list_size: 64,
        max_degree: 24,
        batch_size,
        insert_thread_count: 4,
        search_thread_count: 4,
        cluster_granularity: 100,
        ..IndexParams::default()
    }
}

pub fn index_with(params: IndexParams, max_points: usize, dim: usize) -> DynaGraphIndex {
    let config = IndexConfig::new(ElementType::Float32, max_points, dim)
        .with_metric(Metric::Euclidean)
        .with_params(params);
    DynaGraphIndex::setup(config).unwrap()
}

/// Fraction of `samples` whose own vector comes back as top-1 at distance 0.
pub fn self_recall(index: &DynaGraphIndex, data: &[f32], dim: usize, samples: &[usize]) -> f64 {
    let hits = samples
        .iter()
        .filter(|&&i| {
            let result = index.query(row(data, dim, i), 1).unwrap();
            result[0].id == i as u64 && result[0].distance == 0.0
        })
        .count();
    hits as f64 / samples.len().max(1) as f64
}
