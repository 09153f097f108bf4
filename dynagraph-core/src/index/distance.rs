use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::index::simd::{self, SimdFunc};

/// The closed set of distance functions an index can be set up with.
/// Smaller is always closer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Squared L2.
    Euclidean,
    /// `1 - cos(a, b)`; zero-norm vectors are at distance 1.
    Cosine,
    /// Negated dot product (maximum inner product search).
    InnerProduct,
}

impl FromStr for Metric {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            "angular" | "cosine" => Ok(Metric::Cosine),
            "ip" | "mips" | "inner_product" => Ok(Metric::InnerProduct),
            other => Err(IndexError::InvalidConfig(format!("unknown metric '{}'", other))),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::Euclidean => "euclidean",
            Metric::Cosine => "cosine",
            Metric::InnerProduct => "inner_product",
        };
        f.write_str(name)
    }
}

const COSINE_EPSILON: f32 = 1e-6;

/// Capability every graph routine computes distances through.
pub trait Distance: Send + Sync {
    fn distance(&self, a: &[f32], b: &[f32]) -> f32;
}

/// A metric bound to the SIMD kernels detected at setup time.
#[derive(Clone, Copy)]
pub struct DistanceKernel {
    metric: Metric,
    dot: SimdFunc,
    l2: SimdFunc,
}

impl DistanceKernel {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            dot: simd::get_dot_kernel(),
            l2: simd::get_l2_kernel(),
        }
    }

    #[inline]
    fn run(&self, kernel: SimdFunc, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        let n = a.len().min(b.len());
        // SAFETY: both slices are valid for `n` reads and the kernel was
        // selected for the features this CPU reports.
        unsafe { kernel(a.as_ptr(), b.as_ptr(), n) }
    }
}

impl Distance for DistanceKernel {
    #[inline]
    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.metric {
            Metric::Euclidean => self.run(self.l2, a, b),
            Metric::InnerProduct => -self.run(self.dot, a, b),
            Metric::Cosine => {
                let dot = self.run(self.dot, a, b);
                let norm_a = self.run(self.dot, a, a).sqrt();
                let norm_b = self.run(self.dot, b, b).sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    return 1.0;
                }
                // Rounding leaves identical directions a few ulps off zero.
                let d = 1.0 - dot / (norm_a * norm_b);
                if d < COSINE_EPSILON {
                    0.0
                } else {
                    d
                }
            }
        }
    }
}

impl fmt::Debug for DistanceKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistanceKernel").field("metric", &self.metric).finish()
    }
}
