use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::index::distance::Metric;

/// Element type of the vectors handed to `insert`. Everything is widened to
/// `f32` on the way into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Float32,
    Uint8,
    Int8,
}

impl FromStr for ElementType {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "float32" | "f32" => Ok(ElementType::Float32),
            "uint8" | "u8" => Ok(ElementType::Uint8),
            "int8" | "i8" => Ok(ElementType::Int8),
            other => Err(IndexError::InvalidConfig(format!("unknown element type '{}'", other))),
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::Float32 => "float32",
            ElementType::Uint8 => "uint8",
            ElementType::Int8 => "int8",
        };
        f.write_str(name)
    }
}

/// Scalar types accepted by `DynaGraphIndex::insert`.
pub trait Element: Copy + Into<f32> + Send + Sync {
    const TYPE: ElementType;
}

impl Element for f32 {
    const TYPE: ElementType = ElementType::Float32;
}

impl Element for u8 {
    const TYPE: ElementType = ElementType::Uint8;
}

impl Element for i8 {
    const TYPE: ElementType = ElementType::Int8;
}

/// Tuning knobs. Field names follow the benchmark adapter's parameter
/// dictionary (`coef_L`, `coef_R`, ...) so a JSON blob deserializes as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexParams {
    /// Pruning factor; a candidate is dropped when a kept neighbor is
    /// within `distance / alpha` of it.
    pub alpha: f32,
    /// Beam-search candidate list size.
    #[serde(rename = "coef_L", alias = "L")]
    pub search_list_size: usize,
    /// Maximum out-degree.
    #[serde(rename = "coef_R", alias = "R")]
    pub max_degree: usize,
    /// IngestBuffer capacity and flush threshold.
    pub batch_size: usize,
    /// Insert worker count; 0 means one per CPU.
    pub insert_thread_count: usize,
    /// Search worker count; 0 means one per CPU.
    pub search_thread_count: usize,
    /// Points per cluster the partitioner aims for.
    pub cluster_granularity: usize,
    /// Lower bound on clusters per flush.
    pub minimum_clusters: usize,
    /// Centroid-nearest members of each cluster that get bridge edges.
    pub bridge_anchors: usize,
    /// Global neighbors each anchor links to.
    pub bridge_degree: usize,
    /// Flushes smaller than this go through the point-at-a-time inserter.
    pub incremental_threshold: usize,
    /// Lloyd iterations after k-means++ seeding.
    pub kmeans_iterations: usize,
    /// Reinserting a live id replaces it instead of failing with `DuplicateId`.
    pub update_on_reinsert: bool,
    /// Fraction of dead resident slots above which compaction is advised.
    pub compaction_threshold: f32,
    pub seed: u64,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            alpha: 1.2,
            search_list_size: 100,
            max_degree: 64,
            batch_size: 1000,
            insert_thread_count: 0,
            search_thread_count: 0,
            cluster_granularity: 500,
            minimum_clusters: 2,
            bridge_anchors: 16,
            bridge_degree: 4,
            incremental_threshold: 64,
            kmeans_iterations: 8,
            update_on_reinsert: false,
            compaction_threshold: 0.1,
            seed: 0x5eed,
        }
    }
}

impl IndexParams {
    /// Number of clusters a flush of `batch_len` points is partitioned into:
    /// `max(batch_len / cluster_granularity, minimum_clusters)`.
    ///
    /// A smaller granularity means cheaper per-cluster construction but more
    /// cluster seams for the bridge step to stitch together.
    pub fn cluster_count(&self, batch_len: usize) -> usize {
        (batch_len / self.cluster_granularity.max(1)).max(self.minimum_clusters).max(1)
    }

    pub fn insert_workers(&self) -> usize {
        resolve_workers(self.insert_thread_count)
    }

    pub fn search_workers(&self) -> usize {
        resolve_workers(self.search_thread_count)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.alpha.is_finite() || self.alpha < 1.0 {
            return Err(invalid(format!("alpha must be >= 1.0, got {}", self.alpha)));
        }
        if self.max_degree == 0 {
            return Err(invalid("R must be positive".to_string()));
        }
        if self.search_list_size == 0 {
            return Err(invalid("L must be positive".to_string()));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be positive".to_string()));
        }
        if self.cluster_granularity == 0 {
            return Err(invalid("cluster_granularity must be positive".to_string()));
        }
        if self.bridge_degree == 0 || self.bridge_anchors == 0 {
            return Err(invalid("bridge_anchors and bridge_degree must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.compaction_threshold) {
            return Err(invalid(format!(
                "compaction_threshold must be within [0, 1], got {}",
                self.compaction_threshold
            )));
        }
        Ok(())
    }
}

fn resolve_workers(requested: usize) -> usize {
    if requested == 0 {
        num_cpus::get().max(1)
    } else {
        requested
    }
}

fn invalid(msg: String) -> IndexError {
    IndexError::InvalidConfig(msg)
}

/// Everything `setup` needs: the fixed shape of the index plus its tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub element_type: ElementType,
    pub metric: Metric,
    pub max_points: usize,
    pub dimension: usize,
    #[serde(default)]
    pub params: IndexParams,
}

impl IndexConfig {
    pub fn new(element_type: ElementType, max_points: usize, dimension: usize) -> Self {
        Self {
            element_type,
            metric: Metric::Euclidean,
            max_points,
            dimension,
            params: IndexParams::default(),
        }
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_params(mut self, params: IndexParams) -> Self {
        self.params = params;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(invalid("dimension must be positive".to_string()));
        }
        if self.max_points == 0 || self.max_points >= u32::MAX as usize {
            return Err(invalid(format!("max_points must be in 1..{}, got {}", u32::MAX, self.max_points)));
        }
        self.params.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_count_heuristic() {
        let params = IndexParams::default();
        assert_eq!(params.cluster_count(500), 2);
        assert_eq!(params.cluster_count(1000), 2);
        assert_eq!(params.cluster_count(1500), 3);
        assert_eq!(params.cluster_count(2000), 4);
        assert_eq!(params.cluster_count(2500), 5);
        assert_eq!(params.cluster_count(10), 2);
    }

    #[test]
    fn test_params_from_adapter_json() {
        let params: IndexParams = serde_json::from_str(
            r#"{"alpha": 1.2, "coef_L": 30, "coef_R": 12, "batch_size": 500, "insert_thread_count": 4}"#,
        )
        .unwrap();
        assert_eq!(params.search_list_size, 30);
        assert_eq!(params.max_degree, 12);
        assert_eq!(params.batch_size, 500);
        assert_eq!(params.insert_workers(), 4);
        assert_eq!(params.bridge_degree, IndexParams::default().bridge_degree);
    }

    #[test]
    fn test_validate_rejects_bad_alpha() {
        let params = IndexParams { alpha: 0.5, ..IndexParams::default() };
        assert!(matches!(params.validate(), Err(IndexError::InvalidConfig(_))));
        let config = IndexConfig::new(ElementType::Float32, 10, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_element_type_parse() {
        assert_eq!("float32".parse::<ElementType>().unwrap(), ElementType::Float32);
        assert_eq!("U8".parse::<ElementType>().unwrap(), ElementType::Uint8);
        assert!("float16".parse::<ElementType>().is_err());
    }
}
