//! Configuration types for Proxima.
//!
//! The [`DbConfig`] struct binds a dimension, an index configuration, a
//! storage backend configuration, and an optional quantizer. Every index
//! type is a tagged [`IndexConfig`] variant carrying its own parameters;
//! all ranges are validated by [`DbConfig::validate`] before the database
//! opens.
//!
//! # Example
//! ```rust
//! use proxima::{DbConfig, IndexConfig, Metric, StorageConfig};
//!
//! // Flat index over in-memory storage
//! let config = DbConfig::new(128, IndexConfig::flat(Metric::Cosine));
//!
//! // HNSW with custom parameters and disk storage
//! let config = DbConfig::new(
//!     768,
//!     IndexConfig::Hnsw {
//!         metric: Metric::Cosine,
//!         m: 32,
//!         ef_construction: 400,
//!         ef_search: 100,
//!         seed: Some(42),
//!     },
//! )
//! .with_storage(StorageConfig::Disk {
//!     data_dir: "./proxima-data".into(),
//! });
//! assert!(config.validate().is_ok());
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::distance::Metric;
use crate::error::ValidationError;
use crate::validation::MAX_DIMENSION;

/// Database configuration: dimension, index, storage, optional quantizer.
#[derive(Clone, Debug)]
pub struct DbConfig {
    /// Vector dimension, fixed at creation. All vectors must match.
    pub dimension: usize,

    /// Index type and parameters.
    pub index: IndexConfig,

    /// Storage backend. Defaults to in-memory.
    pub storage: StorageConfig,

    /// Optional quantizer bound to the database lifecycle.
    pub quantizer: Option<QuantizerConfig>,
}

impl DbConfig {
    /// Creates a configuration with in-memory storage and no quantizer.
    pub fn new(dimension: usize, index: IndexConfig) -> Self {
        Self {
            dimension,
            index,
            storage: StorageConfig::Memory,
            quantizer: None,
        }
    }

    /// Replaces the storage configuration.
    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    /// Binds a quantizer configuration.
    pub fn with_quantizer(mut self, quantizer: QuantizerConfig) -> Self {
        self.quantizer = Some(quantizer);
        self
    }

    /// Validates every parameter range.
    ///
    /// Called automatically by `VectorDb::new()`. You can also call this
    /// explicitly to check a configuration before constructing a database.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.dimension == 0 {
            return Err(ValidationError::invalid_field(
                "dimension",
                "must be greater than 0",
            ));
        }
        if self.dimension > MAX_DIMENSION {
            return Err(ValidationError::invalid_field(
                "dimension",
                format!("must not exceed {}", MAX_DIMENSION),
            ));
        }

        self.index.validate()?;
        self.storage.validate()?;
        if let Some(quantizer) = &self.quantizer {
            quantizer.validate(self.dimension)?;
        }

        Ok(())
    }

    /// Returns the configured metric (shared by index and quantizer).
    #[inline]
    pub fn metric(&self) -> Metric {
        self.index.metric()
    }
}

/// Index type and tuning parameters, one tagged variant per index.
///
/// Parameter domains:
///
/// | Variant | Parameter | Range |
/// |---------|-----------|-------|
/// | Hnsw    | `m` | 2–100 |
/// | Hnsw    | `ef_construction` | 10–1000 |
/// | Hnsw    | `ef_search` | 10–`ef_construction` |
/// | Ivf     | `num_clusters` | 1–10000 |
/// | Ivf     | `num_probes` | 1–`num_clusters` |
/// | Ivf     | `max_iterations` | 1–1000 |
/// | Ivf     | `convergence_threshold` | 0.0–1.0 |
/// | Lsh     | `num_tables` | 1–50 |
/// | Lsh     | `num_hash_bits` | 1–32 |
/// | Lsh     | `bucket_width` | 0.1–100.0 |
/// | Annoy   | `num_trees` | 1–1000 |
/// | Annoy   | `max_leaf_size` | 1–1000 |
/// | Annoy   | `search_k` | -1 (auto) or >= 1 |
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IndexConfig {
    /// Exhaustive exact search. The correctness oracle.
    Flat {
        /// Distance metric.
        metric: Metric,
    },

    /// Hierarchical navigable small world graph.
    Hnsw {
        /// Distance metric.
        metric: Metric,
        /// Target out-degree per layer (layer 0 allows `2 * m`).
        m: usize,
        /// Beam width during construction.
        ef_construction: usize,
        /// Beam width during search (effective beam is `max(ef_search, k)`).
        ef_search: usize,
        /// RNG seed for level assignment. `None` draws from entropy.
        seed: Option<u64>,
    },

    /// Inverted file with k-means coarse quantizer.
    Ivf {
        /// Distance metric.
        metric: Metric,
        /// Number of k-means cells.
        num_clusters: usize,
        /// Cells probed per query.
        num_probes: usize,
        /// Maximum k-means iterations during training.
        max_iterations: usize,
        /// Training stops when the largest centroid coordinate shift in
        /// one pass falls below this threshold.
        convergence_threshold: f64,
        /// RNG seed for k-means++ initialization.
        seed: Option<u64>,
    },

    /// Multi-table locality-sensitive hashing.
    Lsh {
        /// Distance metric. Angular metrics use random hyperplanes;
        /// Euclidean/Manhattan use p-stable projections.
        metric: Metric,
        /// Number of independent hash tables.
        num_tables: usize,
        /// Hash functions per table.
        num_hash_bits: usize,
        /// Bucket width for p-stable hashing (ignored for angular metrics).
        bucket_width: f64,
        /// RNG seed for hyperplane/projection draws.
        seed: Option<u64>,
    },

    /// Random-projection forest.
    Annoy {
        /// Distance metric.
        metric: Metric,
        /// Number of trees in the forest.
        num_trees: usize,
        /// Maximum points per leaf.
        max_leaf_size: usize,
        /// Candidates to collect before re-ranking. `-1` means
        /// `num_trees * k`.
        search_k: i64,
        /// RNG seed for pivot selection.
        seed: Option<u64>,
    },
}

impl IndexConfig {
    /// Flat index with the given metric.
    pub fn flat(metric: Metric) -> Self {
        Self::Flat { metric }
    }

    /// HNSW with default tuning (`m=16`, `ef_construction=200`,
    /// `ef_search=100`).
    pub fn hnsw(metric: Metric) -> Self {
        Self::Hnsw {
            metric,
            m: 16,
            ef_construction: 200,
            ef_search: 100,
            seed: None,
        }
    }

    /// IVF with default tuning (`num_clusters=100`, `num_probes=8`,
    /// `max_iterations=25`, `convergence_threshold=1e-3`).
    pub fn ivf(metric: Metric) -> Self {
        Self::Ivf {
            metric,
            num_clusters: 100,
            num_probes: 8,
            max_iterations: 25,
            convergence_threshold: 1e-3,
            seed: None,
        }
    }

    /// LSH with default tuning (`num_tables=10`, `num_hash_bits=4`,
    /// `bucket_width=4.0`).
    pub fn lsh(metric: Metric) -> Self {
        Self::Lsh {
            metric,
            num_tables: 10,
            num_hash_bits: 4,
            bucket_width: 4.0,
            seed: None,
        }
    }

    /// Annoy forest with default tuning (`num_trees=256`,
    /// `max_leaf_size=64`, auto `search_k`). The forest is sized for
    /// recall on unstructured data; lower `num_trees` when build time
    /// matters more than accuracy.
    pub fn annoy(metric: Metric) -> Self {
        Self::Annoy {
            metric,
            num_trees: 256,
            max_leaf_size: 64,
            search_k: -1,
            seed: None,
        }
    }

    /// Returns the configured metric.
    pub fn metric(&self) -> Metric {
        match self {
            Self::Flat { metric }
            | Self::Hnsw { metric, .. }
            | Self::Ivf { metric, .. }
            | Self::Lsh { metric, .. }
            | Self::Annoy { metric, .. } => *metric,
        }
    }

    /// Short lowercase name of the index type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Flat { .. } => "flat",
            Self::Hnsw { .. } => "hnsw",
            Self::Ivf { .. } => "ivf",
            Self::Lsh { .. } => "lsh",
            Self::Annoy { .. } => "annoy",
        }
    }

    /// Validates variant-specific parameter ranges.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Flat { .. } => Ok(()),

            Self::Hnsw {
                m,
                ef_construction,
                ef_search,
                ..
            } => {
                check_range("m", *m, 2, 100)?;
                check_range("ef_construction", *ef_construction, 10, 1000)?;
                if !(10..=*ef_construction).contains(ef_search) {
                    return Err(ValidationError::invalid_field(
                        "ef_search",
                        format!("must be in [10, ef_construction={ef_construction}]"),
                    ));
                }
                Ok(())
            }

            Self::Ivf {
                num_clusters,
                num_probes,
                max_iterations,
                convergence_threshold,
                ..
            } => {
                check_range("num_clusters", *num_clusters, 1, 10_000)?;
                if !(1..=*num_clusters).contains(num_probes) {
                    return Err(ValidationError::invalid_field(
                        "num_probes",
                        format!("must be in [1, num_clusters={num_clusters}]"),
                    ));
                }
                check_range("max_iterations", *max_iterations, 1, 1000)?;
                if !(0.0..=1.0).contains(convergence_threshold) {
                    return Err(ValidationError::invalid_field(
                        "convergence_threshold",
                        "must be in [0.0, 1.0]",
                    ));
                }
                Ok(())
            }

            Self::Lsh {
                num_tables,
                num_hash_bits,
                bucket_width,
                ..
            } => {
                check_range("num_tables", *num_tables, 1, 50)?;
                check_range("num_hash_bits", *num_hash_bits, 1, 32)?;
                if !(0.1..=100.0).contains(bucket_width) {
                    return Err(ValidationError::invalid_field(
                        "bucket_width",
                        "must be in [0.1, 100.0]",
                    ));
                }
                Ok(())
            }

            Self::Annoy {
                num_trees,
                max_leaf_size,
                search_k,
                ..
            } => {
                check_range("num_trees", *num_trees, 1, 1000)?;
                check_range("max_leaf_size", *max_leaf_size, 1, 1000)?;
                if *search_k != -1 && *search_k < 1 {
                    return Err(ValidationError::invalid_field(
                        "search_k",
                        "must be -1 (auto) or at least 1",
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Insertion-ordered in-memory map. Fastest; nothing survives drop.
    Memory,

    /// Append-only log on disk with an in-memory offset index.
    Disk {
        /// Directory holding the log file. Created if missing.
        data_dir: PathBuf,
    },

    /// LRU cache fronting a disk backend, write-through.
    Hybrid {
        /// Directory holding the log file. Created if missing.
        data_dir: PathBuf,
        /// Maximum number of records held in the cache.
        cache_size: usize,
    },
}

impl StorageConfig {
    /// Short lowercase name of the backend type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Disk { .. } => "disk",
            Self::Hybrid { .. } => "hybrid",
        }
    }

    /// Validates variant-specific parameters.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Self::Hybrid { cache_size, .. } = self {
            if *cache_size == 0 {
                return Err(ValidationError::invalid_field(
                    "cache_size",
                    "must be greater than 0",
                ));
            }
        }
        Ok(())
    }
}

/// Quantizer configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QuantizerConfig {
    /// Min-max scalar quantization.
    Scalar {
        /// Bits per dimension: 4, 8, or 16.
        bits: u8,
    },

    /// Product quantization with per-subspace k-means codebooks.
    Product {
        /// Number of subspaces; must divide the database dimension.
        num_subspaces: usize,
        /// Centroids per subspace codebook (at most 256, one code byte).
        num_clusters: usize,
        /// Maximum k-means iterations per subspace during training.
        max_iterations: usize,
        /// k-means convergence threshold (max centroid coordinate shift).
        convergence_threshold: f64,
    },
}

impl QuantizerConfig {
    /// Scalar quantizer with 8 bits per dimension.
    pub fn scalar() -> Self {
        Self::Scalar { bits: 8 }
    }

    /// Product quantizer with default tuning (`num_clusters=256`,
    /// `max_iterations=25`, `convergence_threshold=1e-3`).
    pub fn product(num_subspaces: usize) -> Self {
        Self::Product {
            num_subspaces,
            num_clusters: 256,
            max_iterations: 25,
            convergence_threshold: 1e-3,
        }
    }

    /// Short lowercase name of the quantizer type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Scalar { .. } => "scalar",
            Self::Product { .. } => "product",
        }
    }

    /// Validates parameters against the database dimension.
    pub fn validate(&self, dimension: usize) -> Result<(), ValidationError> {
        match self {
            Self::Scalar { bits } => {
                if !matches!(bits, 4 | 8 | 16) {
                    return Err(ValidationError::invalid_field(
                        "bits",
                        "must be 4, 8, or 16",
                    ));
                }
                Ok(())
            }
            Self::Product {
                num_subspaces,
                num_clusters,
                max_iterations,
                convergence_threshold,
            } => {
                if *num_subspaces == 0 {
                    return Err(ValidationError::invalid_field(
                        "num_subspaces",
                        "must be at least 1",
                    ));
                }
                if dimension % num_subspaces != 0 {
                    return Err(ValidationError::invalid_field(
                        "num_subspaces",
                        format!("must divide dimension {dimension}"),
                    ));
                }
                check_range("num_clusters", *num_clusters, 1, 256)?;
                check_range("max_iterations", *max_iterations, 1, 1000)?;
                if !(0.0..=1.0).contains(convergence_threshold) {
                    return Err(ValidationError::invalid_field(
                        "convergence_threshold",
                        "must be in [0.0, 1.0]",
                    ));
                }
                Ok(())
            }
        }
    }
}

fn check_range(field: &str, value: usize, min: usize, max: usize) -> Result<(), ValidationError> {
    if !(min..=max).contains(&value) {
        return Err(ValidationError::invalid_field(
            field,
            format!("must be in [{min}, {max}], got {value}"),
        ));
    }
    Ok(())
}
