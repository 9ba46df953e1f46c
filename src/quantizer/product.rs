//! Product quantizer: per-subspace k-means codebooks.
//!
//! The dimension is split into `m` equal subspaces. Training learns up to
//! `k` centroids per subspace (k-means++); encoding maps each subvector
//! to its nearest centroid index, one byte per subspace. Distances use
//! the asymmetric form: a per-query `m x k` table of partial squared
//! Euclidean distances, summed per code and square-rooted.

use rand_chacha::ChaCha8Rng;
use serde_json::json;

use crate::distance::squared_euclidean;
use crate::error::{ProximaError, Result};
use crate::index::make_rng;
use crate::kmeans;
use crate::quantizer::Quantizer;

/// Codebook-based product quantizer.
pub struct ProductQuantizer {
    dimension: usize,
    num_subspaces: usize,
    /// Dimensions per subspace (`dimension / num_subspaces`).
    sub_dim: usize,
    num_clusters: usize,
    max_iterations: usize,
    convergence_threshold: f64,
    rng: ChaCha8Rng,
    /// `codebooks[subspace][centroid]` is a `sub_dim`-length vector.
    /// Empty until trained.
    codebooks: Vec<Vec<Vec<f64>>>,
}

impl ProductQuantizer {
    /// Creates an untrained product quantizer.
    ///
    /// `num_subspaces` must divide `dimension` and `num_clusters` must be
    /// at most 256 (validated by the config layer).
    pub fn new(
        dimension: usize,
        num_subspaces: usize,
        num_clusters: usize,
        max_iterations: usize,
        convergence_threshold: f64,
    ) -> Self {
        Self {
            dimension,
            num_subspaces,
            sub_dim: dimension / num_subspaces,
            num_clusters,
            max_iterations,
            convergence_threshold,
            rng: make_rng(None),
            codebooks: Vec::new(),
        }
    }

    /// Bytes per encoded vector: one per subspace.
    pub fn code_len(&self) -> usize {
        self.num_subspaces
    }

    /// Precomputes the asymmetric lookup table for one query:
    /// `table[subspace][centroid]` is the partial squared Euclidean
    /// distance between the query's subvector and that centroid.
    pub fn distance_table(&self, query: &[f64]) -> Result<Vec<Vec<f64>>> {
        self.require_trained()?;
        self.check_dimension(query.len())?;
        Ok(self
            .codebooks
            .iter()
            .enumerate()
            .map(|(s, codebook)| {
                let sub = &query[s * self.sub_dim..(s + 1) * self.sub_dim];
                codebook
                    .iter()
                    .map(|centroid| squared_euclidean(sub, centroid))
                    .collect()
            })
            .collect())
    }

    /// Asymmetric distance via a precomputed table. Useful when scoring
    /// many codes against one query.
    pub fn distance_with_table(&self, table: &[Vec<f64>], code: &[u8]) -> Result<f64> {
        self.check_code_len(code.len())?;
        let mut sum = 0.0;
        for (subspace, &byte) in code.iter().enumerate() {
            let partial = table[subspace].get(byte as usize).ok_or_else(|| {
                ProximaError::quantization(format!(
                    "code byte {byte} out of range for subspace {subspace}"
                ))
            })?;
            sum += partial;
        }
        Ok(sum.sqrt())
    }

    fn require_trained(&self) -> Result<()> {
        if !self.is_trained() {
            return Err(ProximaError::quantization(
                "product quantizer is not trained",
            ));
        }
        Ok(())
    }

    fn check_dimension(&self, len: usize) -> Result<()> {
        if len != self.dimension {
            return Err(ProximaError::quantization(format!(
                "expected {} dimensions, got {len}",
                self.dimension
            )));
        }
        Ok(())
    }

    fn check_code_len(&self, len: usize) -> Result<()> {
        if len != self.code_len() {
            return Err(ProximaError::quantization(format!(
                "expected a {}-byte code, got {len}",
                self.code_len()
            )));
        }
        Ok(())
    }
}

impl Quantizer for ProductQuantizer {
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "product"
    }

    fn is_trained(&self) -> bool {
        !self.codebooks.is_empty()
    }

    fn train(&mut self, vectors: &[Vec<f64>]) -> Result<()> {
        if vectors.is_empty() {
            return Err(ProximaError::quantization(
                "cannot train product quantizer on an empty population",
            ));
        }
        for vector in vectors {
            self.check_dimension(vector.len())?;
        }

        let mut codebooks = Vec::with_capacity(self.num_subspaces);
        for subspace in 0..self.num_subspaces {
            let lo = subspace * self.sub_dim;
            let hi = lo + self.sub_dim;
            let subvectors: Vec<&[f64]> = vectors.iter().map(|v| &v[lo..hi]).collect();
            let result = kmeans::run(
                &subvectors,
                self.num_clusters,
                self.max_iterations,
                self.convergence_threshold,
                &mut self.rng,
            );
            codebooks.push(result.centroids);
        }
        self.codebooks = codebooks;
        Ok(())
    }

    fn encode(&self, vector: &[f64]) -> Result<Vec<u8>> {
        self.require_trained()?;
        self.check_dimension(vector.len())?;

        let mut code = Vec::with_capacity(self.num_subspaces);
        for (subspace, codebook) in self.codebooks.iter().enumerate() {
            let sub = &vector[subspace * self.sub_dim..(subspace + 1) * self.sub_dim];
            code.push(kmeans::nearest_centroid(sub, codebook) as u8);
        }
        Ok(code)
    }

    fn decode(&self, code: &[u8]) -> Result<Vec<f64>> {
        self.require_trained()?;
        self.check_code_len(code.len())?;

        let mut vector = Vec::with_capacity(self.dimension);
        for (subspace, &byte) in code.iter().enumerate() {
            let centroid = self.codebooks[subspace].get(byte as usize).ok_or_else(|| {
                ProximaError::quantization(format!(
                    "code byte {byte} out of range for subspace {subspace}"
                ))
            })?;
            vector.extend_from_slice(centroid);
        }
        Ok(vector)
    }

    fn distance(&self, query: &[f64], code: &[u8]) -> Result<f64> {
        let table = self.distance_table(query)?;
        self.distance_with_table(&table, code)
    }

    fn stats(&self) -> serde_json::Map<String, serde_json::Value> {
        let raw_bytes = self.dimension * std::mem::size_of::<f64>();
        let trained_clusters = self.codebooks.first().map_or(0, |c| c.len());
        let mut stats = serde_json::Map::new();
        stats.insert("type".into(), json!(self.kind()));
        stats.insert("trained".into(), json!(self.is_trained()));
        stats.insert("num_subspaces".into(), json!(self.num_subspaces));
        stats.insert("num_clusters".into(), json!(self.num_clusters));
        stats.insert("trained_clusters".into(), json!(trained_clusters));
        stats.insert("code_bytes".into(), json!(self.code_len()));
        stats.insert(
            "compression_ratio".into(),
            json!(raw_bytes as f64 / self.code_len() as f64),
        );
        stats
    }

    fn close(&mut self) -> Result<()> {
        self.codebooks.clear();
        Ok(())
    }
}
