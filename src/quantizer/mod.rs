//! Vector quantizers: scalar (min-max) and product (codebook) compression.
//!
//! Quantizers are trained over a vector population, then encode vectors
//! into compact byte codes and compute distances directly between an
//! unquantized query and a stored code. They bind to the facade as an
//! optional component sharing the database lifecycle.

mod product;
mod scalar;

pub use product::ProductQuantizer;
pub use scalar::ScalarQuantizer;

use crate::config::QuantizerConfig;
use crate::distance::Metric;
use crate::error::Result;

/// Quantizer trait.
///
/// `train` must run before `encode`/`decode`/`distance`; untrained calls
/// fail with a quantization error.
pub trait Quantizer: Send + Sync {
    /// Prepares the quantizer for use.
    fn initialize(&mut self) -> Result<()>;

    /// Short lowercase name of the quantizer type.
    fn kind(&self) -> &'static str;

    /// True once calibration/codebooks have been trained.
    fn is_trained(&self) -> bool;

    /// Trains on the given population. Retraining replaces prior state;
    /// codes produced before retraining are invalidated.
    fn train(&mut self, vectors: &[Vec<f64>]) -> Result<()>;

    /// Encodes a vector into its byte code.
    fn encode(&self, vector: &[f64]) -> Result<Vec<u8>>;

    /// Decodes a byte code back into an approximate vector.
    fn decode(&self, code: &[u8]) -> Result<Vec<f64>>;

    /// Distance between an unquantized query and a stored code.
    fn distance(&self, query: &[f64], code: &[u8]) -> Result<f64>;

    /// Quantizer statistics. Always includes `type`, `trained`, and
    /// `compression_ratio`.
    fn stats(&self) -> serde_json::Map<String, serde_json::Value>;

    /// Releases trained state. The facade guarantees at-most-once
    /// invocation.
    fn close(&mut self) -> Result<()>;
}

/// Opens the quantizer described by `config` for the given dimension and
/// metric.
pub fn open_quantizer(
    dimension: usize,
    metric: Metric,
    config: &QuantizerConfig,
) -> Result<Box<dyn Quantizer>> {
    Ok(match config {
        QuantizerConfig::Scalar { bits } => {
            Box::new(ScalarQuantizer::new(dimension, *bits, metric))
        }
        QuantizerConfig::Product {
            num_subspaces,
            num_clusters,
            max_iterations,
            convergence_threshold,
        } => Box::new(ProductQuantizer::new(
            dimension,
            *num_subspaces,
            *num_clusters,
            *max_iterations,
            *convergence_threshold,
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_quantizer_kinds() {
        let sq = open_quantizer(8, Metric::Cosine, &QuantizerConfig::scalar()).unwrap();
        assert_eq!(sq.kind(), "scalar");
        assert!(!sq.is_trained());

        let pq = open_quantizer(8, Metric::Euclidean, &QuantizerConfig::product(4)).unwrap();
        assert_eq!(pq.kind(), "product");
        assert!(!pq.is_trained());
    }

    #[test]
    fn test_quantizer_is_object_safe() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn Quantizer>();
    }
}
