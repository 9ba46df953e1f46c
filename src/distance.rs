//! Distance kernels over dense float vectors.
//!
//! All four metrics are oriented so that smaller means more similar:
//! DotProduct is negated, Cosine is `1 - similarity` clamped to `[0, 2]`.
//! Internal comparisons may use squared Euclidean distance where the
//! monotone transform does not change ordering.

use serde::{Deserialize, Serialize};

/// Norms below this threshold are treated as zero for cosine distance.
const NORM_EPSILON: f64 = 1e-10;

/// Distance metric for vector comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Cosine distance: `1 - (a.b) / (|a| * |b|)`, clamped to `[0, 2]`.
    Cosine,

    /// Euclidean (L2) distance.
    Euclidean,

    /// Negated dot product (so smaller = more similar). May be signed.
    #[serde(rename = "dot")]
    DotProduct,

    /// Manhattan (L1) distance.
    Manhattan,
}

impl Metric {
    /// Computes the distance between two equal-length vectors.
    ///
    /// Callers guarantee `a.len() == b.len()`; dimension validation
    /// happens at the facade boundary.
    pub fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            Metric::Cosine => cosine_distance(a, b),
            Metric::Euclidean => squared_euclidean(a, b).sqrt(),
            Metric::DotProduct => -dot(a, b),
            Metric::Manhattan => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y).abs())
                .sum(),
        }
    }

    /// Short lowercase name used in configs and stats maps.
    pub fn name(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
            Metric::DotProduct => "dot",
            Metric::Manhattan => "manhattan",
        }
    }

    /// True if this metric hashes well with random hyperplanes (angular
    /// metrics); false means p-stable projections are used instead.
    pub(crate) fn is_angular(&self) -> bool {
        matches!(self, Metric::Cosine | Metric::DotProduct)
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Dot product of two equal-length vectors.
#[inline]
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Squared Euclidean distance. Monotone in Euclidean distance, so it can
/// replace it wherever only ordering matters (k-means assignment, PQ
/// lookup tables, Annoy re-ranking candidates).
#[inline]
pub(crate) fn squared_euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn cosine_distance(a: &[f64], b: &[f64]) -> f64 {
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();
    if norm_a < NORM_EPSILON || norm_b < NORM_EPSILON {
        return 1.0;
    }
    (1.0 - dot / (norm_a * norm_b)).clamp(0.0, 2.0)
}
