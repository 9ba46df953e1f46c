//! ANN index implementations for Proxima.
//!
//! Five index types stand behind one [`Index`] trait:
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                 Index trait                    │
//! └──────┬───────┬───────┬────────┬────────┬──────┘
//!        │       │       │        │        │
//!     Flat    Hnsw     Ivf      Lsh     Annoy
//!   (oracle) (graph) (k-means) (hashes) (forest)
//! ```
//!
//! Indices own copies of the vectors they index. Internally each maps
//! external string IDs to dense `u32` slots at the boundary and works on
//! slot indices everywhere else; the mapping pattern (forward map plus
//! slot arena) is shared across all five.
//!
//! Mutations take `&mut self`; the facade's writer lock is the outer
//! serialization boundary, so searches running under the read lock always
//! observe fully applied updates.

mod annoy;
mod flat;
mod hnsw;
mod ivf;
mod lsh;

pub use annoy::AnnoyIndex;
pub use flat::FlatIndex;
pub use hnsw::HnswIndex;
pub use ivf::IvfIndex;
pub use lsh::LshIndex;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde_json::json;

use crate::config::IndexConfig;
use crate::distance::Metric;
use crate::error::{IndexError, Result};
use crate::types::VectorId;

/// ANN index trait.
///
/// All implementations must be `Send + Sync` for use inside `VectorDb`.
pub trait Index: Send + Sync {
    /// Prepares the index for use (draws hash functions, seeds RNG state).
    fn initialize(&mut self) -> Result<()>;

    /// Short lowercase name of the index type.
    fn kind(&self) -> &'static str;

    /// The configured distance metric.
    fn metric(&self) -> Metric;

    /// Inserts a vector under the given ID.
    ///
    /// The facade guarantees the ID is fresh and the vector validated.
    fn insert(&mut self, id: &VectorId, vector: &[f64]) -> Result<()>;

    /// Inserts a batch of vectors.
    ///
    /// Default implementation loops [`Index::insert`]. IVF overrides this
    /// so implicit training sees the whole first batch.
    fn insert_batch(&mut self, items: &[(VectorId, Vec<f64>)]) -> Result<()> {
        for (id, vector) in items {
            self.insert(id, vector)?;
        }
        Ok(())
    }

    /// Removes a vector. Returns `true` if it was present.
    fn remove(&mut self, id: &VectorId) -> Result<bool>;

    /// Replaces a vector in place (remove + reinsert at the same ID).
    fn update(&mut self, id: &VectorId, vector: &[f64]) -> Result<()> {
        self.remove(id)?;
        self.insert(id, vector)
    }

    /// Returns the `k` nearest IDs with their distances, ascending by
    /// distance, ties broken by lexicographic ID order. May return fewer
    /// than `k` when fewer vectors are reachable.
    fn search(&self, query: &[f64], k: usize) -> Result<Vec<(VectorId, f64)>>;

    /// Number of live (searchable) vectors.
    fn len(&self) -> usize;

    /// Returns true if the index has no live vectors.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the given ID is live in the index.
    fn contains(&self, id: &VectorId) -> bool;

    /// Index statistics. Always includes `type` and `vector_count`.
    fn stats(&self) -> serde_json::Map<String, serde_json::Value>;

    /// Serializes the index to a tagged JSON snapshot (`kind`, `version`,
    /// `state`). The state key set is index-specific.
    fn snapshot(&self) -> Result<serde_json::Value>;

    /// Restores the index from a snapshot produced by [`Index::snapshot`].
    /// Kind and version tags are checked; mismatches are rejected.
    fn restore(&mut self, snapshot: &serde_json::Value) -> Result<()>;

    /// Releases index resources. The facade guarantees at-most-once
    /// invocation.
    fn close(&mut self) -> Result<()>;
}

/// Opens the index described by `config` for the given dimension.
///
/// The returned index still needs [`Index::initialize`].
pub fn open_index(dimension: usize, config: &IndexConfig) -> Result<Box<dyn Index>> {
    Ok(match config {
        IndexConfig::Flat { metric } => Box::new(FlatIndex::new(dimension, *metric)),
        IndexConfig::Hnsw { .. } => Box::new(HnswIndex::new(dimension, config.clone())?),
        IndexConfig::Ivf { .. } => Box::new(IvfIndex::new(dimension, config.clone())?),
        IndexConfig::Lsh { .. } => Box::new(LshIndex::new(dimension, config.clone())?),
        IndexConfig::Annoy { .. } => Box::new(AnnoyIndex::new(dimension, config.clone())?),
    })
}

/// Builds the deterministic RNG used by every index: seeded ChaCha8 when
/// a seed is configured, entropy otherwise.
pub(crate) fn make_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    }
}

/// Wraps an index state document with `(kind, version)` tags.
pub(crate) fn tag_snapshot(
    kind: &str,
    version: u32,
    state: serde_json::Value,
) -> serde_json::Value {
    json!({
        "kind": kind,
        "version": version,
        "state": state,
    })
}

/// Verifies the `(kind, version)` tags and returns the inner state.
pub(crate) fn untag_snapshot<'a>(
    expected_kind: &str,
    expected_version: u32,
    snapshot: &'a serde_json::Value,
) -> Result<&'a serde_json::Value> {
    let kind = snapshot
        .get("kind")
        .and_then(|v| v.as_str())
        .ok_or_else(|| IndexError::malformed("missing 'kind' tag"))?;
    if kind != expected_kind {
        return Err(IndexError::kind_mismatch(expected_kind, kind).into());
    }

    let version = snapshot
        .get("version")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| IndexError::malformed("missing 'version' tag"))?;
    if version != u64::from(expected_version) {
        return Err(IndexError::VersionMismatch {
            expected: expected_version,
            found: version as u32,
        }
        .into());
    }

    snapshot
        .get("state")
        .ok_or_else(|| IndexError::malformed("missing 'state' document").into())
}

/// A `(distance, slot)` pair ordered by distance, then slot.
///
/// `BinaryHeap<Neighbor>` is a max-heap (furthest on top), suitable for
/// bounded result sets; wrap in `std::cmp::Reverse` for a min-heap
/// candidate frontier. Distances are never NaN (validated at the facade),
/// so `total_cmp` is a plain total order here.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Neighbor {
    pub dist: f64,
    pub slot: u32,
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.dist
            .total_cmp(&other.dist)
            .then_with(|| self.slot.cmp(&other.slot))
    }
}

/// Exact re-ranking helper shared by IVF, LSH, and Annoy: ranks candidate
/// `(id, distance)` pairs ascending by distance with lexicographic ID
/// tie-break and truncates to `k`.
pub(crate) fn rank_candidates(
    mut scored: Vec<(VectorId, f64)>,
    k: usize,
) -> Vec<(VectorId, f64)> {
    scored.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    scored.truncate(k);
    scored
}
