//! Core type definitions for Proxima records, results, and pages.
//!
//! Identifiers are strings generated from UUID v7 so that lexicographic
//! order tracks insertion time. Vectors are dense `f64` sequences with a
//! per-database fixed dimension.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A dense vector of 64-bit floats.
pub type Vector = Vec<f64>;

/// Metadata attached to a stored vector: string keys mapped to
/// JSON-serializable values.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Vector identifier.
///
/// IDs are opaque strings, unique within one database, stable for the
/// vector's lifetime, and never reused after deletion. The facade
/// generates them with [`VectorId::generate`] (UUID v7, time-ordered).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorId(String);

impl VectorId {
    /// Wraps an existing string as a VectorId.
    ///
    /// The facade validates length and non-emptiness separately; this
    /// constructor does not.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh time-ordered ID (UUID v7).
    #[inline]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the ID as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the ID, returning the inner string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for VectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VectorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for VectorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A stored record: ID, vector, and optional metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Unique identifier.
    pub id: VectorId,

    /// The vector data. Length always equals the database dimension.
    pub vector: Vector,

    /// Optional caller-supplied metadata.
    pub metadata: Option<Metadata>,
}

impl VectorRecord {
    /// Creates a record with no metadata.
    pub fn new(id: VectorId, vector: Vector) -> Self {
        Self {
            id,
            vector,
            metadata: None,
        }
    }

    /// Creates a record with metadata.
    pub fn with_metadata(id: VectorId, vector: Vector, metadata: Metadata) -> Self {
        Self {
            id,
            vector,
            metadata: Some(metadata),
        }
    }
}

/// One search hit: ID, distance to the query, and joined metadata.
///
/// Distance is non-negative for Cosine/Euclidean/Manhattan; for DotProduct
/// it is the negated dot product, so smaller always means more similar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// ID of the matched vector.
    pub id: VectorId,

    /// Distance under the database's configured metric.
    pub distance: f64,

    /// Metadata stored with the matched vector, if any.
    pub metadata: Option<Metadata>,
}

/// A cursor-based view over an ordered sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items on this page, in sequence order.
    pub items: Vec<T>,

    /// Opaque cursor positioned after the last returned item.
    /// `None` when this is the final page.
    pub next_cursor: Option<String>,

    /// True if more items follow this page.
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Creates an empty final page.
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
            has_more: false,
        }
    }
}
