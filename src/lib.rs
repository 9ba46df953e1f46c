//! # Proxima
//!
//! Embedded vector similarity search engine: ingest high-dimensional
//! float vectors with opaque metadata, maintain an approximate-nearest-
//! neighbor index over them, and answer top-k queries under a
//! configurable distance metric, all in-process.
//!
//! ## Quick Start
//!
//! ```rust
//! use proxima::{VectorDb, DbConfig, IndexConfig, Metric};
//!
//! # fn main() -> proxima::Result<()> {
//! // A 4-dimensional database with an HNSW index
//! let db = VectorDb::new(DbConfig::new(4, IndexConfig::hnsw(Metric::Cosine)))?;
//! db.initialize()?;
//!
//! // Insert vectors; IDs are generated and returned
//! let ids = db.insert(vec![vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 1.0, 0.0, 0.0]], None)?;
//!
//! // Top-k search: ascending distance, metadata joined from storage
//! let results = db.search(&[1.0, 0.0, 0.0, 0.0], 1)?;
//! assert_eq!(results[0].id, ids[0]);
//!
//! // Clean up
//! db.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! ### Index
//!
//! Five index types stand behind the [`Index`](index::Index) trait:
//! Flat (exact oracle), HNSW (layered proximity graph), IVF (k-means
//! inverted file), LSH (random-projection hash tables), and an
//! Annoy-style random-projection forest. Pick one per database via
//! [`IndexConfig`].
//!
//! ### Storage
//!
//! Records `(id, vector, metadata)` live in a [`StorageBackend`](storage::StorageBackend):
//! in-memory, disk (append-only log), or hybrid (LRU cache over disk).
//! Iteration order is always insertion order.
//!
//! ### Quantizers
//!
//! Optional scalar (min-max) and product (codebook) quantizers compress
//! vectors into byte codes and score them against unquantized queries.
//!
//! ### Persistence
//!
//! [`PersistenceManager`] reads and writes the vectors binary format and
//! versioned JSON snapshots of index state, optionally gzip-compressed.
//!
//! ## Thread Safety
//!
//! [`VectorDb`] is `Send + Sync` and can be shared across threads using
//! `Arc`. One reader-writer lock serializes writers while letting
//! searches run concurrently.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

// ============================================================================
// Module declarations
// ============================================================================

mod config;
mod db;
mod distance;
mod error;
mod kmeans;
mod types;
mod validation;

pub mod index;
pub mod persistence;
pub mod quantizer;
pub mod storage;

// ============================================================================
// Public API re-exports
// ============================================================================

// Main database interface
pub use db::{UpdateRequest, VectorDb};

// Configuration
pub use config::{DbConfig, IndexConfig, QuantizerConfig, StorageConfig};

// Distance metrics
pub use distance::Metric;

// Error handling
pub use error::{IndexError, ProximaError, Result, StorageError, ValidationError};

// Core types
pub use types::{Metadata, Page, SearchResult, Vector, VectorId, VectorRecord};

// Persistence
pub use persistence::PersistenceManager;

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Convenient imports for common Proxima usage.
///
/// ```rust
/// use proxima::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{DbConfig, IndexConfig, QuantizerConfig, StorageConfig};
    pub use crate::db::{UpdateRequest, VectorDb};
    pub use crate::distance::Metric;
    pub use crate::error::{ProximaError, Result};
    pub use crate::persistence::PersistenceManager;
    pub use crate::types::{Metadata, Page, SearchResult, VectorId, VectorRecord};
}
