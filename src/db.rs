//! VectorDb facade and lifecycle operations.
//!
//! [`VectorDb`] binds exactly one storage backend and one index, plus an
//! optional quantizer and an optional persistence manager. All external
//! callers (HTTP facades, CLIs) speak only to this type.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──initialize()──▶ Ready ──close()──▶ Closed
//! ```
//!
//! Operations other than `initialize`/`close` require `Ready` and fail
//! fast otherwise. `close()` is idempotent: the first call releases the
//! index, then storage, then quantizer; later calls are no-ops.
//!
//! # Thread Safety
//!
//! `VectorDb` is `Send + Sync` and can be shared across threads with
//! `Arc`. One reader-writer lock guards storage and index together:
//! searches, gets, stats, and pagination take the read lock; inserts,
//! updates, deletes, and close take the write lock. Any search that
//! begins after an insert returns sees the inserted vector.

use std::sync::RwLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::config::DbConfig;
use crate::error::{ProximaError, Result, ValidationError};
use crate::index::{open_index, untag_snapshot, Index};
use crate::persistence::PersistenceManager;
use crate::quantizer::{open_quantizer, Quantizer};
use crate::storage::{open_storage, StorageBackend};
use crate::types::{Metadata, Page, SearchResult, VectorId, VectorRecord};
use crate::validation::{
    validate_batch_len, validate_id, validate_k, validate_metadata, validate_vector,
};

/// Tag for the database-level state snapshot document.
const STATE_KIND: &str = "proxima.db";
const STATE_VERSION: u32 = 1;

/// File names used by [`VectorDb::save_to`] / [`VectorDb::load_from`].
const VECTORS_FILE: &str = "vectors.bin";
const INDEX_FILE: &str = "index.json";
const STATE_FILE: &str = "state.json";

/// Facade lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DbState {
    Uninitialized,
    Ready,
    Closed,
}

/// One field update in a [`VectorDb::batch_update`] call.
#[derive(Clone, Debug)]
pub struct UpdateRequest {
    /// ID of the record to update.
    pub id: VectorId,
    /// Replacement vector, if any.
    pub vector: Option<Vec<f64>>,
    /// Replacement metadata, if any (replaces the whole map).
    pub metadata: Option<Metadata>,
}

/// Everything guarded by the facade lock.
struct Inner {
    state: DbState,
    storage: Box<dyn StorageBackend>,
    index: Box<dyn Index>,
    quantizer: Option<Box<dyn Quantizer>>,
}

impl Inner {
    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            DbState::Ready => Ok(()),
            DbState::Uninitialized => Err(ProximaError::NotInitialized),
            DbState::Closed => Err(ProximaError::AlreadyClosed),
        }
    }
}

/// The main Proxima database handle.
///
/// Create with [`VectorDb::new`], call [`VectorDb::initialize`], use, and
/// finish with [`VectorDb::close`].
pub struct VectorDb {
    config: DbConfig,
    persistence: Option<PersistenceManager>,
    inner: RwLock<Inner>,
}

impl std::fmt::Debug for VectorDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self
            .inner
            .read()
            .map(|inner| format!("{:?}", inner.state))
            .unwrap_or_else(|_| "Poisoned".to_string());
        f.debug_struct("VectorDb")
            .field("dimension", &self.config.dimension)
            .field("index", &self.config.index.kind())
            .field("storage", &self.config.storage.kind())
            .field("state", &state)
            .finish_non_exhaustive()
    }
}

impl VectorDb {
    /// Constructs a database from a validated configuration.
    ///
    /// Components are created here; no files are touched until
    /// [`VectorDb::initialize`].
    ///
    /// # Errors
    ///
    /// Returns a validation error when any configuration parameter is
    /// outside its domain (see [`DbConfig::validate`]).
    pub fn new(config: DbConfig) -> Result<Self> {
        config.validate()?;

        let storage = open_storage(&config.storage)?;
        let index = open_index(config.dimension, &config.index)?;
        let quantizer = config
            .quantizer
            .as_ref()
            .map(|q| open_quantizer(config.dimension, config.metric(), q))
            .transpose()?;

        Ok(Self {
            config,
            persistence: None,
            inner: RwLock::new(Inner {
                state: DbState::Uninitialized,
                storage,
                index,
                quantizer,
            }),
        })
    }

    /// Binds a persistence manager for [`VectorDb::save_to`] and
    /// [`VectorDb::load_from`].
    pub fn with_persistence(mut self, persistence: PersistenceManager) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Returns a reference to the database configuration.
    #[inline]
    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Returns the configured vector dimension.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| ProximaError::lock_poisoned("facade"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| ProximaError::lock_poisoned("facade"))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Transitions `Uninitialized -> Ready`, initializing storage, index,
    /// and quantizer in that order.
    ///
    /// # Errors
    ///
    /// - [`ProximaError::AlreadyInitialized`] when already `Ready`
    /// - [`ProximaError::AlreadyClosed`] after `close()`
    /// - Any component initialization failure (the database stays
    ///   `Uninitialized`)
    #[instrument(skip(self))]
    pub fn initialize(&self) -> Result<()> {
        let mut inner = self.write()?;
        match inner.state {
            DbState::Ready => return Err(ProximaError::AlreadyInitialized),
            DbState::Closed => return Err(ProximaError::AlreadyClosed),
            DbState::Uninitialized => {}
        }

        inner.storage.initialize()?;
        inner.index.initialize()?;
        if let Some(quantizer) = inner.quantizer.as_mut() {
            quantizer.initialize()?;
        }
        inner.state = DbState::Ready;

        info!(
            dimension = self.config.dimension,
            index = self.config.index.kind(),
            storage = self.config.storage.kind(),
            "VectorDb initialized"
        );
        Ok(())
    }

    /// Closes the database: index first (stops accepting work), then
    /// storage, then quantizer.
    ///
    /// Idempotent and infallible after the first call; release failures
    /// are logged, never returned.
    #[instrument(skip(self))]
    pub fn close(&self) -> Result<()> {
        let mut inner = self.write()?;
        match inner.state {
            DbState::Closed => return Ok(()),
            DbState::Uninitialized => {
                inner.state = DbState::Closed;
                return Ok(());
            }
            DbState::Ready => {}
        }

        if let Err(e) = inner.index.close() {
            warn!(error = %e, "Index close failed (continuing)");
        }
        if let Err(e) = inner.storage.close() {
            warn!(error = %e, "Storage close failed (continuing)");
        }
        if let Some(quantizer) = inner.quantizer.as_mut() {
            if let Err(e) = quantizer.close() {
                warn!(error = %e, "Quantizer close failed (continuing)");
            }
        }
        inner.state = DbState::Closed;

        info!("VectorDb closed");
        Ok(())
    }

    /// True while the database is `Ready`.
    pub fn is_ready(&self) -> bool {
        self.inner
            .read()
            .map(|inner| inner.state == DbState::Ready)
            .unwrap_or(false)
    }

    // =========================================================================
    // Write path
    // =========================================================================

    /// Inserts a batch of vectors with optional per-vector metadata and
    /// returns the freshly generated IDs (UUID v7, insertion-ordered).
    ///
    /// The whole batch is validated before anything is written. Records
    /// land in storage first, then in the index; if the index step fails,
    /// the batch's storage writes are compensated so neither side keeps a
    /// partial batch.
    ///
    /// # Errors
    ///
    /// - [`ValidationError`] for dimension/finiteness/metadata violations
    ///   or a metadata list whose length differs from the vector list
    /// - Lifecycle errors outside `Ready`
    #[instrument(skip(self, vectors, metadata), fields(count = vectors.len()))]
    pub fn insert(
        &self,
        vectors: Vec<Vec<f64>>,
        metadata: Option<Vec<Metadata>>,
    ) -> Result<Vec<VectorId>> {
        validate_batch_len("vectors", vectors.len())?;
        if let Some(metadata) = &metadata {
            if metadata.len() != vectors.len() {
                return Err(ValidationError::invalid_field(
                    "metadata",
                    format!(
                        "length {} does not match vectors length {}",
                        metadata.len(),
                        vectors.len()
                    ),
                )
                .into());
            }
            for map in metadata {
                validate_metadata(map)?;
            }
        }
        for vector in &vectors {
            validate_vector(self.config.dimension, vector)?;
        }

        let mut inner = self.write()?;
        inner.ensure_ready()?;

        let ids: Vec<VectorId> = (0..vectors.len()).map(|_| VectorId::generate()).collect();
        let mut metadata = metadata;
        let items: Vec<(VectorId, Vec<f64>)> = ids.iter().cloned().zip(vectors).collect();

        // Storage first (source of truth), compensating on failure
        let mut stored: Vec<VectorId> = Vec::with_capacity(items.len());
        for (i, (id, vector)) in items.iter().enumerate() {
            let record = VectorRecord {
                id: id.clone(),
                vector: vector.clone(),
                metadata: metadata.as_mut().map(|m| std::mem::take(&mut m[i])),
            };
            if let Err(e) = inner.storage.put(record) {
                for done in &stored {
                    let _ = inner.storage.delete(done);
                }
                return Err(e);
            }
            stored.push(id.clone());
        }

        // Then the index; compensate storage if it rejects the batch
        if let Err(e) = inner.index.insert_batch(&items) {
            for (id, _) in &items {
                let _ = inner.storage.delete(id);
                let _ = inner.index.remove(id);
            }
            return Err(e);
        }

        debug!(count = ids.len(), "Inserted vectors");
        Ok(ids)
    }

    /// Replaces a record's vector and/or metadata.
    ///
    /// A vector change replaces the index node in place (delete and
    /// reinsert under the same ID). An unknown ID fails without side
    /// effects.
    ///
    /// # Errors
    ///
    /// - [`ProximaError::NotFound`] for an unknown ID
    /// - [`ValidationError`] for invalid replacement values, or when both
    ///   `vector` and `metadata` are `None`
    #[instrument(skip(self, vector, metadata), fields(id = %id))]
    pub fn update(
        &self,
        id: &VectorId,
        vector: Option<Vec<f64>>,
        metadata: Option<Metadata>,
    ) -> Result<()> {
        if vector.is_none() && metadata.is_none() {
            return Err(
                ValidationError::invalid_field("update", "nothing to update").into(),
            );
        }
        validate_id(id)?;
        if let Some(vector) = &vector {
            validate_vector(self.config.dimension, vector)?;
        }
        if let Some(metadata) = &metadata {
            validate_metadata(metadata)?;
        }

        let mut inner = self.write()?;
        inner.ensure_ready()?;
        apply_update(&mut inner, id, vector, metadata)
    }

    /// Deletes the given IDs from storage and index.
    ///
    /// Returns `true` only if every ID existed. Missing IDs are logged
    /// and reported through the return value; successful deletions are
    /// never rolled back.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub fn delete(&self, ids: &[VectorId]) -> Result<bool> {
        validate_batch_len("ids", ids.len())?;

        let mut inner = self.write()?;
        inner.ensure_ready()?;

        let mut all_succeeded = true;
        for id in ids {
            let existed = inner.storage.delete(id)?;
            inner.index.remove(id)?;
            if !existed {
                warn!(id = %id, "Delete target not found");
                all_succeeded = false;
            }
        }

        debug!(count = ids.len(), all_succeeded, "Deleted vectors");
        Ok(all_succeeded)
    }

    /// Applies a batch of updates under a single write-lock acquisition.
    ///
    /// Returns one success flag per request; failed items (unknown ID,
    /// invalid value) are logged and reported `false` without rolling
    /// back earlier items.
    #[instrument(skip(self, updates), fields(count = updates.len()))]
    pub fn batch_update(&self, updates: Vec<UpdateRequest>) -> Result<Vec<bool>> {
        validate_batch_len("updates", updates.len())?;

        let mut inner = self.write()?;
        inner.ensure_ready()?;

        let mut outcomes = Vec::with_capacity(updates.len());
        for request in updates {
            let valid = request.vector.is_some() || request.metadata.is_some();
            let valid = valid
                && validate_id(&request.id).is_ok()
                && request
                    .vector
                    .as_ref()
                    .map_or(true, |v| validate_vector(self.config.dimension, v).is_ok())
                && request
                    .metadata
                    .as_ref()
                    .map_or(true, |m| validate_metadata(m).is_ok());
            if !valid {
                warn!(id = %request.id, "Skipping invalid batch update item");
                outcomes.push(false);
                continue;
            }

            match apply_update(&mut inner, &request.id, request.vector, request.metadata) {
                Ok(()) => outcomes.push(true),
                Err(e) => {
                    warn!(id = %request.id, error = %e, "Batch update item failed");
                    outcomes.push(false);
                }
            }
        }
        Ok(outcomes)
    }

    // =========================================================================
    // Read path
    // =========================================================================

    /// Returns the `k` nearest records, ascending by distance, ties
    /// broken by lexicographic ID. Fewer than `k` results only when fewer
    /// are reachable.
    #[instrument(skip(self, query))]
    pub fn search(&self, query: &[f64], k: usize) -> Result<Vec<SearchResult>> {
        validate_k(k)?;
        validate_vector(self.config.dimension, query)?;

        let inner = self.read()?;
        inner.ensure_ready()?;
        search_inner(&inner, query, k)
    }

    /// Runs several searches under a single read-lock acquisition.
    #[instrument(skip(self, queries), fields(count = queries.len()))]
    pub fn batch_search(&self, queries: &[Vec<f64>], k: usize) -> Result<Vec<Vec<SearchResult>>> {
        validate_k(k)?;
        validate_batch_len("queries", queries.len())?;
        for query in queries {
            validate_vector(self.config.dimension, query)?;
        }

        let inner = self.read()?;
        inner.ensure_ready()?;
        queries
            .iter()
            .map(|query| search_inner(&inner, query, k))
            .collect()
    }

    /// Fetches a single record by ID.
    #[instrument(skip(self), fields(id = %id))]
    pub fn get(&self, id: &VectorId) -> Result<Option<VectorRecord>> {
        let inner = self.read()?;
        inner.ensure_ready()?;
        inner.storage.get(id)
    }

    /// Pages through live IDs in insertion order.
    ///
    /// The cursor is opaque; pass `next_cursor` from the previous page to
    /// continue. A page size of zero is rejected.
    #[instrument(skip(self, cursor))]
    pub fn list_ids_paginated(
        &self,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<Page<VectorId>> {
        if page_size == 0 {
            return Err(
                ValidationError::invalid_field("page_size", "must be at least 1").into(),
            );
        }
        let after = cursor.map(decode_cursor).transpose()?;

        let inner = self.read()?;
        inner.ensure_ready()?;

        let page = inner.storage.scan_page(after.as_ref(), page_size)?;
        Ok(Page {
            next_cursor: if page.has_more {
                page.items.last().map(encode_cursor)
            } else {
                None
            },
            items: page.items,
            has_more: page.has_more,
        })
    }

    /// Database statistics: dimension, vector count, component types, a
    /// bytes-in-memory estimate, and per-component sub-maps.
    pub fn stats(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let inner = self.read()?;
        inner.ensure_ready()?;

        let vector_count = inner.storage.len();
        let vector_bytes = self.config.dimension * std::mem::size_of::<f64>();
        // Storage holds one copy of each vector, the index another
        let estimated = vector_count * vector_bytes + inner.index.len() * vector_bytes;

        let mut stats = serde_json::Map::new();
        stats.insert("dimension".into(), json!(self.config.dimension));
        stats.insert("vector_count".into(), json!(vector_count));
        stats.insert("metric".into(), json!(self.config.metric().name()));
        stats.insert("index_type".into(), json!(inner.index.kind()));
        stats.insert("storage_type".into(), json!(inner.storage.kind()));
        stats.insert("estimated_memory_bytes".into(), json!(estimated));
        stats.insert("index".into(), json!(inner.index.stats()));
        stats.insert("storage".into(), json!(inner.storage.stats()));
        if let Some(quantizer) = &inner.quantizer {
            stats.insert("quantizer".into(), json!(quantizer.stats()));
        }
        Ok(stats)
    }

    // =========================================================================
    // Quantizer binding
    // =========================================================================

    /// Trains the bound quantizer on every stored vector.
    ///
    /// # Errors
    ///
    /// Fails when no quantizer is configured or storage holds no vectors.
    #[instrument(skip(self))]
    pub fn train_quantizer(&self) -> Result<()> {
        let mut inner = self.write()?;
        inner.ensure_ready()?;
        if inner.quantizer.is_none() {
            return Err(ProximaError::quantization("no quantizer configured"));
        }

        let mut vectors = Vec::with_capacity(inner.storage.len());
        for id in inner.storage.list_ids_in_order() {
            if let Some(record) = inner.storage.get(&id)? {
                vectors.push(record.vector);
            }
        }
        inner
            .quantizer
            .as_mut()
            .expect("checked above")
            .train(&vectors)?;

        info!(vectors = vectors.len(), "Quantizer trained");
        Ok(())
    }

    // =========================================================================
    // Persistence binding
    // =========================================================================

    /// Saves vectors, metadata, and the index snapshot into `dir`.
    ///
    /// Requires a bound [`PersistenceManager`]. Writes three files:
    /// `vectors.bin`, `index.json`, and `state.json`.
    #[instrument(skip(self), fields(dir = %dir.as_ref().display()))]
    pub fn save_to(&self, dir: impl AsRef<std::path::Path>) -> Result<()> {
        let dir = dir.as_ref();
        let persistence = self
            .persistence
            .as_ref()
            .ok_or_else(|| ProximaError::persistence("no persistence manager bound"))?;

        let inner = self.read()?;
        inner.ensure_ready()?;

        let ids = inner.storage.list_ids_in_order();
        let mut vectors = Vec::with_capacity(ids.len());
        let mut metadata_map = serde_json::Map::new();
        for id in &ids {
            let record = inner.storage.get(id)?.ok_or_else(|| {
                ProximaError::persistence(format!("record {id} vanished during save"))
            })?;
            vectors.push(record.vector);
            if let Some(metadata) = record.metadata {
                metadata_map.insert(id.as_str().to_string(), json!(metadata));
            }
        }

        persistence.save_vectors(dir.join(VECTORS_FILE), &ids, &vectors)?;
        persistence.save_index(dir.join(INDEX_FILE), inner.index.as_ref())?;

        let state = json!({
            "kind": STATE_KIND,
            "version": STATE_VERSION,
            "state": {
                "dimension": self.config.dimension,
                "metric": self.config.metric().name(),
                "index_type": inner.index.kind(),
                "storage_type": inner.storage.kind(),
                "metadata": metadata_map,
            },
        });
        persistence.save_state(dir.join(STATE_FILE), &state)?;

        info!(vectors = ids.len(), "Saved database snapshot");
        Ok(())
    }

    /// Restores vectors, metadata, and the index snapshot from `dir`,
    /// replacing the current contents.
    ///
    /// The state document's `(kind, version)` tags and dimension are
    /// checked before anything is replaced.
    #[instrument(skip(self), fields(dir = %dir.as_ref().display()))]
    pub fn load_from(&self, dir: impl AsRef<std::path::Path>) -> Result<()> {
        let dir = dir.as_ref();
        let persistence = self
            .persistence
            .as_ref()
            .ok_or_else(|| ProximaError::persistence("no persistence manager bound"))?;

        let state_doc = persistence.load_state(dir.join(STATE_FILE))?;
        let state = untag_snapshot(STATE_KIND, STATE_VERSION, &state_doc)?;
        let snapshot_dimension = state
            .get("dimension")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| ProximaError::persistence("state document missing dimension"))?;
        if snapshot_dimension as usize != self.config.dimension {
            return Err(ProximaError::persistence(format!(
                "snapshot dimension {snapshot_dimension} does not match configured {}",
                self.config.dimension
            )));
        }
        let metadata_map = state
            .get("metadata")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        let (ids, vectors) = persistence.load_vectors(dir.join(VECTORS_FILE))?;

        let mut inner = self.write()?;
        inner.ensure_ready()?;

        // Replace storage contents
        for id in inner.storage.list_ids_in_order() {
            inner.storage.delete(&id)?;
        }
        for (id, vector) in ids.iter().zip(vectors) {
            let metadata = metadata_map
                .get(id.as_str())
                .and_then(|v| v.as_object())
                .cloned();
            inner.storage.put(VectorRecord {
                id: id.clone(),
                vector,
                metadata,
            })?;
        }

        // Index snapshot replaces the graph wholesale
        persistence.load_index(dir.join(INDEX_FILE), inner.index.as_mut())?;

        info!(vectors = ids.len(), "Loaded database snapshot");
        Ok(())
    }
}

/// Core read path shared by `search` and `batch_search`; runs with the
/// read guard held.
fn search_inner(inner: &Inner, query: &[f64], k: usize) -> Result<Vec<SearchResult>> {
    let hits = inner.index.search(query, k)?;

    let mut results = Vec::with_capacity(hits.len());
    for (id, distance) in hits {
        match inner.storage.get(&id)? {
            Some(record) => results.push(SearchResult {
                id,
                distance,
                metadata: record.metadata,
            }),
            // Index and storage disagree; surface what storage still has
            None => warn!(id = %id, "Search hit missing from storage"),
        }
    }
    results.sort_by(|a, b| a.distance.total_cmp(&b.distance).then_with(|| a.id.cmp(&b.id)));
    results.truncate(k);
    Ok(results)
}

/// Core update path shared by `update` and `batch_update`; runs with the
/// write guard held. Inputs are already validated.
fn apply_update(
    inner: &mut Inner,
    id: &VectorId,
    vector: Option<Vec<f64>>,
    metadata: Option<Metadata>,
) -> Result<()> {
    let old = inner
        .storage
        .get(id)?
        .ok_or_else(|| ProximaError::not_found(id))?;

    let vector_changed = vector.is_some();
    let updated = VectorRecord {
        id: id.clone(),
        vector: vector.unwrap_or_else(|| old.vector.clone()),
        metadata: match metadata {
            Some(metadata) => Some(metadata),
            None => old.metadata.clone(),
        },
    };

    inner.storage.put(updated.clone())?;
    if vector_changed {
        if let Err(e) = inner.index.update(id, &updated.vector) {
            // Compensate: put the old record back so storage and index agree
            let _ = inner.storage.put(old);
            return Err(e);
        }
    }
    Ok(())
}

fn encode_cursor(id: &VectorId) -> String {
    BASE64.encode(id.as_str().as_bytes())
}

fn decode_cursor(cursor: &str) -> Result<VectorId> {
    let bytes = BASE64
        .decode(cursor)
        .map_err(|_| ValidationError::invalid_field("cursor", "not a valid cursor"))?;
    let id = String::from_utf8(bytes)
        .map_err(|_| ValidationError::invalid_field("cursor", "not a valid cursor"))?;
    Ok(VectorId::new(id))
}

// VectorDb is auto Send + Sync: every component trait requires Send + Sync
// and the facade state sits behind an RwLock.
