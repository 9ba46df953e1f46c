//! IVF (inverted file) index with a k-means coarse quantizer.
//!
//! Training runs k-means++ over the current population, either implicitly
//! on the first insert batch or explicitly via [`IvfIndex::train`]. After
//! training, every vector is assigned to its nearest centroid's posting
//! list; queries rank cells by centroid distance and exhaustively re-rank
//! the members of the closest `num_probes` cells.

use std::collections::HashMap;

use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::IndexConfig;
use crate::distance::Metric;
use crate::error::{IndexError, ProximaError, Result};
use crate::index::{make_rng, rank_candidates, tag_snapshot, untag_snapshot, Index};
use crate::kmeans;
use crate::types::VectorId;

const SNAPSHOT_KIND: &str = "ivf";
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Entry {
    id: VectorId,
    vector: Vec<f64>,
    /// Cell index after training; unused while untrained.
    cell: usize,
}

/// Inverted-file index.
pub struct IvfIndex {
    dimension: usize,
    metric: Metric,
    num_clusters: usize,
    num_probes: usize,
    max_iterations: usize,
    convergence_threshold: f64,
    rng: ChaCha8Rng,
    entries: Vec<Option<Entry>>,
    ids: HashMap<VectorId, u32>,
    free: Vec<u32>,
    /// Fixed after training.
    centroids: Vec<Vec<f64>>,
    /// Posting lists of slot indices, one per centroid.
    cells: Vec<Vec<u32>>,
}

#[derive(Serialize, Deserialize)]
struct IvfSnapshot {
    dimension: usize,
    metric: Metric,
    num_clusters: usize,
    centroids: Vec<Vec<f64>>,
    records: Vec<Entry>,
}

impl IvfIndex {
    /// Creates an empty, untrained IVF index from a validated
    /// `IndexConfig::Ivf`.
    pub fn new(dimension: usize, config: IndexConfig) -> Result<Self> {
        let IndexConfig::Ivf {
            metric,
            num_clusters,
            num_probes,
            max_iterations,
            convergence_threshold,
            seed,
        } = config
        else {
            return Err(ProximaError::config("expected an IVF index config"));
        };

        Ok(Self {
            dimension,
            metric,
            num_clusters,
            num_probes,
            max_iterations,
            convergence_threshold,
            rng: make_rng(seed),
            entries: Vec::new(),
            ids: HashMap::new(),
            free: Vec::new(),
            centroids: Vec::new(),
            cells: Vec::new(),
        })
    }

    /// True once centroids have been trained.
    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    /// Runs k-means over the current population and reassigns every
    /// vector. Explicit retraining discards previous centroids.
    pub fn train(&mut self) -> Result<()> {
        let live: Vec<u32> = (0..self.entries.len() as u32)
            .filter(|&slot| self.entries[slot as usize].is_some())
            .collect();
        if live.is_empty() {
            return Err(IndexError::invariant("cannot train IVF on an empty index").into());
        }

        let points: Vec<&[f64]> = live
            .iter()
            .map(|&slot| {
                self.entries[slot as usize]
                    .as_ref()
                    .expect("live slot")
                    .vector
                    .as_slice()
            })
            .collect();

        let result = kmeans::run(
            &points,
            self.num_clusters,
            self.max_iterations,
            self.convergence_threshold,
            &mut self.rng,
        );

        self.centroids = result.centroids;
        self.cells = vec![Vec::new(); self.centroids.len()];
        for (&slot, &cell) in live.iter().zip(result.assignments.iter()) {
            self.entries[slot as usize]
                .as_mut()
                .expect("live slot")
                .cell = cell;
            self.cells[cell].push(slot);
        }

        debug!(
            cells = self.centroids.len(),
            vectors = live.len(),
            iterations = result.iterations,
            "Trained IVF coarse quantizer"
        );
        Ok(())
    }

    fn store(&mut self, id: &VectorId, vector: &[f64]) -> Result<u32> {
        if self.ids.contains_key(id) {
            return Err(IndexError::invariant(format!("duplicate id {id}")).into());
        }
        let entry = Entry {
            id: id.clone(),
            vector: vector.to_vec(),
            cell: 0,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.entries[slot as usize] = Some(entry);
                slot
            }
            None => {
                self.entries.push(Some(entry));
                (self.entries.len() - 1) as u32
            }
        };
        self.ids.insert(id.clone(), slot);
        Ok(slot)
    }

    /// Assigns a stored slot to its nearest cell's posting list.
    fn assign(&mut self, slot: u32) {
        let cell = {
            let entry = self.entries[slot as usize].as_ref().expect("stored slot");
            kmeans::nearest_centroid(&entry.vector, &self.centroids)
        };
        self.entries[slot as usize]
            .as_mut()
            .expect("stored slot")
            .cell = cell;
        self.cells[cell].push(slot);
    }

    /// Cells ranked by centroid distance, ties broken by lower cell index
    /// (`sort_by` is stable over the index-ordered centroid list).
    fn ranked_cells(&self, query: &[f64]) -> Vec<usize> {
        let mut scored: Vec<(usize, f64)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, self.metric.distance(query, c)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.into_iter().map(|(i, _)| i).collect()
    }
}

impl Index for IvfIndex {
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        SNAPSHOT_KIND
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn insert(&mut self, id: &VectorId, vector: &[f64]) -> Result<()> {
        let slot = self.store(id, vector)?;
        if self.is_trained() {
            self.assign(slot);
        } else {
            // Implicit training on first insert covers the population
            // present at that moment
            self.train()?;
        }
        Ok(())
    }

    fn insert_batch(&mut self, items: &[(VectorId, Vec<f64>)]) -> Result<()> {
        if self.is_trained() {
            for (id, vector) in items {
                self.insert(id, vector)?;
            }
            return Ok(());
        }

        // Store the whole batch first so implicit training sees all of it
        let slots: Vec<u32> = items
            .iter()
            .map(|(id, vector)| self.store(id, vector))
            .collect::<Result<_>>()?;
        if slots.is_empty() {
            return Ok(());
        }
        self.train()
    }

    fn remove(&mut self, id: &VectorId) -> Result<bool> {
        let Some(slot) = self.ids.remove(id) else {
            return Ok(false);
        };
        let entry = self.entries[slot as usize].take().expect("mapped slot");
        if self.is_trained() {
            self.cells[entry.cell].retain(|&member| member != slot);
        }
        self.free.push(slot);
        Ok(true)
    }

    fn search(&self, query: &[f64], k: usize) -> Result<Vec<(VectorId, f64)>> {
        if !self.is_trained() || k == 0 {
            return Ok(Vec::new());
        }

        let probes = self.num_probes.min(self.cells.len());
        let mut scored: Vec<(VectorId, f64)> = Vec::new();
        for cell in self.ranked_cells(query).into_iter().take(probes) {
            for &slot in &self.cells[cell] {
                let entry = self.entries[slot as usize].as_ref().expect("posted slot");
                scored.push((entry.id.clone(), self.metric.distance(query, &entry.vector)));
            }
        }

        Ok(rank_candidates(scored, k))
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn contains(&self, id: &VectorId) -> bool {
        self.ids.contains_key(id)
    }

    fn stats(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut stats = serde_json::Map::new();
        stats.insert("type".into(), json!(self.kind()));
        stats.insert("vector_count".into(), json!(self.len()));
        stats.insert("metric".into(), json!(self.metric.name()));
        stats.insert("trained".into(), json!(self.is_trained()));
        stats.insert("num_clusters".into(), json!(self.num_clusters));
        stats.insert("active_cells".into(), json!(self.centroids.len()));
        stats.insert("num_probes".into(), json!(self.num_probes));
        stats
    }

    fn snapshot(&self) -> Result<serde_json::Value> {
        let state = IvfSnapshot {
            dimension: self.dimension,
            metric: self.metric,
            num_clusters: self.num_clusters,
            centroids: self.centroids.clone(),
            records: self.entries.iter().flatten().cloned().collect(),
        };
        let state = serde_json::to_value(&state)
            .map_err(|e| IndexError::malformed(format!("serialize: {e}")))?;
        Ok(tag_snapshot(SNAPSHOT_KIND, SNAPSHOT_VERSION, state))
    }

    fn restore(&mut self, snapshot: &serde_json::Value) -> Result<()> {
        let state = untag_snapshot(SNAPSHOT_KIND, SNAPSHOT_VERSION, snapshot)?;
        let state: IvfSnapshot = serde_json::from_value(state.clone())
            .map_err(|e| IndexError::malformed(format!("deserialize: {e}")))?;
        if state.dimension != self.dimension {
            return Err(IndexError::malformed(format!(
                "snapshot dimension {} does not match index dimension {}",
                state.dimension, self.dimension
            ))
            .into());
        }

        self.entries.clear();
        self.ids.clear();
        self.free.clear();
        self.centroids = state.centroids;
        self.cells = vec![Vec::new(); self.centroids.len()];
        for entry in state.records {
            let slot = self.entries.len() as u32;
            self.ids.insert(entry.id.clone(), slot);
            if !self.centroids.is_empty() {
                self.cells[entry.cell].push(slot);
            }
            self.entries.push(Some(entry));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.entries.clear();
        self.ids.clear();
        self.free.clear();
        self.centroids.clear();
        self.cells.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(num_clusters: usize, num_probes: usize, seed: u64) -> IndexConfig {
        IndexConfig::Ivf {
            metric: Metric::Euclidean,
            num_clusters,
            num_probes,
            max_iterations: 25,
            convergence_threshold: 1e-4,
            seed: Some(seed),
        }
    }

    /// Four tight blobs at the corners of a square.
    fn blob_batch() -> Vec<(VectorId, Vec<f64>)> {
        let centers = [[0.0, 0.0], [10.0, 0.0], [0.0, 10.0], [10.0, 10.0]];
        let mut items = Vec::new();
        for (b, center) in centers.iter().enumerate() {
            for i in 0..10 {
                let jitter = i as f64 * 0.01;
                items.push((
                    VectorId::new(format!("b{b}-{i}")),
                    vec![center[0] + jitter, center[1] + jitter],
                ));
            }
        }
        items
    }

    #[test]
    fn test_implicit_training_on_first_batch() {
        let mut index = IvfIndex::new(2, config(4, 2, 42)).unwrap();
        assert!(!index.is_trained());

        index.insert_batch(&blob_batch()).unwrap();
        assert!(index.is_trained());
        assert_eq!(index.centroids.len(), 4);
        assert_eq!(index.len(), 40);
    }

    #[test]
    fn test_search_finds_blob_members() {
        let mut index = IvfIndex::new(2, config(4, 2, 42)).unwrap();
        index.insert_batch(&blob_batch()).unwrap();

        let results = index.search(&[10.0, 10.0], 5).unwrap();
        assert_eq!(results.len(), 5);
        for (id, _) in &results {
            assert!(id.as_str().starts_with("b3-"), "unexpected hit {id}");
        }
        for w in results.windows(2) {
            assert!(w[0].1 <= w[1].1);
        }
    }

    #[test]
    fn test_insert_after_training_assigns_to_nearest_cell() {
        let mut index = IvfIndex::new(2, config(4, 4, 42)).unwrap();
        index.insert_batch(&blob_batch()).unwrap();

        index.insert(&VectorId::new("late"), &[9.9, 9.9]).unwrap();
        let results = index.search(&[9.9, 9.9], 1).unwrap();
        assert_eq!(results[0].0, VectorId::new("late"));
    }

    #[test]
    fn test_deterministic_with_seed() {
        let run = || {
            let mut index = IvfIndex::new(2, config(4, 2, 7)).unwrap();
            index.insert_batch(&blob_batch()).unwrap();
            index
                .search(&[1.0, 1.0], 10)
                .unwrap()
                .into_iter()
                .map(|(id, _)| id)
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_remove_clears_posting_list() {
        let mut index = IvfIndex::new(2, config(4, 4, 42)).unwrap();
        index.insert_batch(&blob_batch()).unwrap();

        assert!(index.remove(&VectorId::new("b0-0")).unwrap());
        assert!(!index.remove(&VectorId::new("b0-0")).unwrap());
        assert_eq!(index.len(), 39);

        let results = index.search(&[0.0, 0.0], 40).unwrap();
        assert!(results.iter().all(|(id, _)| *id != VectorId::new("b0-0")));
    }

    #[test]
    fn test_untrained_search_is_empty() {
        let index = IvfIndex::new(2, config(4, 2, 42)).unwrap();
        assert!(index.search(&[0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_population_smaller_than_clusters() {
        let mut index = IvfIndex::new(2, config(8, 8, 42)).unwrap();
        index
            .insert_batch(&[
                (VectorId::new("a"), vec![0.0, 0.0]),
                (VectorId::new("b"), vec![5.0, 5.0]),
            ])
            .unwrap();
        // k is capped at the population; both points remain searchable
        assert!(index.centroids.len() <= 2);
        let results = index.search(&[0.1, 0.1], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, VectorId::new("a"));
    }

    #[test]
    fn test_explicit_retrain_after_drift() {
        let mut index = IvfIndex::new(2, config(2, 2, 42)).unwrap();
        index
            .insert_batch(&[
                (VectorId::new("a"), vec![0.0, 0.0]),
                (VectorId::new("b"), vec![0.1, 0.1]),
            ])
            .unwrap();

        // Population drifts far from the trained centroids
        for i in 0..10 {
            index
                .insert(&VectorId::new(format!("far-{i}")), &[100.0 + i as f64, 100.0])
                .unwrap();
        }
        index.train().unwrap();
        assert_eq!(index.centroids.len(), 2);

        let results = index.search(&[105.0, 100.0], 3).unwrap();
        assert!(results.iter().all(|(id, _)| id.as_str().starts_with("far-")));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut index = IvfIndex::new(2, config(4, 2, 42)).unwrap();
        index.insert_batch(&blob_batch()).unwrap();
        index.remove(&VectorId::new("b1-5")).unwrap();

        let snapshot = index.snapshot().unwrap();
        let mut restored = IvfIndex::new(2, config(4, 2, 42)).unwrap();
        restored.restore(&snapshot).unwrap();

        assert_eq!(restored.len(), 39);
        assert!(restored.is_trained());
        let results = restored.search(&[10.0, 10.0], 3).unwrap();
        assert!(results[0].0.as_str().starts_with("b3-"));
    }

    #[test]
    fn test_stats_keys() {
        let mut index = IvfIndex::new(2, config(4, 2, 42)).unwrap();
        index.insert_batch(&blob_batch()).unwrap();
        let stats = index.stats();
        assert_eq!(stats["type"], json!("ivf"));
        assert_eq!(stats["trained"], json!(true));
        assert_eq!(stats["active_cells"], json!(4));
    }
}
