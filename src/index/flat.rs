//! Flat (exhaustive) index.
//!
//! Scans every stored vector and keeps the k smallest distances in a
//! bounded max-heap. Exact by construction; the other indices are tested
//! against it as the correctness oracle.

use std::collections::{BinaryHeap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::distance::Metric;
use crate::error::{IndexError, Result};
use crate::index::{tag_snapshot, untag_snapshot, Index};
use crate::types::VectorId;

const SNAPSHOT_KIND: &str = "flat";
const SNAPSHOT_VERSION: u32 = 1;

/// Heap entry ordered by `(distance, id)` so that ties evict the
/// lexicographically larger ID first.
#[derive(Debug, PartialEq)]
struct Hit {
    dist: f64,
    id: VectorId,
}

impl Eq for Hit {}

impl PartialOrd for Hit {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Hit {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.dist
            .total_cmp(&other.dist)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Exhaustive exact top-k index.
pub struct FlatIndex {
    dimension: usize,
    metric: Metric,
    /// Slot arena; freed slots are reused.
    entries: Vec<Option<(VectorId, Vec<f64>)>>,
    ids: HashMap<VectorId, u32>,
    free: Vec<u32>,
}

#[derive(Serialize, Deserialize)]
struct FlatSnapshot {
    dimension: usize,
    metric: Metric,
    records: Vec<(VectorId, Vec<f64>)>,
}

impl FlatIndex {
    /// Creates an empty flat index.
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            entries: Vec::new(),
            ids: HashMap::new(),
            free: Vec::new(),
        }
    }

    fn store(&mut self, id: VectorId, vector: Vec<f64>) {
        let slot = match self.free.pop() {
            Some(slot) => {
                self.entries[slot as usize] = Some((id.clone(), vector));
                slot
            }
            None => {
                self.entries.push(Some((id.clone(), vector)));
                (self.entries.len() - 1) as u32
            }
        };
        self.ids.insert(id, slot);
    }
}

impl Index for FlatIndex {
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
        if self.ids.contains_key(id) {
            return Err(IndexError::invariant(format!("duplicate id {id}")).into());
        }
        self.store(id.clone(), vector.to_vec());
        Ok(())
    }

    fn remove(&mut self, id: &VectorId) -> Result<bool> {
        match self.ids.remove(id) {
            Some(slot) => {
                self.entries[slot as usize] = None;
                self.free.push(slot);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn search(&self, query: &[f64], k: usize) -> Result<Vec<(VectorId, f64)>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        // Bounded max-heap of size k: the root is the current worst hit
        let mut heap: BinaryHeap<Hit> = BinaryHeap::with_capacity(k + 1);
        for entry in self.entries.iter().flatten() {
            let (id, vector) = entry;
            let dist = self.metric.distance(query, vector);
            if heap.len() < k {
                heap.push(Hit {
                    dist,
                    id: id.clone(),
                });
            } else if let Some(worst) = heap.peek() {
                if dist < worst.dist || (dist == worst.dist && *id < worst.id) {
                    heap.pop();
                    heap.push(Hit {
                        dist,
                        id: id.clone(),
                    });
                }
            }
        }

        let mut results: Vec<(VectorId, f64)> =
            heap.into_iter().map(|hit| (hit.id, hit.dist)).collect();
        results.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(results)
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
        stats
    }

    fn snapshot(&self) -> Result<serde_json::Value> {
        let state = FlatSnapshot {
            dimension: self.dimension,
            metric: self.metric,
            records: self
                .entries
                .iter()
                .flatten()
                .map(|(id, vector)| (id.clone(), vector.clone()))
                .collect(),
        };
        let state = serde_json::to_value(&state)
            .map_err(|e| IndexError::malformed(format!("serialize: {e}")))?;
        Ok(tag_snapshot(SNAPSHOT_KIND, SNAPSHOT_VERSION, state))
    }

    fn restore(&mut self, snapshot: &serde_json::Value) -> Result<()> {
        let state = untag_snapshot(SNAPSHOT_KIND, SNAPSHOT_VERSION, snapshot)?;
        let state: FlatSnapshot = serde_json::from_value(state.clone())
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
        for (id, vector) in state.records {
            self.store(id, vector);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.entries.clear();
        self.ids.clear();
        self.free.clear();
        Ok(())
    }
}
