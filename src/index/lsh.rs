//! LSH (locality-sensitive hashing) index.
//!
//! `num_tables` independent hash tables. Angular metrics (cosine, dot)
//! hash with random hyperplanes: one sign bit per plane packed into the
//! bucket key. Euclidean and Manhattan use p-stable Gaussian projections
//! quantized by `bucket_width`, with the quantized coordinates hashed
//! into a single key.
//!
//! Hash functions are drawn once at initialization and are immutable for
//! the index lifetime, so a vector's bucket keys can always be recomputed
//! from its data (deletion relies on this).

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::IndexConfig;
use crate::distance::{dot, Metric};
use crate::error::{IndexError, ProximaError, Result};
use crate::index::{make_rng, rank_candidates, tag_snapshot, untag_snapshot, Index};
use crate::types::VectorId;

const SNAPSHOT_KIND: &str = "lsh";
const SNAPSHOT_VERSION: u32 = 1;

/// Hash family for one table.
#[derive(Clone, Debug, Serialize, Deserialize)]
enum HashFamily {
    /// Random hyperplanes; the key is the packed sign-bit vector.
    Hyperplane { planes: Vec<Vec<f64>> },

    /// p-stable projections: `floor((v . a + b) / w)` per function, the
    /// quantized coordinates hashed together.
    PStable {
        projections: Vec<Vec<f64>>,
        offsets: Vec<f64>,
        width: f64,
    },
}

impl HashFamily {
    fn key(&self, vector: &[f64]) -> u64 {
        match self {
            HashFamily::Hyperplane { planes } => {
                let mut key = 0u64;
                for (bit, plane) in planes.iter().enumerate() {
                    if dot(vector, plane) >= 0.0 {
                        key |= 1 << bit;
                    }
                }
                key
            }
            HashFamily::PStable {
                projections,
                offsets,
                width,
            } => {
                // DefaultHasher with default keys is deterministic within
                // a process lifetime, which is all bucket lookup needs
                let mut hasher = DefaultHasher::new();
                for (projection, offset) in projections.iter().zip(offsets.iter()) {
                    let cell = ((dot(vector, projection) + offset) / width).floor() as i64;
                    cell.hash(&mut hasher);
                }
                hasher.finish()
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Entry {
    id: VectorId,
    vector: Vec<f64>,
}

/// Multi-table random-projection index.
pub struct LshIndex {
    dimension: usize,
    metric: Metric,
    num_tables: usize,
    num_hash_bits: usize,
    bucket_width: f64,
    seed: Option<u64>,
    families: Vec<HashFamily>,
    /// One bucket map per table: key -> slot members.
    tables: Vec<HashMap<u64, Vec<u32>>>,
    entries: Vec<Option<Entry>>,
    ids: HashMap<VectorId, u32>,
    free: Vec<u32>,
}

#[derive(Serialize, Deserialize)]
struct LshSnapshot {
    dimension: usize,
    metric: Metric,
    num_tables: usize,
    num_hash_bits: usize,
    bucket_width: f64,
    families: Vec<HashFamily>,
    records: Vec<Entry>,
}

impl LshIndex {
    /// Creates an LSH index from a validated `IndexConfig::Lsh`. Hash
    /// functions are drawn in [`Index::initialize`].
    pub fn new(dimension: usize, config: IndexConfig) -> Result<Self> {
        let IndexConfig::Lsh {
            metric,
            num_tables,
            num_hash_bits,
            bucket_width,
            seed,
        } = config
        else {
            return Err(ProximaError::config("expected an LSH index config"));
        };

        Ok(Self {
            dimension,
            metric,
            num_tables,
            num_hash_bits,
            bucket_width,
            seed,
            families: Vec::new(),
            tables: Vec::new(),
            entries: Vec::new(),
            ids: HashMap::new(),
            free: Vec::new(),
        })
    }

    fn draw_families(&mut self) {
        let mut rng = make_rng(self.seed);
        let gaussian_vector = |rng: &mut rand_chacha::ChaCha8Rng, dim: usize| -> Vec<f64> {
            (0..dim).map(|_| rng.sample(StandardNormal)).collect()
        };

        self.families = (0..self.num_tables)
            .map(|_| {
                if self.metric.is_angular() {
                    HashFamily::Hyperplane {
                        planes: (0..self.num_hash_bits)
                            .map(|_| gaussian_vector(&mut rng, self.dimension))
                            .collect(),
                    }
                } else {
                    HashFamily::PStable {
                        projections: (0..self.num_hash_bits)
                            .map(|_| gaussian_vector(&mut rng, self.dimension))
                            .collect(),
                        offsets: (0..self.num_hash_bits)
                            .map(|_| rng.gen_range(0.0..self.bucket_width))
                            .collect(),
                        width: self.bucket_width,
                    }
                }
            })
            .collect();
        self.tables = vec![HashMap::new(); self.num_tables];
    }

    fn bucket_slot(&mut self, slot: u32, vector: &[f64]) {
        for (family, table) in self.families.iter().zip(self.tables.iter_mut()) {
            table.entry(family.key(vector)).or_default().push(slot);
        }
    }

    fn unbucket_slot(&mut self, slot: u32, vector: &[f64]) {
        for (family, table) in self.families.iter().zip(self.tables.iter_mut()) {
            let key = family.key(vector);
            if let Some(members) = table.get_mut(&key) {
                members.retain(|&member| member != slot);
                if members.is_empty() {
                    table.remove(&key);
                }
            }
        }
    }

    fn bucket_count(&self) -> usize {
        self.tables.iter().map(|t| t.len()).sum()
    }
}

impl Index for LshIndex {
    fn initialize(&mut self) -> Result<()> {
        if self.families.is_empty() {
            self.draw_families();
        }
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
        if self.families.is_empty() {
            return Err(IndexError::invariant("LSH index not initialized").into());
        }

        let entry = Entry {
            id: id.clone(),
            vector: vector.to_vec(),
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
        self.bucket_slot(slot, vector);
        Ok(())
    }

    fn remove(&mut self, id: &VectorId) -> Result<bool> {
        let Some(slot) = self.ids.remove(id) else {
            return Ok(false);
        };
        let entry = self.entries[slot as usize].take().expect("mapped slot");
        self.unbucket_slot(slot, &entry.vector);
        self.free.push(slot);
        Ok(true)
    }

    fn search(&self, query: &[f64], k: usize) -> Result<Vec<(VectorId, f64)>> {
        if k == 0 || self.ids.is_empty() {
            return Ok(Vec::new());
        }

        // Union the query's bucket across every table
        let mut candidates: HashSet<u32> = HashSet::new();
        for (family, table) in self.families.iter().zip(self.tables.iter()) {
            if let Some(members) = table.get(&family.key(query)) {
                candidates.extend(members.iter().copied());
            }
        }

        // Exact re-rank; result length is bounded by the candidate set
        let scored: Vec<(VectorId, f64)> = candidates
            .into_iter()
            .map(|slot| {
                let entry = self.entries[slot as usize].as_ref().expect("bucketed slot");
                (entry.id.clone(), self.metric.distance(query, &entry.vector))
            })
            .collect();

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
        stats.insert("num_tables".into(), json!(self.num_tables));
        stats.insert("num_hash_bits".into(), json!(self.num_hash_bits));
        stats.insert("buckets".into(), json!(self.bucket_count()));
        stats
    }

    fn snapshot(&self) -> Result<serde_json::Value> {
        let state = LshSnapshot {
            dimension: self.dimension,
            metric: self.metric,
            num_tables: self.num_tables,
            num_hash_bits: self.num_hash_bits,
            bucket_width: self.bucket_width,
            families: self.families.clone(),
            records: self.entries.iter().flatten().cloned().collect(),
        };
        let state = serde_json::to_value(&state)
            .map_err(|e| IndexError::malformed(format!("serialize: {e}")))?;
        Ok(tag_snapshot(SNAPSHOT_KIND, SNAPSHOT_VERSION, state))
    }

    fn restore(&mut self, snapshot: &serde_json::Value) -> Result<()> {
        let state = untag_snapshot(SNAPSHOT_KIND, SNAPSHOT_VERSION, snapshot)?;
        let state: LshSnapshot = serde_json::from_value(state.clone())
            .map_err(|e| IndexError::malformed(format!("deserialize: {e}")))?;
        if state.dimension != self.dimension {
            return Err(IndexError::malformed(format!(
                "snapshot dimension {} does not match index dimension {}",
                state.dimension, self.dimension
            ))
            .into());
        }

        // Restore the drawn hash functions, then rebucket every record.
        // p-stable keys come from DefaultHasher, which is not guaranteed
        // stable across Rust releases, so buckets are rebuilt rather than
        // persisted.
        self.families = state.families;
        self.tables = vec![HashMap::new(); self.families.len()];
        self.entries.clear();
        self.ids.clear();
        self.free.clear();
        for entry in state.records {
            let slot = self.entries.len() as u32;
            self.ids.insert(entry.id.clone(), slot);
            let vector = entry.vector.clone();
            self.entries.push(Some(entry));
            self.bucket_slot(slot, &vector);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.tables.clear();
        self.entries.clear();
        self.ids.clear();
        self.free.clear();
        Ok(())
    }
}
