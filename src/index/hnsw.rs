//! HNSW (hierarchical navigable small world) graph index.
//!
//! A skip-list of proximity graphs: layer 0 holds every node, each higher
//! layer an exponentially sparser subset. Nodes live in a dense arena and
//! are addressed by `u32` slot everywhere inside the graph; external
//! string IDs are mapped at the boundary.
//!
//! Deletion tombstones the node: its slot stays in the graph and keeps
//! routing traffic, but it is filtered from search results. Entry-point
//! deletion promotes the highest live node so the entry point is always
//! live while any live node exists.

use std::collections::{BinaryHeap, HashMap, HashSet};
use std::cmp::Reverse;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::IndexConfig;
use crate::distance::Metric;
use crate::error::{IndexError, ProximaError, Result};
use crate::index::{make_rng, tag_snapshot, untag_snapshot, Index, Neighbor};
use crate::types::VectorId;

const SNAPSHOT_KIND: &str = "hnsw";
const SNAPSHOT_VERSION: u32 = 1;

/// Hard cap on layer assignment; with m >= 2 the geometric draw reaches
/// this only with vanishing probability.
const MAX_LAYER: usize = 16;

/// One arena slot: the vector, its per-layer neighbor lists, and the
/// tombstone flag.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct Node {
    id: VectorId,
    vector: Vec<f64>,
    /// `neighbors[layer]` for layers `0..=top_layer`. Lists are deduped
    /// and never contain the node's own slot.
    neighbors: Vec<Vec<u32>>,
    deleted: bool,
}

impl Node {
    #[inline]
    fn top_layer(&self) -> usize {
        self.neighbors.len() - 1
    }
}

/// Multi-layer proximity graph index.
pub struct HnswIndex {
    dimension: usize,
    metric: Metric,
    m: usize,
    m_max0: usize,
    ef_construction: usize,
    ef_search: usize,
    /// Level multiplier `1 / ln(m)` for the geometric layer draw.
    level_mult: f64,
    rng: ChaCha8Rng,
    nodes: Vec<Node>,
    /// Live IDs only; tombstoned slots are absent.
    ids: HashMap<VectorId, u32>,
    entry_point: Option<u32>,
}

#[derive(Serialize, Deserialize)]
struct HnswSnapshot {
    dimension: usize,
    metric: Metric,
    m: usize,
    ef_construction: usize,
    ef_search: usize,
    entry_point: Option<u32>,
    nodes: Vec<Node>,
}

impl HnswIndex {
    /// Creates an empty HNSW index from a validated `IndexConfig::Hnsw`.
    pub fn new(dimension: usize, config: IndexConfig) -> Result<Self> {
        let IndexConfig::Hnsw {
            metric,
            m,
            ef_construction,
            ef_search,
            seed,
        } = config
        else {
            return Err(ProximaError::config("expected an HNSW index config"));
        };

        Ok(Self {
            dimension,
            metric,
            m,
            m_max0: m * 2,
            ef_construction,
            ef_search,
            level_mult: 1.0 / (m as f64).ln(),
            rng: make_rng(seed),
            nodes: Vec::new(),
            ids: HashMap::new(),
            entry_point: None,
        })
    }

    /// Draws a layer from the geometric distribution
    /// `floor(-ln(U) * 1/ln(m))`, capped at [`MAX_LAYER`].
    fn random_level(&mut self) -> usize {
        let u: f64 = self.rng.gen_range(f64::EPSILON..=1.0);
        let level = (-u.ln() * self.level_mult).floor() as usize;
        level.min(MAX_LAYER)
    }

    #[inline]
    fn dist(&self, a: &[f64], b: &[f64]) -> f64 {
        self.metric.distance(a, b)
    }

    #[inline]
    fn layer_cap(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m_max0
        } else {
            self.m
        }
    }

    /// Single-candidate greedy walk on one layer: hop to the closest
    /// neighbor until no neighbor improves. Tombstoned nodes still route.
    fn greedy_step(&self, query: &[f64], start: u32, layer: usize) -> u32 {
        let mut current = start;
        let mut current_dist = self.dist(query, &self.nodes[current as usize].vector);
        loop {
            let mut improved = false;
            for &n in &self.nodes[current as usize].neighbors[layer] {
                let d = self.dist(query, &self.nodes[n as usize].vector);
                if d < current_dist {
                    current = n;
                    current_dist = d;
                    improved = true;
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Beam search on one layer with frontier capacity `ef`.
    ///
    /// Traversal crosses tombstoned nodes; with `live_only` they are kept
    /// out of the returned set. Returns neighbors sorted ascending.
    fn search_layer(
        &self,
        query: &[f64],
        entry_points: &[u32],
        ef: usize,
        layer: usize,
        live_only: bool,
    ) -> Vec<Neighbor> {
        let mut visited: HashSet<u32> = HashSet::new();
        let mut candidates: BinaryHeap<Reverse<Neighbor>> = BinaryHeap::new();
        let mut results: BinaryHeap<Neighbor> = BinaryHeap::new();

        for &ep in entry_points {
            if !visited.insert(ep) {
                continue;
            }
            let node = &self.nodes[ep as usize];
            let neighbor = Neighbor {
                dist: self.dist(query, &node.vector),
                slot: ep,
            };
            candidates.push(Reverse(neighbor));
            if !live_only || !node.deleted {
                results.push(neighbor);
            }
        }

        while let Some(Reverse(current)) = candidates.pop() {
            if results.len() >= ef {
                if let Some(worst) = results.peek() {
                    if current.dist > worst.dist {
                        break;
                    }
                }
            }

            for &n in &self.nodes[current.slot as usize].neighbors[layer] {
                if !visited.insert(n) {
                    continue;
                }
                let node = &self.nodes[n as usize];
                let d = self.dist(query, &node.vector);
                let worst_dist = results.peek().map(|w| w.dist);
                if results.len() < ef || worst_dist.is_some_and(|w| d < w) {
                    let neighbor = Neighbor { dist: d, slot: n };
                    candidates.push(Reverse(neighbor));
                    if !live_only || !node.deleted {
                        results.push(neighbor);
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        let mut sorted = results.into_vec();
        sorted.sort();
        sorted
    }

    /// Diverse-neighbor selection: pop the closest remaining candidate and
    /// keep it only if no already-kept neighbor is closer to it than it is
    /// to the query point.
    fn select_heuristic(&self, candidates: &[Neighbor], m: usize) -> Vec<u32> {
        let mut selected: Vec<Neighbor> = Vec::with_capacity(m);
        for &candidate in candidates {
            if selected.len() >= m {
                break;
            }
            let candidate_vec = &self.nodes[candidate.slot as usize].vector;
            let dominated = selected.iter().any(|kept| {
                self.dist(candidate_vec, &self.nodes[kept.slot as usize].vector)
                    < candidate.dist
            });
            if !dominated {
                selected.push(candidate);
            }
        }
        selected.into_iter().map(|n| n.slot).collect()
    }

    /// Re-runs the heuristic selector over a node's neighbor list to
    /// bring it back under the layer cap.
    fn prune_neighbors(&mut self, slot: u32, layer: usize, cap: usize) {
        let anchor = self.nodes[slot as usize].vector.clone();
        let mut scored: Vec<Neighbor> = self.nodes[slot as usize].neighbors[layer]
            .iter()
            .map(|&n| Neighbor {
                dist: self.dist(&anchor, &self.nodes[n as usize].vector),
                slot: n,
            })
            .collect();
        scored.sort();
        let kept = self.select_heuristic(&scored, cap);
        self.nodes[slot as usize].neighbors[layer] = kept;
    }

    /// Promotes the highest live node to entry point after the current
    /// one is tombstoned. `None` when no live node remains.
    fn elect_entry_point(&self) -> Option<u32> {
        let mut best: Option<(usize, u32)> = None;
        for (slot, node) in self.nodes.iter().enumerate() {
            if node.deleted {
                continue;
            }
            let top = node.top_layer();
            if best.map_or(true, |(best_top, _)| top > best_top) {
                best = Some((top, slot as u32));
            }
        }
        best.map(|(_, slot)| slot)
    }

    /// Number of tombstoned slots still routing traffic.
    pub fn tombstone_count(&self) -> usize {
        self.nodes.len() - self.ids.len()
    }
}

impl Index for HnswIndex {
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

        let level = self.random_level();
        let slot = self.nodes.len() as u32;
        self.nodes.push(Node {
            id: id.clone(),
            vector: vector.to_vec(),
            neighbors: vec![Vec::new(); level + 1],
            deleted: false,
        });
        self.ids.insert(id.clone(), slot);

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(slot);
            return Ok(());
        };

        let query = vector.to_vec();
        let entry_top = self.nodes[entry as usize].top_layer();

        // Greedy descent through layers above the new node's level
        let mut current = entry;
        for layer in ((level + 1)..=entry_top).rev() {
            current = self.greedy_step(&query, current, layer);
        }

        // Beam search and connect on each shared layer, top-down
        let mut entry_points = vec![current];
        for layer in (0..=level.min(entry_top)).rev() {
            let found =
                self.search_layer(&query, &entry_points, self.ef_construction, layer, true);
            let candidates: Vec<Neighbor> =
                found.iter().copied().filter(|n| n.slot != slot).collect();

            let cap = self.layer_cap(layer);
            let selected = self.select_heuristic(&candidates, cap);
            self.nodes[slot as usize].neighbors[layer] = selected.clone();

            for n in selected {
                let list = &mut self.nodes[n as usize].neighbors[layer];
                if !list.contains(&slot) {
                    list.push(slot);
                }
                if self.nodes[n as usize].neighbors[layer].len() > cap {
                    self.prune_neighbors(n, layer, cap);
                }
            }

            if !candidates.is_empty() {
                entry_points = candidates.iter().map(|n| n.slot).collect();
            }
        }

        if level > entry_top {
            debug!(slot, level, "Promoted new HNSW entry point");
            self.entry_point = Some(slot);
        }

        Ok(())
    }

    fn remove(&mut self, id: &VectorId) -> Result<bool> {
        let Some(slot) = self.ids.remove(id) else {
            return Ok(false);
        };
        self.nodes[slot as usize].deleted = true;

        if self.entry_point == Some(slot) {
            self.entry_point = self.elect_entry_point();
        }
        Ok(true)
    }

    fn search(&self, query: &[f64], k: usize) -> Result<Vec<(VectorId, f64)>> {
        let Some(entry) = self.entry_point else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let entry_top = self.nodes[entry as usize].top_layer();
        let mut current = entry;
        for layer in (1..=entry_top).rev() {
            current = self.greedy_step(query, current, layer);
        }

        let ef = self.ef_search.max(k);
        let found = self.search_layer(query, &[current], ef, 0, true);

        let mut results: Vec<(VectorId, f64)> = found
            .into_iter()
            .map(|n| (self.nodes[n.slot as usize].id.clone(), n.dist))
            .collect();
        results.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        results.truncate(k);
        Ok(results)
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn contains(&self, id: &VectorId) -> bool {
        self.ids.contains_key(id)
    }

    fn stats(&self) -> serde_json::Map<String, serde_json::Value> {
        let max_layer = self
            .entry_point
            .map(|ep| self.nodes[ep as usize].top_layer())
            .unwrap_or(0);
        let mut stats = serde_json::Map::new();
        stats.insert("type".into(), json!(self.kind()));
        stats.insert("vector_count".into(), json!(self.len()));
        stats.insert("metric".into(), json!(self.metric.name()));
        stats.insert("m".into(), json!(self.m));
        stats.insert("ef_construction".into(), json!(self.ef_construction));
        stats.insert("ef_search".into(), json!(self.ef_search));
        stats.insert("max_layer".into(), json!(max_layer));
        stats.insert("tombstones".into(), json!(self.tombstone_count()));
        stats
    }

    fn snapshot(&self) -> Result<serde_json::Value> {
        let state = HnswSnapshot {
            dimension: self.dimension,
            metric: self.metric,
            m: self.m,
            ef_construction: self.ef_construction,
            ef_search: self.ef_search,
            entry_point: self.entry_point,
            nodes: self.nodes.clone(),
        };
        let state = serde_json::to_value(&state)
            .map_err(|e| IndexError::malformed(format!("serialize: {e}")))?;
        Ok(tag_snapshot(SNAPSHOT_KIND, SNAPSHOT_VERSION, state))
    }

    fn restore(&mut self, snapshot: &serde_json::Value) -> Result<()> {
        let state = untag_snapshot(SNAPSHOT_KIND, SNAPSHOT_VERSION, snapshot)?;
        let state: HnswSnapshot = serde_json::from_value(state.clone())
            .map_err(|e| IndexError::malformed(format!("deserialize: {e}")))?;
        if state.dimension != self.dimension {
            return Err(IndexError::malformed(format!(
                "snapshot dimension {} does not match index dimension {}",
                state.dimension, self.dimension
            ))
            .into());
        }
        if state.m != self.m {
            return Err(IndexError::malformed(format!(
                "snapshot m {} does not match configured m {}",
                state.m, self.m
            ))
            .into());
        }

        self.ids.clear();
        for (slot, node) in state.nodes.iter().enumerate() {
            if !node.deleted {
                self.ids.insert(node.id.clone(), slot as u32);
            }
        }
        self.nodes = state.nodes;
        self.entry_point = state.entry_point;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.nodes.clear();
        self.ids.clear();
        self.entry_point = None;
        Ok(())
    }
}
