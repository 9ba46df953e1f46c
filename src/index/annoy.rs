//! Annoy-style random-projection forest.
//!
//! `num_trees` binary trees, each built by recursively splitting the
//! point set with the perpendicular bisector of two random pivots until
//! leaves hold at most `max_leaf_size` points. Trees are immutable once
//! built; any insert or remove marks the forest dirty and the next
//! search rebuilds it from the live point set.
//!
//! Search descends all trees best-first through one shared priority
//! queue keyed by signed distance to the splitting planes, collects
//! `search_k` candidates (default `num_trees * k`), and re-ranks them
//! exactly under the configured metric.

use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::RwLock;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::IndexConfig;
use crate::distance::{dot, Metric};
use crate::error::{IndexError, ProximaError, Result};
use crate::index::{make_rng, rank_candidates, tag_snapshot, untag_snapshot, Index};
use crate::types::VectorId;

const SNAPSHOT_KIND: &str = "annoy";
const SNAPSHOT_VERSION: u32 = 1;

/// Attempts to find two distinct pivots before giving up on a split.
const PIVOT_ATTEMPTS: usize = 8;

#[derive(Clone, Debug)]
enum TreeNode {
    Leaf {
        members: Vec<u32>,
    },
    Split {
        normal: Vec<f64>,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Clone, Debug)]
struct Tree {
    nodes: Vec<TreeNode>,
    root: usize,
}

/// Built trees plus the RNG that seeds rebuilds. Behind a lock because
/// searches (`&self`) trigger lazy rebuilds after mutations.
struct Forest {
    trees: Vec<Tree>,
    dirty: bool,
    rng: ChaCha8Rng,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Entry {
    id: VectorId,
    vector: Vec<f64>,
}

/// Random-projection forest index.
pub struct AnnoyIndex {
    dimension: usize,
    metric: Metric,
    num_trees: usize,
    max_leaf_size: usize,
    search_k: i64,
    entries: Vec<Option<Entry>>,
    ids: HashMap<VectorId, u32>,
    free: Vec<u32>,
    forest: RwLock<Forest>,
}

#[derive(Serialize, Deserialize)]
struct AnnoySnapshot {
    dimension: usize,
    metric: Metric,
    num_trees: usize,
    max_leaf_size: usize,
    records: Vec<Entry>,
}

/// Queue item for best-first forest descent, ordered by priority.
#[derive(Debug, PartialEq)]
struct QueueItem {
    priority: f64,
    tree: usize,
    node: usize,
}

impl Eq for QueueItem {}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority.total_cmp(&other.priority)
    }
}

impl AnnoyIndex {
    /// Creates an empty forest index from a validated `IndexConfig::Annoy`.
    pub fn new(dimension: usize, config: IndexConfig) -> Result<Self> {
        let IndexConfig::Annoy {
            metric,
            num_trees,
            max_leaf_size,
            search_k,
            seed,
        } = config
        else {
            return Err(ProximaError::config("expected an Annoy index config"));
        };

        Ok(Self {
            dimension,
            metric,
            num_trees,
            max_leaf_size,
            search_k,
            entries: Vec::new(),
            ids: HashMap::new(),
            free: Vec::new(),
            forest: RwLock::new(Forest {
                trees: Vec::new(),
                dirty: false,
                rng: make_rng(seed),
            }),
        })
    }

    fn mark_dirty(&mut self) -> Result<()> {
        self.forest
            .get_mut()
            .map_err(|_| ProximaError::lock_poisoned("forest"))?
            .dirty = true;
        Ok(())
    }

    /// Rebuilds the forest if a mutation invalidated it.
    fn ensure_built(&self) -> Result<()> {
        {
            let forest = self
                .forest
                .read()
                .map_err(|_| ProximaError::lock_poisoned("forest"))?;
            if !forest.dirty {
                return Ok(());
            }
        }

        let mut forest = self
            .forest
            .write()
            .map_err(|_| ProximaError::lock_poisoned("forest"))?;
        if !forest.dirty {
            // Another searcher rebuilt while we waited for the lock
            return Ok(());
        }

        let members: Vec<u32> = (0..self.entries.len() as u32)
            .filter(|&slot| self.entries[slot as usize].is_some())
            .collect();
        let forest = &mut *forest;
        let rng = &mut forest.rng;
        forest.trees = (0..self.num_trees)
            .map(|_| {
                let mut nodes = Vec::new();
                let root = self.build_node(&mut nodes, members.clone(), rng);
                Tree { nodes, root }
            })
            .collect();
        forest.dirty = false;

        debug!(
            trees = self.num_trees,
            vectors = members.len(),
            "Rebuilt Annoy forest"
        );
        Ok(())
    }

    /// Recursively builds one subtree, returning its node index.
    fn build_node(
        &self,
        nodes: &mut Vec<TreeNode>,
        members: Vec<u32>,
        rng: &mut ChaCha8Rng,
    ) -> usize {
        if members.len() <= self.max_leaf_size {
            nodes.push(TreeNode::Leaf { members });
            return nodes.len() - 1;
        }

        // Two distinct random pivots define the splitting hyperplane as
        // their perpendicular bisector
        let split = self.pick_split(&members, rng);
        let Some((normal, threshold)) = split else {
            // All points coincide; no plane separates them
            nodes.push(TreeNode::Leaf { members });
            return nodes.len() - 1;
        };

        let mut left_members = Vec::new();
        let mut right_members = Vec::new();
        for &slot in &members {
            let vector = &self.entries[slot as usize].as_ref().expect("live slot").vector;
            if dot(&normal, vector) - threshold <= 0.0 {
                left_members.push(slot);
            } else {
                right_members.push(slot);
            }
        }

        if left_members.is_empty() || right_members.is_empty() {
            nodes.push(TreeNode::Leaf { members });
            return nodes.len() - 1;
        }

        let left = self.build_node(nodes, left_members, rng);
        let right = self.build_node(nodes, right_members, rng);
        nodes.push(TreeNode::Split {
            normal,
            threshold,
            left,
            right,
        });
        nodes.len() - 1
    }

    /// Draws two distinct pivots and returns the bisecting hyperplane,
    /// or `None` when the sampled pivots keep coinciding.
    fn pick_split(&self, members: &[u32], rng: &mut ChaCha8Rng) -> Option<(Vec<f64>, f64)> {
        for _ in 0..PIVOT_ATTEMPTS {
            let a = members[rng.gen_range(0..members.len())];
            let b = members[rng.gen_range(0..members.len())];
            if a == b {
                continue;
            }
            let va = &self.entries[a as usize].as_ref().expect("live slot").vector;
            let vb = &self.entries[b as usize].as_ref().expect("live slot").vector;

            let normal: Vec<f64> = va.iter().zip(vb.iter()).map(|(x, y)| y - x).collect();
            if normal.iter().all(|c| c.abs() < f64::EPSILON) {
                continue;
            }
            let midpoint: Vec<f64> = va.iter().zip(vb.iter()).map(|(x, y)| (x + y) / 2.0).collect();
            let threshold = dot(&normal, &midpoint);
            return Some((normal, threshold));
        }
        None
    }

    fn effective_search_k(&self, k: usize) -> usize {
        if self.search_k == -1 {
            self.num_trees * k
        } else {
            self.search_k as usize
        }
    }
}

impl Index for AnnoyIndex {
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
        self.mark_dirty()
    }

    fn remove(&mut self, id: &VectorId) -> Result<bool> {
        let Some(slot) = self.ids.remove(id) else {
            return Ok(false);
        };
        self.entries[slot as usize] = None;
        self.free.push(slot);
        self.mark_dirty()?;
        Ok(true)
    }

    fn search(&self, query: &[f64], k: usize) -> Result<Vec<(VectorId, f64)>> {
        if k == 0 || self.ids.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_built()?;

        let forest = self
            .forest
            .read()
            .map_err(|_| ProximaError::lock_poisoned("forest"))?;

        let search_k = self.effective_search_k(k);
        let mut queue: BinaryHeap<QueueItem> = BinaryHeap::new();
        for (tree_idx, tree) in forest.trees.iter().enumerate() {
            queue.push(QueueItem {
                priority: f64::INFINITY,
                tree: tree_idx,
                node: tree.root,
            });
        }

        let mut candidates: HashSet<u32> = HashSet::new();
        while let Some(item) = queue.pop() {
            if candidates.len() >= search_k {
                break;
            }
            match &forest.trees[item.tree].nodes[item.node] {
                TreeNode::Leaf { members } => {
                    candidates.extend(members.iter().copied());
                }
                TreeNode::Split {
                    normal,
                    threshold,
                    left,
                    right,
                } => {
                    // Signed distance to the plane; the query's side keeps
                    // the parent priority, the far side is demoted by how
                    // far the query sits from the plane
                    let margin = dot(normal, query) - threshold;
                    queue.push(QueueItem {
                        priority: item.priority.min(-margin),
                        tree: item.tree,
                        node: *left,
                    });
                    queue.push(QueueItem {
                        priority: item.priority.min(margin),
                        tree: item.tree,
                        node: *right,
                    });
                }
            }
        }

        let scored: Vec<(VectorId, f64)> = candidates
            .into_iter()
            .filter_map(|slot| self.entries[slot as usize].as_ref())
            .map(|entry| (entry.id.clone(), self.metric.distance(query, &entry.vector)))
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
        let (tree_count, dirty) = self
            .forest
            .read()
            .map(|f| (f.trees.len(), f.dirty))
            .unwrap_or((0, true));
        let mut stats = serde_json::Map::new();
        stats.insert("type".into(), json!(self.kind()));
        stats.insert("vector_count".into(), json!(self.len()));
        stats.insert("metric".into(), json!(self.metric.name()));
        stats.insert("num_trees".into(), json!(self.num_trees));
        stats.insert("max_leaf_size".into(), json!(self.max_leaf_size));
        stats.insert("built_trees".into(), json!(tree_count));
        stats.insert("needs_rebuild".into(), json!(dirty));
        stats
    }

    fn snapshot(&self) -> Result<serde_json::Value> {
        let state = AnnoySnapshot {
            dimension: self.dimension,
            metric: self.metric,
            num_trees: self.num_trees,
            max_leaf_size: self.max_leaf_size,
            records: self.entries.iter().flatten().cloned().collect(),
        };
        let state = serde_json::to_value(&state)
            .map_err(|e| IndexError::malformed(format!("serialize: {e}")))?;
        Ok(tag_snapshot(SNAPSHOT_KIND, SNAPSHOT_VERSION, state))
    }

    fn restore(&mut self, snapshot: &serde_json::Value) -> Result<()> {
        let state = untag_snapshot(SNAPSHOT_KIND, SNAPSHOT_VERSION, snapshot)?;
        let state: AnnoySnapshot = serde_json::from_value(state.clone())
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
        for entry in state.records {
            let slot = self.entries.len() as u32;
            self.ids.insert(entry.id.clone(), slot);
            self.entries.push(Some(entry));
        }
        // Trees rebuild lazily on the next search
        self.mark_dirty()
    }

    fn close(&mut self) -> Result<()> {
        self.entries.clear();
        self.ids.clear();
        self.free.clear();
        if let Ok(forest) = self.forest.get_mut() {
            forest.trees.clear();
            forest.dirty = false;
        }
        Ok(())
    }
}
