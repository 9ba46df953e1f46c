//! Hybrid storage backend: LRU cache fronting the disk log.
//!
//! The cache is write-through and strictly LRU by last read or write.
//! Deletes invalidate the cached entry. The LRU itself is an explicit
//! doubly-linked list threaded through a slab, plus a hash map from ID
//! to slab slot.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use serde_json::json;

use crate::error::{Result, StorageError};
use crate::storage::{DiskStorage, StorageBackend};
use crate::types::{Page, VectorId, VectorRecord};

/// Sentinel slot meaning "no link".
const NIL: usize = usize::MAX;

struct Node {
    id: VectorId,
    record: VectorRecord,
    prev: usize,
    next: usize,
}

/// Fixed-capacity LRU over record clones.
///
/// `head` is the most recently used slot, `tail` the eviction candidate.
struct LruCache {
    capacity: usize,
    map: HashMap<VectorId, usize>,
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
}

impl LruCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    /// Unlinks a slot from the recency list without freeing it.
    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let node = self.slots[slot].as_ref().expect("linked slot is occupied");
            (node.prev, node.next)
        };
        if prev != NIL {
            self.slots[prev].as_mut().expect("occupied").next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.slots[next].as_mut().expect("occupied").prev = prev;
        } else {
            self.tail = prev;
        }
    }

    /// Links a slot at the head (most recently used).
    fn link_front(&mut self, slot: usize) {
        {
            let node = self.slots[slot].as_mut().expect("occupied");
            node.prev = NIL;
            node.next = self.head;
        }
        if self.head != NIL {
            self.slots[self.head].as_mut().expect("occupied").prev = slot;
        }
        self.head = slot;
        if self.tail == NIL {
            self.tail = slot;
        }
    }

    /// Returns a clone of the cached record and promotes it.
    fn get(&mut self, id: &VectorId) -> Option<VectorRecord> {
        let slot = *self.map.get(id)?;
        self.unlink(slot);
        self.link_front(slot);
        Some(
            self.slots[slot]
                .as_ref()
                .expect("occupied")
                .record
                .clone(),
        )
    }

    /// Inserts or refreshes a record at the front, evicting the LRU entry
    /// when at capacity.
    fn insert(&mut self, record: VectorRecord) {
        let id = record.id.clone();
        if let Some(&slot) = self.map.get(&id) {
            self.slots[slot].as_mut().expect("occupied").record = record;
            self.unlink(slot);
            self.link_front(slot);
            return;
        }

        if self.map.len() >= self.capacity {
            self.evict_tail();
        }

        let node = Node {
            id: id.clone(),
            record,
            prev: NIL,
            next: NIL,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.map.insert(id, slot);
        self.link_front(slot);
    }

    fn evict_tail(&mut self) {
        let tail = self.tail;
        if tail == NIL {
            return;
        }
        self.unlink(tail);
        let node = self.slots[tail].take().expect("occupied");
        self.map.remove(&node.id);
        self.free.push(tail);
    }

    fn remove(&mut self, id: &VectorId) {
        if let Some(slot) = self.map.remove(id) {
            self.unlink(slot);
            self.slots[slot] = None;
            self.free.push(slot);
        }
    }

    fn clear(&mut self) {
        self.map.clear();
        self.slots.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
    }
}

/// Write-through LRU cache over a [`DiskStorage`] backend.
pub struct HybridStorage {
    disk: DiskStorage,
    /// Interior mutability: `get` takes `&self` but promotes entries.
    cache: Mutex<LruCache>,
    cache_size: usize,
}

impl HybridStorage {
    /// Creates a hybrid backend rooted at `data_dir` with an LRU cache of
    /// `cache_size` records.
    pub fn new(data_dir: impl AsRef<Path>, cache_size: usize) -> Self {
        Self {
            disk: DiskStorage::new(data_dir),
            cache: Mutex::new(LruCache::new(cache_size.max(1))),
            cache_size: cache_size.max(1),
        }
    }

    fn lock_cache(&self) -> Result<std::sync::MutexGuard<'_, LruCache>> {
        self.cache
            .lock()
            .map_err(|_| StorageError::io("cache lock poisoned").into())
    }

    /// Number of records currently cached. Exposed for tests and stats.
    pub fn cached_len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl StorageBackend for HybridStorage {
    fn initialize(&mut self) -> Result<()> {
        self.disk.initialize()
    }

    fn kind(&self) -> &'static str {
        "hybrid"
    }

    fn put(&mut self, record: VectorRecord) -> Result<()> {
        // Write-through: disk is the source of truth, cache refreshed after
        self.disk.put(record.clone())?;
        self.lock_cache()?.insert(record);
        Ok(())
    }

    fn get(&self, id: &VectorId) -> Result<Option<VectorRecord>> {
        if let Some(hit) = self.lock_cache()?.get(id) {
            return Ok(Some(hit));
        }
        match self.disk.get(id)? {
            Some(record) => {
                self.lock_cache()?.insert(record.clone());
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn delete(&mut self, id: &VectorId) -> Result<bool> {
        let existed = self.disk.delete(id)?;
        self.lock_cache()?.remove(id);
        Ok(existed)
    }

    fn contains(&self, id: &VectorId) -> bool {
        self.disk.contains(id)
    }

    fn len(&self) -> usize {
        self.disk.len()
    }

    fn list_ids_in_order(&self) -> Vec<VectorId> {
        self.disk.list_ids_in_order()
    }

    fn scan_page(&self, after: Option<&VectorId>, limit: usize) -> Result<Page<VectorId>> {
        self.disk.scan_page(after, limit)
    }

    fn stats(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut stats = self.disk.stats();
        stats.insert("type".into(), json!(self.kind()));
        stats.insert("cache_size".into(), json!(self.cache_size));
        stats.insert("cached_records".into(), json!(self.cached_len()));
        stats
    }

    fn close(&mut self) -> Result<()> {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
        self.disk.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(id: &str, value: f64) -> VectorRecord {
        VectorRecord::new(VectorId::new(id), vec![value; 2])
    }

    fn open(dir: &Path, cache_size: usize) -> HybridStorage {
        let mut storage = HybridStorage::new(dir, cache_size);
        storage.initialize().unwrap();
        storage
    }

    #[test]
    fn test_write_through_and_read_back() {
        let dir = tempdir().unwrap();
        let mut storage = open(dir.path(), 4);

        storage.put(record("a", 1.0)).unwrap();
        assert_eq!(storage.cached_len(), 1);

        let fetched = storage.get(&VectorId::new("a")).unwrap().unwrap();
        assert_eq!(fetched.vector[0], 1.0);
    }

    #[test]
    fn test_eviction_is_strictly_lru() {
        let dir = tempdir().unwrap();
        let mut storage = open(dir.path(), 2);

        storage.put(record("a", 1.0)).unwrap();
        storage.put(record("b", 2.0)).unwrap();

        // Touch "a" so "b" becomes the eviction candidate
        storage.get(&VectorId::new("a")).unwrap();
        storage.put(record("c", 3.0)).unwrap();

        assert_eq!(storage.cached_len(), 2);
        {
            let mut cache = storage.cache.lock().unwrap();
            assert!(cache.get(&VectorId::new("a")).is_some());
            assert!(cache.get(&VectorId::new("b")).is_none());
            assert!(cache.get(&VectorId::new("c")).is_some());
        }

        // Evicted entries are still served from disk, and re-cached
        assert!(storage.get(&VectorId::new("b")).unwrap().is_some());
        let mut cache = storage.cache.lock().unwrap();
        assert!(cache.get(&VectorId::new("b")).is_some());
    }

    #[test]
    fn test_delete_invalidates_cache() {
        let dir = tempdir().unwrap();
        let mut storage = open(dir.path(), 4);

        storage.put(record("a", 1.0)).unwrap();
        assert!(storage.delete(&VectorId::new("a")).unwrap());
        assert_eq!(storage.cached_len(), 0);
        assert!(storage.get(&VectorId::new("a")).unwrap().is_none());
    }

    #[test]
    fn test_overwrite_refreshes_cached_value() {
        let dir = tempdir().unwrap();
        let mut storage = open(dir.path(), 4);

        storage.put(record("a", 1.0)).unwrap();
        storage.put(record("a", 9.0)).unwrap();

        let fetched = storage.get(&VectorId::new("a")).unwrap().unwrap();
        assert_eq!(fetched.vector[0], 9.0);
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_cache_miss_after_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut storage = open(dir.path(), 4);
            storage.put(record("a", 1.0)).unwrap();
            storage.close().unwrap();
        }

        let storage = open(dir.path(), 4);
        assert_eq!(storage.cached_len(), 0);
        let fetched = storage.get(&VectorId::new("a")).unwrap().unwrap();
        assert_eq!(fetched.vector[0], 1.0);
        assert_eq!(storage.cached_len(), 1);
    }

    #[test]
    fn test_slot_reuse_after_eviction() {
        let dir = tempdir().unwrap();
        let mut storage = open(dir.path(), 2);

        // Churn through more entries than the capacity; slab must not grow
        // beyond the cache size
        for i in 0..10 {
            storage.put(record(&format!("id-{i}"), i as f64)).unwrap();
        }
        let cache = storage.cache.lock().unwrap();
        assert!(cache.slots.len() <= 3);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_stats_keys() {
        let dir = tempdir().unwrap();
        let mut storage = open(dir.path(), 8);
        storage.put(record("a", 1.0)).unwrap();

        let stats = storage.stats();
        assert_eq!(stats["type"], json!("hybrid"));
        assert_eq!(stats["vector_count"], json!(1));
        assert_eq!(stats["cache_size"], json!(8));
        assert_eq!(stats["cached_records"], json!(1));
    }
}
