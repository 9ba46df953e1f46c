//! In-memory storage backend.
//!
//! An insertion-ordered mapping from ID to record. O(1) get/put/contains;
//! delete pays O(n) to keep the order vector dense, which is acceptable
//! at the backend's target scale.

use std::collections::HashMap;

use serde_json::json;

use crate::error::Result;
use crate::storage::{page_from_order, StorageBackend};
use crate::types::{Page, VectorId, VectorRecord};

/// Volatile insertion-ordered record store.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: HashMap<VectorId, VectorRecord>,
    /// Insertion order of live IDs. Overwrites keep their position.
    order: Vec<VectorId>,
}

impl MemoryStorage {
    /// Creates an empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rough heap footprint estimate: vector data plus serialized metadata.
    pub(crate) fn estimated_bytes(&self) -> usize {
        self.records
            .values()
            .map(|r| {
                let meta = r
                    .metadata
                    .as_ref()
                    .and_then(|m| serde_json::to_vec(m).ok())
                    .map_or(0, |b| b.len());
                r.vector.len() * std::mem::size_of::<f64>() + r.id.as_str().len() + meta
            })
            .sum()
    }
}

impl StorageBackend for MemoryStorage {
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }

    fn put(&mut self, record: VectorRecord) -> Result<()> {
        if !self.records.contains_key(&record.id) {
            self.order.push(record.id.clone());
        }
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    fn get(&self, id: &VectorId) -> Result<Option<VectorRecord>> {
        Ok(self.records.get(id).cloned())
    }

    fn delete(&mut self, id: &VectorId) -> Result<bool> {
        if self.records.remove(id).is_none() {
            return Ok(false);
        }
        self.order.retain(|existing| existing != id);
        Ok(true)
    }

    fn contains(&self, id: &VectorId) -> bool {
        self.records.contains_key(id)
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn list_ids_in_order(&self) -> Vec<VectorId> {
        self.order.clone()
    }

    fn scan_page(&self, after: Option<&VectorId>, limit: usize) -> Result<Page<VectorId>> {
        Ok(page_from_order(&self.order, after, limit))
    }

    fn stats(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut stats = serde_json::Map::new();
        stats.insert("type".into(), json!(self.kind()));
        stats.insert("vector_count".into(), json!(self.records.len()));
        stats.insert("estimated_bytes".into(), json!(self.estimated_bytes()));
        stats
    }

    fn close(&mut self) -> Result<()> {
        self.records.clear();
        self.order.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Metadata;
    use serde_json::json;

    fn record(id: &str, value: f64) -> VectorRecord {
        VectorRecord::new(VectorId::new(id), vec![value, value + 1.0])
    }

    #[test]
    fn test_put_get_roundtrip() {
        let mut storage = MemoryStorage::new();
        storage.put(record("a", 1.0)).unwrap();

        let fetched = storage.get(&VectorId::new("a")).unwrap().unwrap();
        assert_eq!(fetched.vector, vec![1.0, 2.0]);
        assert!(storage.contains(&VectorId::new("a")));
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_get_missing_returns_none() {
        let storage = MemoryStorage::new();
        assert!(storage.get(&VectorId::new("nope")).unwrap().is_none());
    }

    #[test]
    fn test_overwrite_keeps_position() {
        let mut storage = MemoryStorage::new();
        storage.put(record("a", 1.0)).unwrap();
        storage.put(record("b", 2.0)).unwrap();
        storage.put(record("a", 9.0)).unwrap();

        assert_eq!(storage.len(), 2);
        assert_eq!(
            storage.list_ids_in_order(),
            vec![VectorId::new("a"), VectorId::new("b")]
        );
        let fetched = storage.get(&VectorId::new("a")).unwrap().unwrap();
        assert_eq!(fetched.vector[0], 9.0);
    }

    #[test]
    fn test_delete_removes_from_order() {
        let mut storage = MemoryStorage::new();
        storage.put(record("a", 1.0)).unwrap();
        storage.put(record("b", 2.0)).unwrap();
        storage.put(record("c", 3.0)).unwrap();

        assert!(storage.delete(&VectorId::new("b")).unwrap());
        assert!(!storage.delete(&VectorId::new("b")).unwrap());
        assert_eq!(
            storage.list_ids_in_order(),
            vec![VectorId::new("a"), VectorId::new("c")]
        );
    }

    #[test]
    fn test_scan_page() {
        let mut storage = MemoryStorage::new();
        for i in 0..5 {
            storage.put(record(&format!("id-{i}"), i as f64)).unwrap();
        }

        let page = storage.scan_page(None, 3).unwrap();
        assert_eq!(page.items.len(), 3);
        assert!(page.has_more);

        let after = VectorId::new(page.next_cursor.as_deref().unwrap());
        let page = storage.scan_page(Some(&after), 3).unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(!page.has_more);
    }

    #[test]
    fn test_stats_keys() {
        let mut storage = MemoryStorage::new();
        let mut meta = Metadata::new();
        meta.insert("k".into(), json!("v"));
        storage
            .put(VectorRecord::with_metadata(
                VectorId::new("a"),
                vec![1.0],
                meta,
            ))
            .unwrap();

        let stats = storage.stats();
        assert_eq!(stats["type"], json!("memory"));
        assert_eq!(stats["vector_count"], json!(1));
        assert!(stats["estimated_bytes"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_close_clears_state() {
        let mut storage = MemoryStorage::new();
        storage.put(record("a", 1.0)).unwrap();
        storage.close().unwrap();
        assert!(storage.is_empty());
    }
}
