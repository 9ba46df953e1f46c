//! Storage layer abstractions for Proxima.
//!
//! This module provides a trait-based abstraction over record storage,
//! with three backends selected by [`StorageConfig`]:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    VectorDb                          │
//! │                       │                              │
//! │                       ▼                              │
//! │             ┌──────────────────┐                     │
//! │             │  StorageBackend  │  ← Trait            │
//! │             └──────────────────┘                     │
//! │                ▲      ▲      ▲                       │
//! │                │      │      │                       │
//! │      ┌─────────┴┐  ┌──┴───┐  └───────────┐          │
//! │      │ Memory   │  │ Disk │  │  Hybrid   │          │
//! │      └──────────┘  └──────┘  └───────────┘          │
//! │      (volatile)  (append log) (LRU + disk)          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Every backend preserves insertion order for iteration and pagination,
//! and reports `vector_count` and `type` in its stats.

mod disk;
mod hybrid;
mod memory;

pub use disk::DiskStorage;
pub use hybrid::HybridStorage;
pub use memory::MemoryStorage;

use crate::config::StorageConfig;
use crate::error::Result;
use crate::types::{Page, VectorId, VectorRecord};

/// Storage backend trait for Proxima.
///
/// Mutating operations take `&mut self`; the facade's writer lock is the
/// outer serialization boundary, so backends need no internal write
/// locking of their own (the hybrid backend's cache uses an internal lock
/// only because reads promote entries).
///
/// # Ordering
///
/// `list_ids_in_order` and `scan_page` iterate in insertion order.
/// Overwriting an existing ID keeps its original position.
pub trait StorageBackend: Send + Sync {
    /// Prepares the backend for use (creates/replays files as needed).
    fn initialize(&mut self) -> Result<()>;

    /// Short lowercase name of the backend type.
    fn kind(&self) -> &'static str;

    /// Stores a record, overwriting any existing record with the same ID.
    fn put(&mut self, record: VectorRecord) -> Result<()>;

    /// Retrieves a record by ID, or `None` if absent.
    fn get(&self, id: &VectorId) -> Result<Option<VectorRecord>>;

    /// Removes a record. Returns `true` if it existed.
    fn delete(&mut self, id: &VectorId) -> Result<bool>;

    /// Returns true if a record with the given ID exists.
    fn contains(&self, id: &VectorId) -> bool;

    /// Number of live records.
    fn len(&self) -> usize;

    /// Returns true if the backend holds no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All live IDs in insertion order.
    fn list_ids_in_order(&self) -> Vec<VectorId>;

    /// One page of IDs in insertion order, starting after `after`
    /// (or from the beginning when `after` is `None`).
    ///
    /// An `after` ID that no longer exists resumes from the first ID
    /// inserted later than it, which keeps cursors stable across
    /// interleaved deletions.
    fn scan_page(&self, after: Option<&VectorId>, limit: usize) -> Result<Page<VectorId>>;

    /// Backend statistics. Always includes `vector_count` and `type`.
    fn stats(&self) -> serde_json::Map<String, serde_json::Value>;

    /// Releases backend resources (flushes files). Safe to call once;
    /// the facade guarantees at-most-once invocation.
    fn close(&mut self) -> Result<()>;
}

/// Opens the storage backend described by `config`.
pub fn open_storage(config: &StorageConfig) -> Result<Box<dyn StorageBackend>> {
    match config {
        StorageConfig::Memory => Ok(Box::new(MemoryStorage::new())),
        StorageConfig::Disk { data_dir } => Ok(Box::new(DiskStorage::new(data_dir))),
        StorageConfig::Hybrid {
            data_dir,
            cache_size,
        } => Ok(Box::new(HybridStorage::new(data_dir, *cache_size))),
    }
}

/// Shared pagination walk over an insertion-ordered ID slice.
///
/// Used by every backend so cursor semantics stay identical.
pub(crate) fn page_from_order(
    order: &[VectorId],
    after: Option<&VectorId>,
    limit: usize,
) -> Page<VectorId> {
    let start = match after {
        None => 0,
        Some(cursor) => {
            // The cursor ID may have been deleted; resume at the first
            // position whose ID sorts after it in insertion order.
            match order.iter().position(|id| id == cursor) {
                Some(pos) => pos + 1,
                None => order.iter().position(|id| id > cursor).unwrap_or(order.len()),
            }
        }
    };

    let end = (start + limit).min(order.len());
    let items: Vec<VectorId> = order[start..end].to_vec();
    let has_more = end < order.len();
    Page {
        next_cursor: if has_more {
            items.last().map(|id| id.as_str().to_string())
        } else {
            None
        },
        items,
        has_more,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use tempfile::tempdir;

    #[test]
    fn test_open_storage_kinds() {
        let dir = tempdir().unwrap();

        let memory = open_storage(&StorageConfig::Memory).unwrap();
        assert_eq!(memory.kind(), "memory");

        let disk = open_storage(&StorageConfig::Disk {
            data_dir: dir.path().join("d"),
        })
        .unwrap();
        assert_eq!(disk.kind(), "disk");

        let hybrid = open_storage(&StorageConfig::Hybrid {
            data_dir: dir.path().join("h"),
            cache_size: 4,
        })
        .unwrap();
        assert_eq!(hybrid.kind(), "hybrid");
    }

    #[test]
    fn test_page_from_order_walk() {
        let order: Vec<VectorId> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|s| VectorId::new(*s))
            .collect();

        let page = page_from_order(&order, None, 2);
        assert_eq!(page.items, vec![VectorId::new("a"), VectorId::new("b")]);
        assert!(page.has_more);
        assert_eq!(page.next_cursor.as_deref(), Some("b"));

        let page = page_from_order(&order, Some(&VectorId::new("b")), 2);
        assert_eq!(page.items, vec![VectorId::new("c"), VectorId::new("d")]);
        assert!(page.has_more);

        let page = page_from_order(&order, Some(&VectorId::new("d")), 2);
        assert_eq!(page.items, vec![VectorId::new("e")]);
        assert!(!page.has_more);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_page_from_order_deleted_cursor() {
        // Cursor "b" was deleted; resume from the first ID after it
        let order: Vec<VectorId> = ["a", "c", "d"].iter().map(|s| VectorId::new(*s)).collect();
        let page = page_from_order(&order, Some(&VectorId::new("b")), 10);
        assert_eq!(page.items, vec![VectorId::new("c"), VectorId::new("d")]);
    }

    #[test]
    fn test_storage_backend_is_object_safe() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn StorageBackend>();
    }
}
