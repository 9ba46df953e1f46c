//! Lifecycle integration tests: the Uninitialized -> Ready -> Closed
//! state machine across every index type and storage backend.

use proxima::{DbConfig, IndexConfig, Metric, ProximaError, StorageConfig, VectorDb};
use tempfile::tempdir;

const DIM: usize = 8;

fn all_index_configs() -> Vec<IndexConfig> {
    vec![
        IndexConfig::flat(Metric::Cosine),
        IndexConfig::hnsw(Metric::Cosine),
        IndexConfig::ivf(Metric::Euclidean),
        IndexConfig::lsh(Metric::Cosine),
        IndexConfig::annoy(Metric::Euclidean),
    ]
}

// ============================================================================
// Initialize Exactly Once
// ============================================================================

#[test]
fn test_operations_require_ready_state() {
    for index in all_index_configs() {
        let db = VectorDb::new(DbConfig::new(DIM, index)).unwrap();

        let err = db.insert(vec![vec![0.0; DIM]], None).unwrap_err();
        assert!(matches!(err, ProximaError::NotInitialized));
        let err = db.search(&[0.0; DIM], 1).unwrap_err();
        assert!(matches!(err, ProximaError::NotInitialized));
        let err = db.stats().unwrap_err();
        assert!(matches!(err, ProximaError::NotInitialized));
        let err = db.list_ids_paginated(10, None).unwrap_err();
        assert!(matches!(err, ProximaError::NotInitialized));
    }
}

#[test]
fn test_double_initialize_rejected() {
    for index in all_index_configs() {
        let db = VectorDb::new(DbConfig::new(DIM, index)).unwrap();
        db.initialize().unwrap();
        let err = db.initialize().unwrap_err();
        assert!(matches!(err, ProximaError::AlreadyInitialized));
        db.close().unwrap();
    }
}

// ============================================================================
// Idempotent Close
// ============================================================================

#[test]
fn test_close_is_idempotent_for_every_index() {
    for index in all_index_configs() {
        let db = VectorDb::new(DbConfig::new(DIM, index)).unwrap();
        db.initialize().unwrap();
        db.insert(vec![vec![1.0; DIM], vec![-1.0; DIM]], None).unwrap();

        db.close().unwrap();
        // Second close is a clean no-op
        db.close().unwrap();

        let err = db.search(&[1.0; DIM], 1).unwrap_err();
        assert!(matches!(err, ProximaError::AlreadyClosed));
        let err = db.initialize().unwrap_err();
        assert!(matches!(err, ProximaError::AlreadyClosed));
    }
}

#[test]
fn test_close_without_initialize() {
    let db = VectorDb::new(DbConfig::new(DIM, IndexConfig::flat(Metric::Cosine))).unwrap();
    db.close().unwrap();
    db.close().unwrap();
}

// ============================================================================
// Disk-Backed Lifecycle
// ============================================================================

#[test]
fn test_disk_backed_lifecycle() {
    let dir = tempdir().unwrap();
    let config = || {
        DbConfig::new(DIM, IndexConfig::flat(Metric::Euclidean)).with_storage(
            StorageConfig::Disk {
                data_dir: dir.path().to_path_buf(),
            },
        )
    };

    let ids;
    {
        let db = VectorDb::new(config()).unwrap();
        db.initialize().unwrap();
        ids = db.insert(vec![vec![0.5; DIM]], None).unwrap();
        db.close().unwrap();
    }

    // Records survive the process-lifetime boundary via log replay
    let db = VectorDb::new(config()).unwrap();
    db.initialize().unwrap();
    let record = db.get(&ids[0]).unwrap().unwrap();
    assert_eq!(record.vector, vec![0.5; DIM]);
    db.close().unwrap();
}

#[test]
fn test_hybrid_backed_lifecycle() {
    let dir = tempdir().unwrap();
    let db = VectorDb::new(
        DbConfig::new(DIM, IndexConfig::flat(Metric::Euclidean)).with_storage(
            StorageConfig::Hybrid {
                data_dir: dir.path().to_path_buf(),
                cache_size: 2,
            },
        ),
    )
    .unwrap();
    db.initialize().unwrap();

    // Churn past the cache capacity; every record must remain readable
    let mut ids = Vec::new();
    for i in 0..8 {
        ids.extend(db.insert(vec![vec![i as f64; DIM]], None).unwrap());
    }
    for (i, id) in ids.iter().enumerate() {
        let record = db.get(id).unwrap().unwrap();
        assert_eq!(record.vector[0], i as f64);
    }

    let stats = db.stats().unwrap();
    assert_eq!(stats["storage_type"], serde_json::json!("hybrid"));
    assert_eq!(stats["storage"]["cache_size"], serde_json::json!(2));
    db.close().unwrap();
}

// ============================================================================
// Concurrent Access
// ============================================================================

#[test]
fn test_concurrent_readers_and_writer() {
    use std::sync::Arc;

    let db = Arc::new(
        VectorDb::new(DbConfig::new(DIM, IndexConfig::flat(Metric::Euclidean))).unwrap(),
    );
    db.initialize().unwrap();
    db.insert(vec![vec![0.0; DIM]], None).unwrap();

    let mut handles = Vec::new();
    for t in 0..4 {
        let db = Arc::clone(&db);
        handles.push(std::thread::spawn(move || {
            for i in 0..25 {
                if t == 0 {
                    db.insert(vec![vec![(t * 100 + i) as f64; DIM]], None).unwrap();
                } else {
                    let results = db.search(&[0.0; DIM], 5).unwrap();
                    assert!(!results.is_empty());
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Writer inserted 25 on top of the seed row
    assert_eq!(db.stats().unwrap()["vector_count"], serde_json::json!(26));
    db.close().unwrap();
}

#[test]
fn test_insert_visible_to_subsequent_search() {
    let db = VectorDb::new(DbConfig::new(DIM, IndexConfig::hnsw(Metric::Cosine))).unwrap();
    db.initialize().unwrap();

    for i in 0..20u64 {
        let v: Vec<f64> = (0..DIM).map(|d| ((i * 8 + d as u64) as f64 * 0.37).sin()).collect();
        let ids = db.insert(vec![v.clone()], None).unwrap();
        // A search that begins after the insert returns sees the vector
        let results = db.search(&v, 1).unwrap();
        assert_eq!(results[0].id, ids[0]);
    }
    db.close().unwrap();
}
