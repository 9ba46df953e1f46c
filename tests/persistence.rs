//! Persistence integration tests: vectors-file round trips, snapshot tag
//! enforcement, and full save/load through the facade.

use proxima::{
    DbConfig, IndexConfig, Metadata, Metric, PersistenceManager, VectorDb, VectorId,
};
use serde_json::json;
use tempfile::tempdir;

fn sample_vectors(n: usize, dim: usize) -> (Vec<VectorId>, Vec<Vec<f64>>) {
    let ids = (0..n).map(|i| VectorId::new(format!("v-{i:04}"))).collect();
    let vectors = (0..n)
        .map(|i| (0..dim).map(|d| ((i * dim + d) as f64).sin() * 1e3).collect())
        .collect();
    (ids, vectors)
}

// ============================================================================
// Vectors File Round Trip
// ============================================================================

#[test]
fn test_roundtrip_uncompressed_is_bit_exact() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vectors.bin");
    let manager = PersistenceManager::new();

    let (ids, vectors) = sample_vectors(100, 16);
    manager.save_vectors(&path, &ids, &vectors).unwrap();
    let (loaded_ids, loaded_vectors) = manager.load_vectors(&path).unwrap();

    assert_eq!(loaded_ids, ids);
    for (original, loaded) in vectors.iter().zip(loaded_vectors.iter()) {
        for (a, b) in original.iter().zip(loaded.iter()) {
            // Compression off: the round trip must be exact to the bit
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }
}

#[test]
fn test_roundtrip_compressed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vectors.bin");

    let (ids, vectors) = sample_vectors(50, 8);
    PersistenceManager::with_compression(true)
        .save_vectors(&path, &ids, &vectors)
        .unwrap();

    let (loaded_ids, loaded_vectors) = PersistenceManager::new().load_vectors(&path).unwrap();
    assert_eq!(loaded_ids, ids);
    assert_eq!(loaded_vectors, vectors);
}

#[test]
fn test_compressed_file_is_smaller() {
    let dir = tempdir().unwrap();
    let plain_path = dir.path().join("plain.bin");
    let gz_path = dir.path().join("compressed.bin");

    // Highly compressible data
    let ids: Vec<VectorId> = (0..200).map(|i| VectorId::new(format!("id-{i}"))).collect();
    let vectors = vec![vec![1.0; 64]; 200];

    PersistenceManager::new().save_vectors(&plain_path, &ids, &vectors).unwrap();
    PersistenceManager::with_compression(true)
        .save_vectors(&gz_path, &ids, &vectors)
        .unwrap();

    let plain = std::fs::metadata(&plain_path).unwrap().len();
    let gz = std::fs::metadata(&gz_path).unwrap().len();
    assert!(gz < plain / 2, "gzip {gz} not smaller than {plain}");
}

// ============================================================================
// Snapshot Tag Enforcement
// ============================================================================

#[test]
fn test_index_snapshot_kind_mismatch_rejected() {
    use proxima::index::{open_index, Index};

    let dir = tempdir().unwrap();
    let path = dir.path().join("index.json");
    let manager = PersistenceManager::new();

    let mut flat = open_index(4, &IndexConfig::flat(Metric::Euclidean)).unwrap();
    flat.insert(&VectorId::new("a"), &[1.0, 2.0, 3.0, 4.0]).unwrap();
    manager.save_index(&path, flat.as_ref()).unwrap();

    let mut annoy = open_index(4, &IndexConfig::annoy(Metric::Euclidean)).unwrap();
    let err = manager.load_index(&path, annoy.as_mut()).unwrap_err();
    assert!(err.is_index());
}

#[test]
fn test_tampered_version_rejected() {
    use proxima::index::{open_index, Index};

    let dir = tempdir().unwrap();
    let path = dir.path().join("index.json");
    let manager = PersistenceManager::new();

    let flat = open_index(2, &IndexConfig::flat(Metric::Euclidean)).unwrap();
    manager.save_index(&path, flat.as_ref()).unwrap();

    // Bump the version tag in place
    let mut doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    doc["version"] = json!(99);
    std::fs::write(&path, serde_json::to_string(&doc).unwrap()).unwrap();

    let mut other = open_index(2, &IndexConfig::flat(Metric::Euclidean)).unwrap();
    assert!(manager.load_index(&path, other.as_mut()).is_err());
}

// ============================================================================
// Facade Save / Load
// ============================================================================

fn open_with_persistence(index: IndexConfig, compress: bool) -> VectorDb {
    let db = VectorDb::new(DbConfig::new(8, index))
        .unwrap()
        .with_persistence(PersistenceManager::with_compression(compress));
    db.initialize().unwrap();
    db
}

#[test]
fn test_facade_save_load_roundtrip() {
    for index in [
        IndexConfig::flat(Metric::Cosine),
        IndexConfig::hnsw(Metric::Cosine),
        IndexConfig::ivf(Metric::Euclidean),
        IndexConfig::lsh(Metric::Cosine),
        IndexConfig::annoy(Metric::Euclidean),
    ] {
        let kind = index.kind();
        let dir = tempdir().unwrap();

        let source = open_with_persistence(index.clone(), false);
        let vectors: Vec<Vec<f64>> = (0..40u64)
            .map(|i| (0..8).map(|d| ((i * 8 + d) as f64 * 0.29).sin()).collect())
            .collect();
        let mut meta = Metadata::new();
        meta.insert("origin".into(), json!("batch-0"));
        let metadata = vec![meta; 40];
        let ids = source.insert(vectors.clone(), Some(metadata)).unwrap();
        source.save_to(dir.path()).unwrap();
        source.close().unwrap();

        // Fresh facade restores the snapshot and answers the same queries
        let restored = open_with_persistence(index, false);
        restored.load_from(dir.path()).unwrap();

        let stats = restored.stats().unwrap();
        assert_eq!(stats["vector_count"], json!(40), "{kind}");

        let results = restored.search(&vectors[17], 1).unwrap();
        assert_eq!(results[0].id, ids[17], "{kind}");
        assert!(results[0].distance < 1e-6, "{kind}");
        assert_eq!(
            results[0].metadata.as_ref().unwrap()["origin"],
            json!("batch-0"),
            "{kind}"
        );
        restored.close().unwrap();
    }
}

#[test]
fn test_facade_save_load_compressed() {
    let dir = tempdir().unwrap();

    let source = open_with_persistence(IndexConfig::hnsw(Metric::Cosine), true);
    let vectors: Vec<Vec<f64>> = (0..20u64)
        .map(|i| (0..8).map(|d| ((i * 8 + d) as f64 * 0.41).cos()).collect())
        .collect();
    let ids = source.insert(vectors.clone(), None).unwrap();
    source.save_to(dir.path()).unwrap();
    source.close().unwrap();

    let restored = open_with_persistence(IndexConfig::hnsw(Metric::Cosine), true);
    restored.load_from(dir.path()).unwrap();
    let results = restored.search(&vectors[5], 1).unwrap();
    assert_eq!(results[0].id, ids[5]);
    restored.close().unwrap();
}

#[test]
fn test_load_replaces_existing_contents() {
    let dir = tempdir().unwrap();

    let source = open_with_persistence(IndexConfig::flat(Metric::Euclidean), false);
    source.insert(vec![vec![1.0; 8]], None).unwrap();
    source.save_to(dir.path()).unwrap();
    source.close().unwrap();

    let target = open_with_persistence(IndexConfig::flat(Metric::Euclidean), false);
    target.insert(vec![vec![9.0; 8], vec![8.0; 8]], None).unwrap();
    target.load_from(dir.path()).unwrap();

    // Pre-load contents are gone, snapshot contents remain
    assert_eq!(target.stats().unwrap()["vector_count"], json!(1));
    let results = target.search(&[9.0; 8], 1).unwrap();
    assert!(results[0].distance > 1.0);
    target.close().unwrap();
}

#[test]
fn test_load_dimension_mismatch_rejected() {
    let dir = tempdir().unwrap();

    let source = open_with_persistence(IndexConfig::flat(Metric::Euclidean), false);
    source.insert(vec![vec![1.0; 8]], None).unwrap();
    source.save_to(dir.path()).unwrap();
    source.close().unwrap();

    let other = VectorDb::new(DbConfig::new(16, IndexConfig::flat(Metric::Euclidean)))
        .unwrap()
        .with_persistence(PersistenceManager::new());
    other.initialize().unwrap();
    assert!(other.load_from(dir.path()).is_err());
    other.close().unwrap();
}

#[test]
fn test_save_without_manager_fails() {
    let db = VectorDb::new(DbConfig::new(8, IndexConfig::flat(Metric::Euclidean))).unwrap();
    db.initialize().unwrap();
    let dir = tempdir().unwrap();
    let err = db.save_to(dir.path()).unwrap_err();
    assert!(err.to_string().contains("no persistence manager"));
    db.close().unwrap();
}
