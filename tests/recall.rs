//! Recall suites: every approximate index against the flat oracle on a
//! 10,000-vector, 128-dimensional N(0,1) dataset, plus IVF determinism.
//!
//! Positions (insertion indices) are compared rather than IDs, since each
//! database generates its own IDs.

use std::collections::{HashMap, HashSet};

use proxima::{DbConfig, IndexConfig, Metric, VectorDb, VectorId};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

const N: usize = 10_000;
const DIM: usize = 128;
const K: usize = 10;
const NUM_QUERIES: usize = 50;

fn gaussian_dataset(n: usize, dim: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            (0..dim)
                .map(|_| StandardNormal.sample(&mut rng))
                .collect()
        })
        .collect()
}

/// Opens a database, inserts the dataset in facade-sized batches, and
/// returns the handle plus an ID -> insertion-position map.
fn populate(index: IndexConfig, dataset: &[Vec<f64>]) -> (VectorDb, HashMap<VectorId, usize>) {
    let db = VectorDb::new(DbConfig::new(DIM, index)).unwrap();
    db.initialize().unwrap();

    let mut positions = HashMap::with_capacity(dataset.len());
    let mut next = 0usize;
    for chunk in dataset.chunks(1000) {
        let ids = db.insert(chunk.to_vec(), None).unwrap();
        for id in ids {
            positions.insert(id, next);
            next += 1;
        }
    }
    (db, positions)
}

fn top_k_positions(
    db: &VectorDb,
    positions: &HashMap<VectorId, usize>,
    query: &[f64],
    k: usize,
) -> Vec<usize> {
    db.search(query, k)
        .unwrap()
        .into_iter()
        .map(|r| positions[&r.id])
        .collect()
}

/// Mean recall@k of `index` against the flat oracle under `metric`.
fn measure_recall(index: IndexConfig, metric: Metric) -> f64 {
    let dataset = gaussian_dataset(N, DIM, 1001);
    let queries = gaussian_dataset(NUM_QUERIES, DIM, 2002);

    let (oracle, oracle_positions) = populate(IndexConfig::flat(metric), &dataset);
    let (approx, approx_positions) = populate(index, &dataset);

    let mut hits = 0usize;
    let mut total = 0usize;
    for query in &queries {
        let truth: HashSet<usize> = top_k_positions(&oracle, &oracle_positions, query, K)
            .into_iter()
            .collect();
        let found = top_k_positions(&approx, &approx_positions, query, K);
        hits += found.iter().filter(|p| truth.contains(p)).count();
        total += truth.len();
    }

    oracle.close().unwrap();
    approx.close().unwrap();
    hits as f64 / total as f64
}

// ============================================================================
// Recall Bounds
// ============================================================================

#[test]
fn test_hnsw_recall_at_defaults() {
    let recall = measure_recall(IndexConfig::hnsw(Metric::Cosine), Metric::Cosine);
    assert!(recall >= 0.90, "HNSW recall@10 {recall} below 0.90");
}

#[test]
fn test_ivf_recall_with_tenth_probes() {
    let index = IndexConfig::Ivf {
        metric: Metric::Euclidean,
        num_clusters: 100,
        num_probes: 10,
        max_iterations: 10,
        convergence_threshold: 1e-3,
        seed: Some(5),
    };
    let recall = measure_recall(index, Metric::Euclidean);
    assert!(recall >= 0.70, "IVF recall@10 {recall} below 0.70");
}

#[test]
fn test_lsh_recall() {
    let index = IndexConfig::Lsh {
        metric: Metric::Cosine,
        num_tables: 12,
        num_hash_bits: 4,
        bucket_width: 4.0,
        seed: Some(5),
    };
    let recall = measure_recall(index, Metric::Cosine);
    assert!(recall >= 0.50, "LSH recall@10 {recall} below 0.50");
}

#[test]
fn test_annoy_recall_at_defaults() {
    let recall = measure_recall(IndexConfig::annoy(Metric::Euclidean), Metric::Euclidean);
    assert!(recall >= 0.70, "Annoy recall@10 {recall} below 0.70");
}

// ============================================================================
// Flat Oracle Exactness
// ============================================================================

#[test]
fn test_flat_matches_brute_force() {
    let dataset = gaussian_dataset(200, 16, 77);
    let queries = gaussian_dataset(10, 16, 78);

    let db = VectorDb::new(DbConfig::new(16, IndexConfig::flat(Metric::Euclidean))).unwrap();
    db.initialize().unwrap();
    let ids = db.insert(dataset.clone(), None).unwrap();

    for query in &queries {
        // Hand-rolled exhaustive ranking as the reference
        let mut expected: Vec<(usize, f64)> = dataset
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let d: f64 = v
                    .iter()
                    .zip(query.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>()
                    .sqrt();
                (i, d)
            })
            .collect();
        expected.sort_by(|a, b| a.1.total_cmp(&b.1));

        let results = db.search(query, 5).unwrap();
        for (result, (position, distance)) in results.iter().zip(expected.iter()) {
            assert_eq!(result.id, ids[*position]);
            assert!((result.distance - distance).abs() < 1e-12);
        }
    }
    db.close().unwrap();
}

// ============================================================================
// IVF Probe Determinism
// ============================================================================

#[test]
fn test_ivf_same_seed_same_results() {
    let dataset = gaussian_dataset(1000, 16, 7);
    let query = dataset[0].clone();

    let run = || {
        let index = IndexConfig::Ivf {
            metric: Metric::Euclidean,
            num_clusters: 4,
            num_probes: 2,
            max_iterations: 25,
            convergence_threshold: 1e-4,
            seed: Some(42),
        };
        let db = VectorDb::new(DbConfig::new(16, index)).unwrap();
        db.initialize().unwrap();

        let ids = db.insert(dataset.clone(), None).unwrap();
        let positions: HashMap<VectorId, usize> =
            ids.into_iter().enumerate().map(|(i, id)| (id, i)).collect();

        let found: Vec<usize> = db
            .search(&query, 10)
            .unwrap()
            .into_iter()
            .map(|r| positions[&r.id])
            .collect();
        db.close().unwrap();
        found
    };

    let first = run();
    let second = run();
    assert_eq!(first.len(), 10);
    // Same 10 points in the same order across two fresh builds
    assert_eq!(first, second);
}
