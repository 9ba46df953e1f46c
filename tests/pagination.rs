//! Pagination integration tests: cursor walks, insertion-order stability,
//! and behavior under interleaved deletion.

use proxima::{DbConfig, IndexConfig, Metric, VectorDb, VectorId};
use proptest::prelude::*;

fn open_db(dim: usize) -> VectorDb {
    let db = VectorDb::new(DbConfig::new(dim, IndexConfig::flat(Metric::Euclidean))).unwrap();
    db.initialize().unwrap();
    db
}

fn insert_n(db: &VectorDb, n: usize) -> Vec<VectorId> {
    let mut ids = Vec::with_capacity(n);
    for chunk_start in (0..n).step_by(500) {
        let chunk: Vec<Vec<f64>> = (chunk_start..(chunk_start + 500).min(n))
            .map(|i| vec![i as f64])
            .collect();
        ids.extend(db.insert(chunk, None).unwrap());
    }
    ids
}

fn walk_all(db: &VectorDb, page_size: usize) -> (Vec<VectorId>, usize) {
    let mut walked = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0;
    loop {
        let page = db.list_ids_paginated(page_size, cursor.as_deref()).unwrap();
        assert!(page.items.len() <= page_size);
        walked.extend(page.items);
        pages += 1;
        if !page.has_more {
            assert!(page.next_cursor.is_none());
            return (walked, pages);
        }
        assert!(page.next_cursor.is_some());
        cursor = page.next_cursor;
    }
}

// ============================================================================
// Full Iteration Stability
// ============================================================================

#[test]
fn test_500_vectors_page_size_50() {
    let db = open_db(1);
    let ids = insert_n(&db, 500);

    let (walked, pages) = walk_all(&db, 50);
    assert_eq!(pages, 10);
    assert_eq!(walked.len(), 500);
    assert_eq!(walked, ids);

    // No duplicates
    let unique: std::collections::HashSet<_> = walked.iter().collect();
    assert_eq!(unique.len(), 500);
    db.close().unwrap();
}

#[test]
fn test_any_page_size_yields_insertion_order() {
    let db = open_db(1);
    let ids = insert_n(&db, 97);

    for page_size in [1, 7, 50, 97, 200] {
        let (walked, _) = walk_all(&db, page_size);
        assert_eq!(walked, ids, "page_size={page_size}");
    }
    db.close().unwrap();
}

#[test]
fn test_empty_database_single_empty_page() {
    let db = open_db(1);
    let page = db.list_ids_paginated(10, None).unwrap();
    assert!(page.items.is_empty());
    assert!(!page.has_more);
    assert!(page.next_cursor.is_none());
    db.close().unwrap();
}

// ============================================================================
// Deletion Interleaving
// ============================================================================

#[test]
fn test_iteration_skips_deleted_ids() {
    let db = open_db(1);
    let ids = insert_n(&db, 30);

    // Delete every third record
    let doomed: Vec<VectorId> = ids.iter().step_by(3).cloned().collect();
    db.delete(&doomed).unwrap();

    let (walked, _) = walk_all(&db, 7);
    let expected: Vec<VectorId> = ids
        .iter()
        .enumerate()
        .filter(|(i, _)| i % 3 != 0)
        .map(|(_, id)| id.clone())
        .collect();
    assert_eq!(walked, expected);
    db.close().unwrap();
}

#[test]
fn test_cursor_survives_deletion_of_cursor_id() {
    let db = open_db(1);
    let ids = insert_n(&db, 20);

    // Take the first page, then delete the ID the cursor points at
    let page = db.list_ids_paginated(5, None).unwrap();
    assert_eq!(page.items, ids[..5]);
    let cursor = page.next_cursor.unwrap();
    db.delete(&ids[4..5]).unwrap();

    // The walk resumes right after the (now deleted) cursor position
    let page = db.list_ids_paginated(5, Some(&cursor)).unwrap();
    assert_eq!(page.items, ids[5..10]);
    db.close().unwrap();
}

#[test]
fn test_insertions_after_cursor_are_visible() {
    let db = open_db(1);
    let first = insert_n(&db, 10);

    let page = db.list_ids_paginated(10, None).unwrap();
    assert!(!page.has_more);

    // New insertions appear on a fresh walk
    let second = insert_n(&db, 5);
    let (walked, _) = walk_all(&db, 4);
    let mut expected = first;
    expected.extend(second);
    assert_eq!(walked, expected);
    db.close().unwrap();
}

// ============================================================================
// Property: full iteration equals insertion order for any page size
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_full_walk_equals_live_insertion_order(
        n in 1usize..120,
        page_size in 1usize..40,
        delete_stride in 2usize..6,
    ) {
        let db = open_db(1);
        let ids = insert_n(&db, n);

        let doomed: Vec<VectorId> = ids.iter().step_by(delete_stride).cloned().collect();
        db.delete(&doomed).unwrap();

        let (walked, _) = walk_all(&db, page_size);
        let expected: Vec<VectorId> = ids
            .iter()
            .enumerate()
            .filter(|(i, _)| i % delete_stride != 0)
            .map(|(_, id)| id.clone())
            .collect();
        prop_assert_eq!(walked, expected);
        db.close().unwrap();
    }
}
