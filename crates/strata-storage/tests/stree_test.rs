//! STree integration tests.
//!
//! Covers the tree and its cursors end to end:
//! - Insert, find, and remove against in-memory and spilling batch managers
//! - Split and merge behavior at small page capacities
//! - Range and value-set browsing in both directions
//! - In-place updates and out-of-band removal during scans
//! - Storage and comparison failures surfacing from the tree and its cursors
//! - Randomized workloads checked against an ordered model

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{self, AtomicBool};
use std::sync::Arc;
use std::time::Instant;
use tempfile::tempdir;

use strata_buffer::BatchCacheConfig;
use strata_common::{BatchId, KeyComparator, Result, StrataError, Tuple, TupleBatch, TypeId, Value};
use strata_storage::{
    BatchManager, BufferManager, Direction, FileStorageConfig, MemoryBatchManager, STree,
    STreeConfig,
};

// =============================================================================
// Helpers
// =============================================================================

fn row(k: i64, payload: &str) -> Tuple {
    vec![Value::Int64(k), Value::from(payload)]
}

fn key(k: i64) -> Tuple {
    vec![Value::Int64(k)]
}

fn key_of(tuple: &Tuple) -> i64 {
    match tuple[0] {
        Value::Int64(k) => k,
        ref other => panic!("unexpected key {:?}", other),
    }
}

fn create_test_tree(capacity: usize, seed: u32) -> STree {
    STree::new(
        Arc::new(MemoryBatchManager::new()),
        Arc::new(MemoryBatchManager::new()),
        Arc::new(KeyComparator::new(1)),
        1,
        vec![TypeId::Int64, TypeId::Varchar],
        STreeConfig::new().with_page_capacity(capacity).with_seed(seed),
    )
    .unwrap()
}

fn create_test_buffer(dir: &Path, memory_bytes: usize) -> Arc<BufferManager> {
    Arc::new(
        BufferManager::new(
            BatchCacheConfig { memory_bytes },
            FileStorageConfig {
                dir: dir.to_path_buf(),
                max_segment_size: 64 * 1024,
                max_open_files: 4,
                fsync_enabled: false,
            },
        )
        .unwrap(),
    )
}

fn scan(tree: &STree, lower: Option<i64>, upper: Option<i64>, direction: Direction) -> Vec<i64> {
    let lower = lower.map(key);
    let upper = upper.map(key);
    tree.browse_range(lower.as_deref(), upper.as_deref(), direction)
        .unwrap()
        .map(|tuple| key_of(&tuple.unwrap()))
        .collect()
}

// =============================================================================
// Basic operations
// =============================================================================

#[test]
fn test_small_page_scenario() {
    let tree = create_test_tree(4, 2024);
    assert_eq!(tree.page_size(), 4);

    for k in [5, 3, 8, 1, 9, 2, 7, 4, 6] {
        assert!(tree.insert(row(k, "v"), false).unwrap().is_none());
    }
    assert_eq!(tree.row_count(), 9);
    assert_eq!(scan(&tree, None, None, Direction::Forward), (1..=9).collect::<Vec<_>>());

    assert_eq!(tree.remove(&key(5)).unwrap(), Some(row(5, "v")));
    assert!(tree.find(&key(5)).unwrap().is_none());
    assert_eq!(tree.row_count(), 8);
    assert_eq!(
        scan(&tree, None, None, Direction::Forward),
        vec![1, 2, 3, 4, 6, 7, 8, 9]
    );

    let found: Vec<i64> = tree
        .browse_values(vec![key(3), key(7), key(100)], Direction::Forward)
        .unwrap()
        .map(|tuple| key_of(&tuple.unwrap()))
        .collect();
    assert_eq!(found, vec![3, 7]);
    tree.validate_structure().unwrap();
}

#[test]
fn test_insert_is_idempotent_without_replace() {
    let tree = create_test_tree(8, 1);
    assert!(tree.insert(row(1, "first"), false).unwrap().is_none());
    assert_eq!(
        tree.insert(row(1, "second"), false).unwrap(),
        Some(row(1, "first"))
    );
    assert_eq!(tree.row_count(), 1);
    assert_eq!(tree.find(&key(1)).unwrap(), Some(row(1, "first")));
}

#[test]
fn test_insert_with_replace() {
    let tree = create_test_tree(8, 1);
    for k in 0..100 {
        tree.insert(row(k, "old"), false).unwrap();
    }
    for k in (0..100).step_by(7) {
        assert_eq!(
            tree.insert(row(k, "new"), true).unwrap(),
            Some(row(k, "old"))
        );
    }
    assert_eq!(tree.row_count(), 100);
    for k in 0..100 {
        let expected = if k % 7 == 0 { "new" } else { "old" };
        assert_eq!(tree.find(&key(k)).unwrap(), Some(row(k, expected)));
    }
    tree.validate_structure().unwrap();
}

#[test]
fn test_remove_absent_key() {
    let tree = create_test_tree(4, 9);
    assert!(tree.remove(&key(1)).unwrap().is_none());
    tree.insert(row(1, "v"), false).unwrap();
    assert!(tree.remove(&key(2)).unwrap().is_none());
    assert_eq!(tree.row_count(), 1);
}

#[test]
fn test_contract_violations() {
    let tree = create_test_tree(4, 9);
    assert!(matches!(
        tree.insert(vec![Value::Int64(1)], false),
        Err(StrataError::ArityMismatch { .. })
    ));
    assert!(matches!(
        tree.insert(vec![Value::from("k"), Value::from("v")], false),
        Err(StrataError::TypeMismatch { .. })
    ));
    assert!(matches!(
        STree::new(
            Arc::new(MemoryBatchManager::new()),
            Arc::new(MemoryBatchManager::new()),
            Arc::new(KeyComparator::new(1)),
            0,
            vec![TypeId::Int64],
            STreeConfig::new(),
        ),
        Err(StrataError::InvalidKeyLength { .. })
    ));
}

#[test]
fn test_composite_key() {
    let tree = STree::new(
        Arc::new(MemoryBatchManager::new()),
        Arc::new(MemoryBatchManager::new()),
        Arc::new(KeyComparator::new(2)),
        2,
        vec![TypeId::Varchar, TypeId::Int32, TypeId::Float64],
        STreeConfig::new().with_page_capacity(4).with_seed(3),
    )
    .unwrap();

    for region in ["east", "west", "north"] {
        for id in (0..10).rev() {
            tree.insert(
                vec![Value::from(region), Value::Int32(id), Value::Float64(id as f64)],
                false,
            )
            .unwrap();
        }
    }
    assert_eq!(tree.row_count(), 30);

    let lookup = vec![Value::from("north"), Value::Int32(4)];
    let found = tree.find(&lookup).unwrap().unwrap();
    assert_eq!(found[2], Value::Float64(4.0));

    let lower = vec![Value::from("north"), Value::Int32(0)];
    let upper = vec![Value::from("north"), Value::Int32(9)];
    let rows: Vec<Tuple> = tree
        .browse_range(Some(lower.as_slice()), Some(upper.as_slice()), Direction::Forward)
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(rows.len(), 10);
    assert!(rows.iter().all(|r| r[0] == Value::from("north")));
    tree.validate_structure().unwrap();
}

// =============================================================================
// Splits and merges
// =============================================================================

#[test]
fn test_splits_keep_pages_within_capacity() {
    let tree = create_test_tree(4, 77);
    for k in (0..1000).rev() {
        tree.insert(row(k, "v"), false).unwrap();
    }
    tree.validate_structure().unwrap();

    let stats = tree.stats().unwrap();
    assert_eq!(stats.page_size, 4);
    assert_eq!(stats.row_count, 1000);
    assert!(stats.pages_per_level[0] >= 250);
    assert!(stats.height >= 2, "height {}", stats.height);
    for (level, pair) in stats.entries_per_level.windows(2).enumerate() {
        assert!(pair[1] <= pair[0], "level {} has more entries than below", level + 1);
    }
}

#[test]
fn test_merge_with_previous_sibling() {
    // Capacity 16 splits at 8 and merges below 4.
    let tree = create_test_tree(16, 5);
    for k in 0..32 {
        tree.insert(row(k, "v"), false).unwrap();
    }
    // Ascending inserts leave pages [0, 8), [8, 16), [16, 32).
    assert_eq!(tree.stats().unwrap().pages_per_level[0], 3);

    for k in 0..5 {
        tree.remove(&key(k)).unwrap();
    }
    assert_eq!(tree.stats().unwrap().pages_per_level[0], 3);

    for k in 8..13 {
        tree.remove(&key(k)).unwrap();
    }
    let stats = tree.stats().unwrap();
    assert_eq!(stats.pages_per_level[0], 2);
    assert_eq!(stats.row_count, 22);
    tree.validate_structure().unwrap();

    let mut expected: Vec<i64> = vec![5, 6, 7, 13, 14, 15];
    expected.extend(16..32);
    assert_eq!(scan(&tree, None, None, Direction::Forward), expected);
}

#[test]
fn test_merge_with_next_sibling() {
    let tree = create_test_tree(16, 5);
    for k in 0..32 {
        tree.insert(row(k, "v"), false).unwrap();
    }
    // Shrink the middle page first, then the first page checks its next.
    for k in 8..13 {
        tree.remove(&key(k)).unwrap();
    }
    for k in 0..5 {
        tree.remove(&key(k)).unwrap();
    }
    assert_eq!(tree.stats().unwrap().pages_per_level[0], 2);
    tree.validate_structure().unwrap();
    assert_eq!(tree.find(&key(13)).unwrap(), Some(row(13, "v")));
}

#[test]
fn test_removing_most_keys_reclaims_pages() {
    let tree = create_test_tree(16, 31);
    for k in 0..2000 {
        tree.insert(row(k, "v"), false).unwrap();
    }
    let before = tree.stats().unwrap();

    for k in 0..2000 {
        if k % 50 != 0 {
            tree.remove(&key(k)).unwrap();
        }
    }
    tree.validate_structure().unwrap();

    let after = tree.stats().unwrap();
    assert_eq!(after.row_count, 40);
    assert!(after.pages_per_level[0] <= 40);
    assert!(after.page_count() < before.page_count());
    assert!(after.height <= before.height);
    assert_eq!(
        scan(&tree, None, None, Direction::Forward),
        (0..2000).step_by(50).collect::<Vec<_>>()
    );
}

#[test]
fn test_truncate_then_reuse() {
    let tree = create_test_tree(4, 12);
    for k in 0..300 {
        tree.insert(row(k, "v"), false).unwrap();
    }
    assert_eq!(tree.truncate().unwrap(), 300);
    assert_eq!(tree.row_count(), 0);
    assert_eq!(tree.height(), 1);
    assert!(scan(&tree, None, None, Direction::Forward).is_empty());

    for k in 0..10 {
        tree.insert(row(k, "again"), false).unwrap();
    }
    assert_eq!(scan(&tree, None, None, Direction::Backward), (0..10).rev().collect::<Vec<_>>());
    tree.validate_structure().unwrap();
}

// =============================================================================
// Browsing
// =============================================================================

#[test]
fn test_backward_scan_is_reverse_of_forward() {
    let tree = create_test_tree(4, 8);
    let mut rng = StdRng::seed_from_u64(8);
    for _ in 0..500 {
        tree.insert(row(rng.gen_range(0..2000), "v"), false).unwrap();
    }

    let bounds = [
        (None, None),
        (Some(100), None),
        (None, Some(1500)),
        (Some(333), Some(1444)),
        (Some(-50), Some(5000)),
        (Some(700), Some(700)),
    ];
    for (lower, upper) in bounds {
        let mut forward = scan(&tree, lower, upper, Direction::Forward);
        let backward = scan(&tree, lower, upper, Direction::Backward);
        forward.reverse();
        assert_eq!(forward, backward, "bounds {:?}..{:?}", lower, upper);
    }
}

#[test]
fn test_range_bounds_are_inclusive() {
    let tree = create_test_tree(4, 4);
    for k in 0..100 {
        tree.insert(row(k * 3, "v"), false).unwrap();
    }
    assert_eq!(scan(&tree, Some(30), Some(45), Direction::Forward), vec![30, 33, 36, 39, 42, 45]);
    assert_eq!(scan(&tree, Some(31), Some(44), Direction::Forward), vec![33, 36, 39, 42]);
    assert_eq!(scan(&tree, Some(290), None, Direction::Forward), vec![291, 294, 297]);
    assert_eq!(scan(&tree, None, Some(5), Direction::Backward), vec![3, 0]);
    assert!(scan(&tree, Some(50), Some(40), Direction::Forward).is_empty());
    assert!(scan(&tree, Some(1000), None, Direction::Forward).is_empty());
    assert!(scan(&tree, None, Some(-1), Direction::Backward).is_empty());
}

#[test]
fn test_value_set_keys_outside_populated_range() {
    let tree = create_test_tree(4, 6);
    for k in 100..200 {
        tree.insert(row(k, "v"), false).unwrap();
    }
    let keys = vec![key(-10), key(0), key(99), key(100), key(150), key(151), key(199), key(200), key(10_000)];

    let forward: Vec<i64> = tree
        .browse_values(keys.clone(), Direction::Forward)
        .unwrap()
        .map(|t| key_of(&t.unwrap()))
        .collect();
    assert_eq!(forward, vec![100, 150, 151, 199]);

    let backward: Vec<i64> = tree
        .browse_values(keys, Direction::Backward)
        .unwrap()
        .map(|t| key_of(&t.unwrap()))
        .collect();
    assert_eq!(backward, vec![199, 151, 150, 100]);

    let empty = create_test_tree(4, 6);
    let mut browser = empty
        .browse_values(vec![key(1), key(2)], Direction::Forward)
        .unwrap();
    assert!(browser.next_tuple().unwrap().is_none());
    assert!(browser.next_tuple().unwrap().is_none());
}

#[test]
fn test_update_through_browser() {
    let tree = create_test_tree(4, 10);
    for k in 0..200 {
        tree.insert(row(k, "v"), false).unwrap();
    }

    let mut browser = tree
        .browse_range(Some(key(50).as_slice()), Some(key(149).as_slice()), Direction::Backward)
        .unwrap();
    let mut visited = 0;
    while let Some(tuple) = browser.next_tuple().unwrap() {
        let k = key_of(&tuple);
        browser.update(row(k, &format!("u{}", k))).unwrap();
        visited += 1;
    }
    drop(browser);
    assert_eq!(visited, 100);

    for k in 0..200 {
        let expected = if (50..150).contains(&k) {
            format!("u{}", k)
        } else {
            "v".to_string()
        };
        assert_eq!(tree.find(&key(k)).unwrap(), Some(row(k, &expected)));
    }
}

#[test]
fn test_removed_during_bounded_scan() {
    let tree = create_test_tree(16, 13);
    for k in 0..500 {
        tree.insert(row(k, "v"), false).unwrap();
    }

    let mut seen = Vec::new();
    let mut browser = tree
        .browse_range(Some(key(100).as_slice()), Some(key(399).as_slice()), Direction::Forward)
        .unwrap();
    while let Some(tuple) = browser.next_tuple().unwrap() {
        let k = key_of(&tuple);
        seen.push(k);
        // Removing most rows forces merges under the cursor.
        if k % 10 != 0 {
            tree.remove(&key(k)).unwrap();
            browser.removed();
        }
    }
    drop(browser);

    assert_eq!(seen, (100..400).collect::<Vec<_>>());
    assert_eq!(tree.row_count(), 200 + 30);
    tree.validate_structure().unwrap();
    assert_eq!(
        scan(&tree, Some(100), Some(399), Direction::Forward),
        (100..400).step_by(10).collect::<Vec<_>>()
    );
}

// =============================================================================
// Failures
// =============================================================================

/// In-memory manager whose reads start failing once `fail_reads` is set.
struct FlakyBatchManager {
    inner: MemoryBatchManager,
    fail_reads: AtomicBool,
}

impl FlakyBatchManager {
    fn new() -> Self {
        Self {
            inner: MemoryBatchManager::new(),
            fail_reads: AtomicBool::new(false),
        }
    }

    fn set_failing(&self, failing: bool) {
        self.fail_reads.store(failing, atomic::Ordering::SeqCst);
    }
}

impl BatchManager for FlakyBatchManager {
    fn create_batch(&self, level: usize) -> Result<BatchId> {
        self.inner.create_batch(level)
    }

    fn get_batch(&self, batch_id: BatchId) -> Result<Arc<TupleBatch>> {
        if self.fail_reads.load(atomic::Ordering::SeqCst) {
            return Err(StrataError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected read failure",
            )));
        }
        self.inner.get_batch(batch_id)
    }

    fn set_batch(&self, batch_id: BatchId, batch: TupleBatch) -> Result<()> {
        self.inner.set_batch(batch_id, batch)
    }

    fn remove_batch(&self, batch_id: BatchId) -> Result<()> {
        self.inner.remove_batch(batch_id)
    }

    fn remove(&self) -> Result<()> {
        self.inner.remove()
    }

    fn batch_count(&self) -> usize {
        self.inner.batch_count()
    }
}

fn create_flaky_tree(leaves: Arc<FlakyBatchManager>) -> STree {
    STree::new(
        leaves,
        Arc::new(MemoryBatchManager::new()),
        Arc::new(KeyComparator::new(1)),
        1,
        vec![TypeId::Int64, TypeId::Varchar],
        STreeConfig::new().with_page_capacity(4).with_seed(31),
    )
    .unwrap()
}

#[test]
fn test_storage_failure_ends_scan() {
    let leaves = Arc::new(FlakyBatchManager::new());
    let tree = create_flaky_tree(Arc::clone(&leaves));
    for k in 0..20 {
        tree.insert(row(k, "v"), false).unwrap();
    }

    let mut browser = tree.browse_range(None, None, Direction::Forward).unwrap();
    assert_eq!(key_of(&browser.next_tuple().unwrap().unwrap()), 0);
    assert_eq!(key_of(&browser.next_tuple().unwrap().unwrap()), 1);
    leaves.set_failing(true);

    let mut errors = 0;
    let mut after_error = 0;
    for _ in 0..40 {
        match browser.next_tuple() {
            Ok(Some(_)) if errors > 0 => after_error += 1,
            Ok(Some(_)) => {}
            Ok(None) => {}
            Err(e) => {
                assert!(e.is_storage_failure(), "unexpected error {:?}", e);
                errors += 1;
            }
        }
    }
    assert_eq!(errors, 1);
    assert_eq!(after_error, 0);
    assert!(browser.is_exhausted());
    assert!(browser.next_tuple().unwrap().is_none());
    drop(browser);

    assert!(tree.find(&key(3)).unwrap_err().is_storage_failure());
    assert!(tree.insert(row(100, "v"), false).unwrap_err().is_storage_failure());
    assert!(tree.remove(&key(3)).unwrap_err().is_storage_failure());

    leaves.set_failing(false);
    assert_eq!(tree.row_count(), 20);
    assert_eq!(tree.find(&key(3)).unwrap(), Some(row(3, "v")));
    assert!(tree.find(&key(100)).unwrap().is_none());
    tree.validate_structure().unwrap();
}

#[test]
fn test_comparison_failure_ends_value_scan() {
    let tree = create_test_tree(4, 17);
    for k in 0..10 {
        tree.insert(row(k, "v"), false).unwrap();
    }

    let keys = vec![vec![Value::from("seven")], key(3)];
    let mut browser = tree.browse_values(keys, Direction::Forward).unwrap();
    let result = browser.next_tuple();
    assert!(
        matches!(result, Err(StrataError::TypeMismatch { .. })),
        "expected type mismatch, got {:?}",
        result
    );
    assert!(!StrataError::TypeMismatch {
        expected: "INT64".to_string(),
        actual: "VARCHAR".to_string(),
    }
    .is_storage_failure());
    assert!(browser.is_exhausted());
    assert!(browser.next_tuple().unwrap().is_none());
    assert!(browser.next().is_none());
}

// =============================================================================
// Spilling
// =============================================================================

#[test]
fn test_tree_spills_under_memory_pressure() {
    let dir = tempdir().unwrap();
    let buffer = create_test_buffer(dir.path(), 32 * 1024);
    let leaves = Arc::new(buffer.create_manager("leaf"));
    let index = Arc::new(buffer.create_manager("index"));

    let tree = STree::new(
        leaves.clone(),
        index.clone(),
        Arc::new(KeyComparator::new(1)),
        1,
        vec![TypeId::Int64, TypeId::Varchar],
        STreeConfig::new().with_page_capacity(16).with_seed(44),
    )
    .unwrap();

    let payload = "x".repeat(200);
    let mut rng = StdRng::seed_from_u64(44);
    let mut keys: Vec<i64> = (0..3000).collect();
    for i in (1..keys.len()).rev() {
        keys.swap(i, rng.gen_range(0..=i));
    }
    for &k in &keys {
        tree.insert(row(k, &payload), false).unwrap();
    }

    assert!(leaves.spilled_bytes() > 0);
    assert!(buffer.cache().stats().limbo_frames == 0);
    tree.validate_structure().unwrap();

    for k in (0..3000).step_by(97) {
        assert_eq!(tree.find(&key(k)).unwrap(), Some(row(k, &payload)));
    }
    assert_eq!(scan(&tree, None, None, Direction::Forward), (0..3000).collect::<Vec<_>>());

    for k in (0..3000).filter(|k| k % 3 == 0) {
        tree.remove(&key(k)).unwrap();
    }
    tree.validate_structure().unwrap();
    assert_eq!(tree.row_count(), 2000);

    tree.remove_tree().unwrap();
    assert_eq!(leaves.batch_count(), 0);
    assert_eq!(index.batch_count(), 0);
    assert!(leaves.create_batch(0).is_err());
}

#[test]
fn test_trees_share_one_buffer_manager() {
    let dir = tempdir().unwrap();
    let buffer = create_test_buffer(dir.path(), 16 * 1024);

    let trees: Vec<STree> = (0..3)
        .map(|i| {
            let name = format!("tree{}_", i);
            STree::new(
                Arc::new(buffer.create_manager(&format!("{}leaf", name))),
                Arc::new(buffer.create_manager(&format!("{}index", name))),
                Arc::new(KeyComparator::new(1)),
                1,
                vec![TypeId::Int64, TypeId::Varchar],
                STreeConfig::new().with_page_capacity(8).with_seed(i + 1),
            )
            .unwrap()
        })
        .collect();
    assert_eq!(buffer.manager_count(), 6);

    for k in 0..600 {
        for (i, tree) in trees.iter().enumerate() {
            tree.insert(row(k, &format!("tree{}-{}", i, k)), false).unwrap();
        }
    }
    for (i, tree) in trees.iter().enumerate() {
        assert_eq!(tree.row_count(), 600);
        assert_eq!(
            tree.find(&key(321)).unwrap(),
            Some(row(321, &format!("tree{}-321", i)))
        );
        tree.validate_structure().unwrap();
    }
}

// =============================================================================
// Randomized workloads
// =============================================================================

#[test]
fn test_randomized_against_model() {
    for seed in [1u64, 2, 3] {
        let tree = create_test_tree(8, seed as u32);
        let mut model: BTreeMap<i64, String> = BTreeMap::new();
        let mut rng = StdRng::seed_from_u64(seed);

        for step in 0..4000 {
            let k = rng.gen_range(0..600);
            match rng.gen_range(0..10) {
                0..=4 => {
                    let payload = format!("p{}", step);
                    let previous = tree.insert(row(k, &payload), false).unwrap();
                    match model.get(&k) {
                        Some(existing) => assert_eq!(previous, Some(row(k, existing))),
                        None => {
                            assert!(previous.is_none());
                            model.insert(k, payload);
                        }
                    }
                }
                5 => {
                    let payload = format!("r{}", step);
                    tree.insert(row(k, &payload), true).unwrap();
                    model.insert(k, payload);
                }
                _ => {
                    let removed = tree.remove(&key(k)).unwrap();
                    let expected = model.remove(&k).map(|p| row(k, &p));
                    assert_eq!(removed, expected);
                }
            }

            if step % 500 == 0 {
                tree.validate_structure().unwrap();
            }
        }

        tree.validate_structure().unwrap();
        assert_eq!(tree.row_count(), model.len());

        let rows: Vec<Tuple> = tree
            .browse_range(None, None, Direction::Forward)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        let expected: Vec<Tuple> = model.iter().map(|(k, p)| row(*k, p)).collect();
        assert_eq!(rows, expected);

        for _ in 0..20 {
            let a = rng.gen_range(-10..620);
            let b = rng.gen_range(-10..620);
            let (lower, upper) = (a.min(b), a.max(b));
            let expected: Vec<i64> = model.range(lower..=upper).map(|(k, _)| *k).collect();
            assert_eq!(scan(&tree, Some(lower), Some(upper), Direction::Forward), expected);
        }
    }
}

#[test]
fn test_insert_ordered_bulk_load() {
    let tree = create_test_tree(64, 19);
    let start = Instant::now();
    for k in 0..50_000 {
        assert!(tree.insert_ordered(row(k, "bulk")).unwrap().is_none());
    }
    let elapsed = start.elapsed();
    println!(
        "ordered load: 50,000 rows in {:?} ({:.0} rows/sec)",
        elapsed,
        50_000.0 / elapsed.as_secs_f64()
    );

    tree.validate_structure().unwrap();
    assert_eq!(tree.row_count(), 50_000);
    assert_eq!(tree.find(&key(31_337)).unwrap(), Some(row(31_337, "bulk")));

    let stats = tree.stats().unwrap();
    println!(
        "height {}, pages per level {:?}",
        stats.height, stats.pages_per_level
    );
}
