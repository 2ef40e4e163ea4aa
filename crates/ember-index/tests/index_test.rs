//! Functional validation of the radix tree index:
//! - round-trip, overwrite, idempotence, absence
//! - prefix splits, bucket splits, directory doubling
//! - range scan exactness against a model
//! - file-backed pool construction

use std::collections::BTreeMap;

use ember_common::IndexConfig;
use ember_index::{KeyValue, RadixTreeIndex};
use ember_pmem::PmemPool;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const TEST_POOL_BYTES: usize = 32 * 1024 * 1024;

fn new_tree() -> RadixTreeIndex {
    let pool = PmemPool::with_capacity(TEST_POOL_BYTES).unwrap();
    RadixTreeIndex::create(pool).unwrap()
}

fn scan_sorted(tree: &RadixTreeIndex, left: u64, right: u64) -> Vec<(u64, u64)> {
    let mut out: Vec<(u64, u64)> = tree
        .scan(left, right)
        .into_iter()
        .map(|KeyValue { key, value }| (key, value))
        .collect();
    out.sort_unstable();
    out
}

fn expected_range(model: &BTreeMap<u64, u64>, left: u64, right: u64) -> Vec<(u64, u64)> {
    model
        .range(left..=right)
        .map(|(&k, &v)| (k, v))
        .collect()
}

// =============================================================================
// Round-trip and overwrite semantics
// =============================================================================

#[test]
fn test_round_trip_random_keys() {
    let mut tree = new_tree();
    let mut model = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..500 {
        let key: u64 = rng.gen();
        let value: u64 = rng.gen();
        tree.insert(key, value).unwrap();
        model.insert(key, value);
        // every earlier key must still resolve
        assert_eq!(tree.search(key), Some(value));
    }
    for (&k, &v) in &model {
        assert_eq!(tree.search(k), Some(v), "lost key {k:#x}");
    }
}

#[test]
fn test_round_trip_clustered_keys() {
    // Small byte alphabet maximizes shared prefixes, collisions, and node
    // splits.
    let mut tree = new_tree();
    let mut model = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(42);
    let alphabet = [0x00u8, 0x01, 0x02, 0xAB];

    for i in 0..400u64 {
        let mut bytes = [0u8; 8];
        for b in bytes.iter_mut() {
            *b = alphabet[rng.gen_range(0..alphabet.len())];
        }
        let key = u64::from_be_bytes(bytes);
        tree.insert(key, i).unwrap();
        model.insert(key, i);
    }
    for (&k, &v) in &model {
        assert_eq!(tree.search(k), Some(v), "lost key {k:#x}");
    }
    assert_eq!(
        scan_sorted(&tree, 0, u64::MAX),
        expected_range(&model, 0, u64::MAX)
    );
}

#[test]
fn test_overwrite_replaces_value() {
    let mut tree = new_tree();
    tree.insert(0xDEAD_BEEF_0000_0001, 1).unwrap();
    tree.insert(0xDEAD_BEEF_0000_0001, 2).unwrap();
    assert_eq!(tree.search(0xDEAD_BEEF_0000_0001), Some(2));
    assert_eq!(scan_sorted(&tree, 0, u64::MAX).len(), 1);
}

#[test]
fn test_idempotent_reinsert() {
    let mut tree = new_tree();
    for k in [1u64, 2, 3, 0x0101_0101_0101_0101, u64::MAX] {
        tree.insert(k, k ^ 0xFF).unwrap();
    }
    let footprint = tree.memory_footprint();
    let snapshot = scan_sorted(&tree, 0, u64::MAX);

    for k in [1u64, 2, 3, 0x0101_0101_0101_0101, u64::MAX] {
        tree.insert(k, k ^ 0xFF).unwrap();
    }
    assert_eq!(tree.memory_footprint(), footprint);
    assert_eq!(scan_sorted(&tree, 0, u64::MAX), snapshot);
}

#[test]
fn test_absent_keys_report_not_found() {
    let mut tree = new_tree();
    for i in 0..100u64 {
        tree.insert(i * 3, i).unwrap();
    }
    for i in 0..100u64 {
        assert_eq!(tree.search(i * 3 + 1), None);
        assert_eq!(tree.search(i * 3 + 2), None);
    }
}

// =============================================================================
// Split and doubling transparency
// =============================================================================

#[test]
fn test_bucket_overflow_forces_directory_growth() {
    let mut tree = new_tree();
    let mut model = BTreeMap::new();
    // All keys share their top half, so the root compresses those four
    // bytes; every subkey shares its low byte, so they pile into one
    // bucket, forcing doubling and then segment splits. The subkeys differ
    // in their top bits, which is what the directory separates on.
    for i in 0..64u64 {
        let key = 0xAABB_CCDD_0000_0000 | (i << 26) | 0x42;
        tree.insert(key, i).unwrap();
        model.insert(key, i);
    }
    for (&k, &v) in &model {
        assert_eq!(tree.search(k), Some(v), "lost key {k:#x} after splits");
    }
    assert_eq!(
        scan_sorted(&tree, 0, u64::MAX),
        expected_range(&model, 0, u64::MAX)
    );
}

#[test]
fn test_prefix_split_transparency() {
    let mut tree = new_tree();
    let mut model = BTreeMap::new();
    // First cluster commits the root prefix; the second forces a root
    // split; the third splits again deeper.
    for (i, base) in [0x0101_0101_0000_0000u64, 0x0102_0000_0000_0000, 0xFF00_0000_0000_0000]
        .into_iter()
        .enumerate()
    {
        for j in 0..20u64 {
            let key = base | j;
            let value = (i as u64) << 32 | j;
            tree.insert(key, value).unwrap();
            model.insert(key, value);
        }
        for (&k, &v) in &model {
            assert_eq!(tree.search(k), Some(v), "lost key {k:#x}");
        }
    }
    assert_eq!(
        scan_sorted(&tree, 0, u64::MAX),
        expected_range(&model, 0, u64::MAX)
    );
}

#[test]
fn test_collision_chain_resolves_through_children() {
    let mut tree = new_tree();
    // Drop the root prefix first so interior levels hold records.
    tree.insert(0x0000_0001_0000_0001, 1).unwrap();
    tree.insert(0x8000_0000_0000_0001, 2).unwrap();
    // Shared first 32 bits: the record slot must turn into a child node.
    let group = 0x1234_5678_0000_0000u64;
    for j in 0..16u64 {
        tree.insert(group | j, 100 + j).unwrap();
    }
    for j in 0..16u64 {
        assert_eq!(tree.search(group | j), Some(100 + j));
    }
    // The whole group is reachable through one root subkey.
    let got = scan_sorted(&tree, group, group | 0xFFFF_FFFF);
    let want: Vec<(u64, u64)> = (0..16u64).map(|j| (group | j, 100 + j)).collect();
    assert_eq!(got, want);
}

// =============================================================================
// Concrete scenarios
// =============================================================================

#[test]
fn test_shared_prefix_scenario() {
    let mut tree = new_tree();
    tree.insert(0x0000_0001_0000_0001, 100).unwrap();
    tree.insert(0x0000_0001_0000_0002, 200).unwrap();
    tree.insert(0x0000_0002_0000_0001, 300).unwrap();

    assert_eq!(tree.search(0x0000_0001_0000_0001), Some(100));
    assert_eq!(tree.search(0x0000_0001_0000_0002), Some(200));
    assert_eq!(tree.search(0x0000_0002_0000_0001), Some(300));

    let got = scan_sorted(&tree, 0x0000_0001_0000_0000, 0x0000_0001_0000_0002);
    assert_eq!(
        got,
        vec![(0x0000_0001_0000_0001, 100), (0x0000_0001_0000_0002, 200)]
    );
}

#[test]
fn test_scan_boundaries_inclusive() {
    let mut tree = new_tree();
    let mut model = BTreeMap::new();
    for i in 0..50u64 {
        let key = 0x0100_0000_0000_0000 | (i * 7);
        tree.insert(key, i).unwrap();
        model.insert(key, i);
    }
    let keys: Vec<u64> = model.keys().copied().collect();
    let (left, right) = (keys[10], keys[40]);
    assert_eq!(
        scan_sorted(&tree, left, right),
        expected_range(&model, left, right)
    );
    // point scan
    assert_eq!(
        scan_sorted(&tree, keys[10], keys[10]),
        vec![(keys[10], 10)]
    );
    // empty range between two keys
    assert_eq!(scan_sorted(&tree, keys[10] + 1, keys[11] - 1), vec![]);
}

#[test]
fn test_scan_random_ranges_match_model() {
    let mut tree = new_tree();
    let mut model = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(7);
    let alphabet = [0x00u8, 0x01, 0x7F];

    for i in 0..300u64 {
        let mut bytes = [0u8; 8];
        for b in bytes.iter_mut() {
            *b = alphabet[rng.gen_range(0..alphabet.len())];
        }
        let key = u64::from_be_bytes(bytes);
        tree.insert(key, i).unwrap();
        model.insert(key, i);
    }
    for _ in 0..200 {
        let mut left: u64 = rng.gen();
        let mut right: u64 = rng.gen();
        if left > right {
            std::mem::swap(&mut left, &mut right);
        }
        assert_eq!(
            scan_sorted(&tree, left, right),
            expected_range(&model, left, right),
            "scan [{left:#x}, {right:#x}] diverged from model"
        );
    }
}

// =============================================================================
// Configuration and pool backing
// =============================================================================

#[test]
fn test_from_config_file_backed() {
    let dir = tempfile::tempdir().unwrap();
    let config = IndexConfig {
        pool_capacity: 4 * 1024 * 1024,
        pool_path: Some(dir.path().join("index.pool")),
        initial_global_depth: 1,
    };
    let mut tree = RadixTreeIndex::from_config(&config).unwrap();
    for i in 0..100u64 {
        tree.insert(i | 0x4200_0000_0000_0000, i).unwrap();
    }
    for i in 0..100u64 {
        assert_eq!(tree.search(i | 0x4200_0000_0000_0000), Some(i));
    }
}

#[test]
fn test_pool_exhaustion_is_reported() {
    let pool = PmemPool::with_capacity(ember_common::MIN_POOL_CAPACITY).unwrap();
    let mut tree = RadixTreeIndex::create(pool).unwrap();
    let mut hit_exhaustion = false;
    // Collision children allocate segments until the tiny pool runs out.
    for i in 0..4096u64 {
        if tree.insert(i, i).is_err() {
            hit_exhaustion = true;
            break;
        }
    }
    assert!(hit_exhaustion, "tiny pool never reported exhaustion");
}
