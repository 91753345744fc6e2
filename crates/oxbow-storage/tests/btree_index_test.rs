//! End-to-end tests for the B+Tree secondary index.
//!
//! Each test builds a relation of fixed-layout records, lets the index
//! bulk-populate itself from a sequential scan of that relation, and then
//! checks range-scan results, the error protocol, and the structural
//! invariants of the resulting tree.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::tempdir;

use oxbow_buffer::{BufferPool, BufferPoolConfig};
use oxbow_common::page::PageId;
use oxbow_common::{AttrType, OxbowError};
use oxbow_storage::{
    is_leaf, BTreeIndex, FileManager, FileManagerConfig, HeapFile, InternalNode, LeafNode, Pager,
    RangeOp, RecordId, LEAF_CAPACITY,
};

/// Byte offset of the key attribute inside a test record.
const KEY_OFFSET: usize = 8;

/// Test record layout: a double, the integer key, and a 64-byte label.
fn make_record(key: i32) -> Vec<u8> {
    let mut record = Vec::with_capacity(76);
    record.extend_from_slice(&(key as f64).to_le_bytes());
    record.extend_from_slice(&key.to_le_bytes());
    let label = format!("{key:05} string record");
    let mut tail = [0u8; 64];
    tail[..label.len()].copy_from_slice(label.as_bytes());
    record.extend_from_slice(&tail);
    record
}

fn create_pager(dir: &std::path::Path) -> Arc<Pager> {
    let disk = Arc::new(
        FileManager::new(FileManagerConfig {
            data_dir: dir.to_path_buf(),
            fsync_enabled: false,
        })
        .unwrap(),
    );
    let pool = Arc::new(BufferPool::new(BufferPoolConfig { num_frames: 512 }));
    Arc::new(Pager::new(disk, pool))
}

/// Builds a relation containing one record per key, in the given order.
/// Returns the relation and the rid every key ended up under.
fn build_relation(pager: &Arc<Pager>, name: &str, keys: &[i32]) -> (HeapFile, HashMap<RecordId, i32>) {
    let heap = HeapFile::create(pager, name).unwrap();
    let mut by_rid = HashMap::new();
    for &key in keys {
        let rid = heap.insert_record(&make_record(key)).unwrap();
        by_rid.insert(rid, key);
    }
    (heap, by_rid)
}

/// Runs a full scan and counts the yielded rids; an empty result range
/// reports as zero.
fn scan_count(
    index: &mut BTreeIndex,
    low: i32,
    low_op: RangeOp,
    high: i32,
    high_op: RangeOp,
) -> usize {
    match index.start_scan(low, low_op, high, high_op) {
        Err(OxbowError::NoSuchKeyFound) => return 0,
        other => other.unwrap(),
    }

    let mut count = 0;
    loop {
        match index.scan_next() {
            Ok(_) => count += 1,
            Err(OxbowError::IndexScanCompleted) => break,
            Err(e) => panic!("unexpected scan error: {e}"),
        }
    }
    index.end_scan().unwrap();
    count
}

/// The scan-count checks shared by the 0..=4999 relation tests.
fn check_standard_scans(index: &mut BTreeIndex) {
    assert_eq!(scan_count(index, 25, RangeOp::Gt, 40, RangeOp::Lt), 14);
    assert_eq!(scan_count(index, 20, RangeOp::Gte, 35, RangeOp::Lte), 16);
    assert_eq!(scan_count(index, -3, RangeOp::Gt, 3, RangeOp::Lt), 3);
    assert_eq!(scan_count(index, 996, RangeOp::Gt, 1001, RangeOp::Lt), 4);
    assert_eq!(scan_count(index, 0, RangeOp::Gt, 1, RangeOp::Lt), 0);
    assert_eq!(scan_count(index, 300, RangeOp::Gt, 400, RangeOp::Lt), 99);
    assert_eq!(scan_count(index, 3000, RangeOp::Gte, 4000, RangeOp::Lt), 1000);
}

#[test]
fn test_forward_inserts() {
    let dir = tempdir().unwrap();
    let pager = create_pager(dir.path());

    let keys: Vec<i32> = (0..5000).collect();
    let (heap, _) = build_relation(&pager, "relA", &keys);
    let mut index = BTreeIndex::open_or_create(&pager, &heap, KEY_OFFSET, AttrType::Integer).unwrap();

    assert_eq!(index.index_name(), "relA.8");
    check_standard_scans(&mut index);
}

#[test]
fn test_backward_inserts() {
    let dir = tempdir().unwrap();
    let pager = create_pager(dir.path());

    let keys: Vec<i32> = (0..5000).rev().collect();
    let (heap, _) = build_relation(&pager, "relA", &keys);
    let mut index = BTreeIndex::open_or_create(&pager, &heap, KEY_OFFSET, AttrType::Integer).unwrap();

    check_standard_scans(&mut index);
}

#[test]
fn test_random_inserts() {
    let dir = tempdir().unwrap();
    let pager = create_pager(dir.path());

    let mut keys: Vec<i32> = (0..5000).collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(0xB7EE);
    keys.shuffle(&mut rng);

    let (heap, _) = build_relation(&pager, "relA", &keys);
    let mut index = BTreeIndex::open_or_create(&pager, &heap, KEY_OFFSET, AttrType::Integer).unwrap();

    check_standard_scans(&mut index);
}

#[test]
fn test_negative_key_range() {
    let dir = tempdir().unwrap();
    let pager = create_pager(dir.path());

    let keys: Vec<i32> = (-500..500).collect();
    let (heap, _) = build_relation(&pager, "relA", &keys);
    let mut index = BTreeIndex::open_or_create(&pager, &heap, KEY_OFFSET, AttrType::Integer).unwrap();

    assert_eq!(scan_count(&mut index, -3, RangeOp::Gt, 3, RangeOp::Lt), 5);
    assert_eq!(
        scan_count(&mut index, -300, RangeOp::Gte, 300, RangeOp::Lte),
        601
    );
    assert_eq!(scan_count(&mut index, -1, RangeOp::Gte, 0, RangeOp::Lt), 1);
}

#[test]
fn test_empty_relation() {
    let dir = tempdir().unwrap();
    let pager = create_pager(dir.path());

    let (heap, _) = build_relation(&pager, "relA", &[]);
    let mut index = BTreeIndex::open_or_create(&pager, &heap, KEY_OFFSET, AttrType::Integer).unwrap();

    for (low, low_op, high, high_op) in [
        (25, RangeOp::Gt, 40, RangeOp::Lt),
        (20, RangeOp::Gte, 35, RangeOp::Lte),
        (-3, RangeOp::Gt, 3, RangeOp::Lt),
        (3000, RangeOp::Gte, 4000, RangeOp::Lt),
    ] {
        assert_eq!(scan_count(&mut index, low, low_op, high, high_op), 0);
    }
}

#[test]
fn test_small_relation_without_root_split() {
    let dir = tempdir().unwrap();
    let pager = create_pager(dir.path());

    let keys: Vec<i32> = (0..300).collect();
    let (heap, _) = build_relation(&pager, "relA", &keys);
    let mut index = BTreeIndex::open_or_create(&pager, &heap, KEY_OFFSET, AttrType::Integer).unwrap();

    assert_eq!(scan_count(&mut index, 25, RangeOp::Gt, 40, RangeOp::Lt), 14);
    assert_eq!(scan_count(&mut index, 20, RangeOp::Gte, 35, RangeOp::Lte), 16);
    assert_eq!(scan_count(&mut index, -3, RangeOp::Gt, 3, RangeOp::Lt), 3);
    assert_eq!(
        scan_count(&mut index, 200, RangeOp::Gte, 250, RangeOp::Lte),
        51
    );
    assert_eq!(scan_count(&mut index, 0, RangeOp::Gt, 1, RangeOp::Lt), 0);
    assert_eq!(scan_count(&mut index, 300, RangeOp::Gt, 400, RangeOp::Lt), 0);
    assert_eq!(
        scan_count(&mut index, 3000, RangeOp::Gte, 4000, RangeOp::Lt),
        0
    );
}

#[test]
fn test_scan_terminates_on_full_last_leaf() {
    let dir = tempdir().unwrap();
    let pager = create_pager(dir.path());

    // One more key than a single leaf holds: the rightmost leaf of the
    // seeded pair is exactly full and has no right sibling, so a scan must
    // terminate on it without chasing a nil page.
    let top = LEAF_CAPACITY as i32;
    let keys: Vec<i32> = (0..=top).collect();
    let (heap, _) = build_relation(&pager, "relA", &keys);
    let mut index = BTreeIndex::open_or_create(&pager, &heap, KEY_OFFSET, AttrType::Integer).unwrap();

    assert_eq!(
        scan_count(&mut index, 0, RangeOp::Gte, top, RangeOp::Lte),
        LEAF_CAPACITY + 1
    );
    assert_eq!(
        scan_count(&mut index, 0, RangeOp::Gt, top, RangeOp::Lte),
        LEAF_CAPACITY
    );
    assert_eq!(
        scan_count(&mut index, 430, RangeOp::Gte, 432, RangeOp::Lte),
        3
    );
    assert_eq!(
        scan_count(&mut index, 431, RangeOp::Gt, 432, RangeOp::Lte),
        1
    );
    assert_eq!(
        scan_count(&mut index, 0, RangeOp::Gt, 432, RangeOp::Lte),
        432
    );
}

#[test]
fn test_first_leaf_split() {
    let dir = tempdir().unwrap();
    let pager = create_pager(dir.path());

    // One key past the exactly-full rightmost leaf forces the first leaf
    // split and the first separator promotion into the root.
    let top = LEAF_CAPACITY as i32 + 1;
    let keys: Vec<i32> = (0..=top).collect();
    let (heap, _) = build_relation(&pager, "relA", &keys);
    let mut index = BTreeIndex::open_or_create(&pager, &heap, KEY_OFFSET, AttrType::Integer).unwrap();

    assert_eq!(
        scan_count(&mut index, 0, RangeOp::Gte, top, RangeOp::Lte),
        LEAF_CAPACITY + 2
    );
    // Ranges straddling the split point still come back complete.
    let mid = top / 2;
    assert_eq!(
        scan_count(&mut index, mid - 5, RangeOp::Gte, mid + 5, RangeOp::Lte),
        11
    );
    assert_eq!(
        scan_count(&mut index, top - 1, RangeOp::Gt, top, RangeOp::Lte),
        1
    );
}

#[test]
fn test_duplicate_keys() {
    let dir = tempdir().unwrap();
    let pager = create_pager(dir.path());

    let mut keys = vec![7; 5];
    keys.extend([1, 2, 3, 9, 10]);
    let (heap, by_rid) = build_relation(&pager, "relA", &keys);
    let mut index = BTreeIndex::open_or_create(&pager, &heap, KEY_OFFSET, AttrType::Integer).unwrap();

    assert_eq!(scan_count(&mut index, 7, RangeOp::Gte, 7, RangeOp::Lte), 5);
    assert_eq!(scan_count(&mut index, 6, RangeOp::Gt, 8, RangeOp::Lt), 5);
    assert_eq!(scan_count(&mut index, 0, RangeOp::Gt, 20, RangeOp::Lt), 10);

    // All five duplicate rids come back, adjacently.
    index.start_scan(7, RangeOp::Gte, 7, RangeOp::Lte).unwrap();
    let mut dup_rids = Vec::new();
    while let Ok(rid) = index.scan_next() {
        dup_rids.push(rid);
    }
    index.end_scan().unwrap();

    assert_eq!(dup_rids.len(), 5);
    for rid in &dup_rids {
        assert_eq!(by_rid[rid], 7);
    }
}

#[test]
fn test_scan_yields_keys_in_order() {
    let dir = tempdir().unwrap();
    let pager = create_pager(dir.path());

    let mut keys: Vec<i32> = (0..2000).collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    keys.shuffle(&mut rng);

    let (heap, by_rid) = build_relation(&pager, "relA", &keys);
    let mut index = BTreeIndex::open_or_create(&pager, &heap, KEY_OFFSET, AttrType::Integer).unwrap();

    index
        .start_scan(100, RangeOp::Gte, 1500, RangeOp::Lte)
        .unwrap();
    let mut seen = Vec::new();
    loop {
        match index.scan_next() {
            Ok(rid) => seen.push(by_rid[&rid]),
            Err(OxbowError::IndexScanCompleted) => break,
            Err(e) => panic!("unexpected scan error: {e}"),
        }
    }
    index.end_scan().unwrap();

    assert_eq!(seen.len(), 1401);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(seen.first(), Some(&100));
    assert_eq!(seen.last(), Some(&1500));
}

#[test]
fn test_error_protocol() {
    let dir = tempdir().unwrap();
    let pager = create_pager(dir.path());

    let keys: Vec<i32> = (0..50).collect();
    let (heap, _) = build_relation(&pager, "relA", &keys);
    let mut index = BTreeIndex::open_or_create(&pager, &heap, KEY_OFFSET, AttrType::Integer).unwrap();

    // Misplaced operators.
    assert!(matches!(
        index.start_scan(10, RangeOp::Lt, 20, RangeOp::Lte),
        Err(OxbowError::BadOpcodes)
    ));
    assert!(matches!(
        index.start_scan(10, RangeOp::Gt, 20, RangeOp::Gte),
        Err(OxbowError::BadOpcodes)
    ));

    // Inverted range.
    assert!(matches!(
        index.start_scan(50, RangeOp::Gt, 10, RangeOp::Lt),
        Err(OxbowError::BadScanrange)
    ));

    // No scan active.
    assert!(matches!(
        index.scan_next(),
        Err(OxbowError::ScanNotInitialized)
    ));
    assert!(matches!(
        index.end_scan(),
        Err(OxbowError::ScanNotInitialized)
    ));

    // Exhaustion leaves the scan active until end_scan.
    index.start_scan(45, RangeOp::Gte, 60, RangeOp::Lte).unwrap();
    for _ in 0..5 {
        index.scan_next().unwrap();
    }
    assert!(matches!(
        index.scan_next(),
        Err(OxbowError::IndexScanCompleted)
    ));
    assert!(matches!(
        index.scan_next(),
        Err(OxbowError::IndexScanCompleted)
    ));
    index.end_scan().unwrap();
    assert!(matches!(
        index.end_scan(),
        Err(OxbowError::ScanNotInitialized)
    ));
}

#[test]
fn test_restarting_a_scan_releases_the_previous_one() {
    let dir = tempdir().unwrap();
    let pager = create_pager(dir.path());

    let keys: Vec<i32> = (0..100).collect();
    let (heap, _) = build_relation(&pager, "relA", &keys);
    let mut index = BTreeIndex::open_or_create(&pager, &heap, KEY_OFFSET, AttrType::Integer).unwrap();

    index.start_scan(10, RangeOp::Gte, 90, RangeOp::Lte).unwrap();
    index.scan_next().unwrap();

    // Starting over mid-scan must not leak the previous leaf pin.
    index.start_scan(20, RangeOp::Gte, 30, RangeOp::Lte).unwrap();
    assert_eq!(
        std::iter::from_fn(|| index.scan_next().ok()).count(),
        11
    );
    index.end_scan().unwrap();
}

#[test]
fn test_reopen_existing_index() {
    let dir = tempdir().unwrap();
    let pager = create_pager(dir.path());

    let keys: Vec<i32> = (0..1000).collect();
    let (heap, _) = build_relation(&pager, "relA", &keys);

    {
        let mut index =
            BTreeIndex::open_or_create(&pager, &heap, KEY_OFFSET, AttrType::Integer).unwrap();
        assert_eq!(scan_count(&mut index, 100, RangeOp::Gte, 199, RangeOp::Lte), 100);
        index.close().unwrap();
    }

    // Open path: metadata must validate and scans still work.
    let mut index = BTreeIndex::open_or_create(&pager, &heap, KEY_OFFSET, AttrType::Integer).unwrap();
    assert_eq!(scan_count(&mut index, 100, RangeOp::Gte, 199, RangeOp::Lte), 100);
    assert_eq!(scan_count(&mut index, 0, RangeOp::Gte, 999, RangeOp::Lte), 1000);
    index.close().unwrap();

    // Same file, contradicting metadata: rejected.
    assert!(matches!(
        BTreeIndex::open_or_create(&pager, &heap, KEY_OFFSET, AttrType::Double),
        Err(OxbowError::BadIndexInfo(_))
    ));
}

// =============================================================================
// Structural invariants
// =============================================================================

fn page_bytes(pager: &Arc<Pager>, file_id: u32, page_no: u32) -> Vec<u8> {
    let pid = PageId::new(file_id, page_no);
    let frame = pager.fetch_page(pid).unwrap();
    let data = frame.read_data().to_vec();
    pager.unpin_page(pid, false).unwrap();
    data
}

/// Recursively checks separator bounds, parent back-pointers, and level
/// consistency below `page_no`; returns the leftmost leaf of the subtree.
fn validate_subtree(
    pager: &Arc<Pager>,
    file_id: u32,
    page_no: u32,
    expected_parent: u32,
    low: Option<i32>,
    high: Option<i32>,
) -> u32 {
    let data = page_bytes(pager, file_id, page_no);

    if is_leaf(&data) {
        assert_eq!(LeafNode::parent(&data), expected_parent);
        let count = LeafNode::key_count(&data);
        for i in 0..count {
            let key = LeafNode::key(&data, i);
            if let Some(low) = low {
                assert!(key >= low, "leaf key {key} below separator {low}");
            }
            if let Some(high) = high {
                assert!(key < high, "leaf key {key} not below separator {high}");
            }
            if i > 0 {
                assert!(LeafNode::key(&data, i - 1) <= key);
            }
            assert!(!LeafNode::rid(&data, i).is_empty());
        }
        return page_no;
    }

    assert_eq!(InternalNode::parent(&data), expected_parent);
    let count = InternalNode::key_count(&data);
    assert!(count >= 1, "internal node without separators");

    let children_are_leaves = InternalNode::level(&data) == 1;
    let mut leftmost = 0;
    for i in 0..=count {
        let child_no = InternalNode::child(&data, i);
        assert_ne!(child_no, 0, "nil child pointer at live slot");

        let child = page_bytes(pager, file_id, child_no);
        assert_eq!(is_leaf(&child), children_are_leaves);

        let child_low = if i == 0 {
            low
        } else {
            Some(InternalNode::key(&data, i - 1))
        };
        let child_high = if i == count {
            high
        } else {
            Some(InternalNode::key(&data, i))
        };
        let child_leftmost =
            validate_subtree(pager, file_id, child_no, page_no, child_low, child_high);
        if i == 0 {
            leftmost = child_leftmost;
        }
    }
    leftmost
}

#[test]
fn test_structural_invariants_after_random_inserts() {
    let dir = tempdir().unwrap();
    let pager = create_pager(dir.path());

    let mut keys: Vec<i32> = (0..3000).collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    keys.shuffle(&mut rng);

    let (heap, by_rid) = build_relation(&pager, "relA", &keys);
    let index = BTreeIndex::open_or_create(&pager, &heap, KEY_OFFSET, AttrType::Integer).unwrap();

    let file_id = index.file_id();
    let root_no = index.root_page_no();

    // The root is an internal node with no parent.
    let root = page_bytes(&pager, file_id, root_no);
    assert!(!is_leaf(&root));
    assert_eq!(InternalNode::parent(&root), 0);

    let leftmost = validate_subtree(&pager, file_id, root_no, 0, None, None);

    // The sibling chain enumerates every inserted pair in non-decreasing
    // key order and terminates at 0.
    let mut expected: HashMap<RecordId, i32> = by_rid.clone();
    let mut current = leftmost;
    let mut previous_key = i32::MIN;
    while current != 0 {
        let data = page_bytes(&pager, file_id, current);
        assert!(is_leaf(&data));
        for i in 0..LeafNode::key_count(&data) {
            let key = LeafNode::key(&data, i);
            assert!(previous_key <= key);
            previous_key = key;

            let rid = LeafNode::rid(&data, i);
            assert_eq!(expected.remove(&rid), Some(key));
        }
        current = LeafNode::right_sibling(&data);
    }
    assert!(expected.is_empty(), "leaf chain missed inserted entries");

    // Descending on a sample of keys lands on a leaf containing the key.
    for probe in [0, 1, 777, 1500, 2999] {
        let mut page_no = root_no;
        loop {
            let data = page_bytes(&pager, file_id, page_no);
            if is_leaf(&data) {
                let found = (0..LeafNode::key_count(&data))
                    .any(|i| LeafNode::key(&data, i) == probe);
                assert!(found, "descent for {probe} missed its leaf");
                break;
            }
            let slot = InternalNode::search_index(&data, probe);
            page_no = InternalNode::child(&data, slot);
        }
    }
}
