//! End-to-end scenarios over small hand-built indexes.

use pagevec::{
    BuildOptions, HeapPointer, HnswError, HnswIndex, IndexEntry, IndexOptions, ScanHit,
};
use std::path::PathBuf;

fn scratch(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(name);
    (dir, path)
}

fn small_options() -> IndexOptions {
    IndexOptions {
        dims: 4,
        m: 4,
        ef_construction: 8,
        ef_search: 8,
        algorithm: "l2".into(),
    }
}

fn corner_entries() -> Vec<IndexEntry> {
    vec![
        IndexEntry::new(HeapPointer(1), vec![0.0, 0.0, 0.0, 0.0]),
        IndexEntry::new(HeapPointer(2), vec![1.0, 0.0, 0.0, 0.0]),
        IndexEntry::new(HeapPointer(3), vec![0.0, 1.0, 0.0, 0.0]),
        IndexEntry::new(HeapPointer(4), vec![1.0, 1.0, 0.0, 0.0]),
    ]
}

fn collect(index: &HnswIndex, query: &[f32], topk: usize) -> Vec<ScanHit> {
    let mut scan = index.begin_scan(query, 0.0, topk);
    scan.collect_hits().expect("scan")
}

#[test]
fn nearest_corners_query() {
    let (_dir, path) = scratch("corners.pv");
    let index = HnswIndex::create(&path, &small_options()).unwrap();
    for entry in corner_entries() {
        index.insert(&entry).unwrap();
    }

    let hits = collect(&index, &[0.1, 0.1, 0.0, 0.0], 2);
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].heap_ptr, HeapPointer(1));
    assert!(
        hits[1].heap_ptr == HeapPointer(2) || hits[1].heap_ptr == HeapPointer(3),
        "second hit must be one of the unit corners, got {:?}",
        hits[1].heap_ptr
    );
    assert!(hits.iter().all(|h| h.heap_ptr != HeapPointer(4)));
    assert!(hits[0].distance <= hits[1].distance);
}

#[test]
fn deleted_tuple_never_returned() {
    let (_dir, path) = scratch("tombstone.pv");
    let index = HnswIndex::create(&path, &small_options()).unwrap();
    for entry in corner_entries() {
        index.insert(&entry).unwrap();
    }
    index
        .insert(&IndexEntry::new(HeapPointer(5), vec![5.0, 5.0, 5.0, 5.0]))
        .unwrap();

    let stats = index.bulk_delete(|hp| hp == HeapPointer(5)).unwrap();
    assert_eq!(stats.tuples_removed as usize, deleted_record_count(&index));

    let hits = collect(&index, &[5.0, 5.0, 5.0, 5.0], 1);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].heap_ptr, HeapPointer(4));
}

fn deleted_record_count(index: &HnswIndex) -> usize {
    let stats = index.stats().unwrap();
    stats.levels.iter().map(|l| l.deleted_tuples as usize).sum()
}

#[test]
fn reopen_scan_reaches_everything() {
    let (_dir, path) = scratch("reopen.pv");
    let n = 1000u64;
    let entries: Vec<IndexEntry> = (0..n)
        .map(|i| {
            let x = (i % 32) as f32;
            let y = (i / 32) as f32;
            IndexEntry::new(HeapPointer(i + 1), vec![x, y, x * 0.5, y * 0.5])
        })
        .collect();

    {
        let options = IndexOptions {
            dims: 4,
            m: 8,
            ef_construction: 32,
            ef_search: 16,
            algorithm: "l2".into(),
        };
        let index = HnswIndex::create(&path, &options).unwrap();
        index
            .build(entries, &BuildOptions::default())
            .unwrap();
        index.flush().unwrap();
    }

    let index = HnswIndex::open(&path).unwrap();
    let hits = collect(&index, &[0.0, 0.0, 0.0, 0.0], n as usize);
    assert_eq!(hits.len(), n as usize, "all tuples must be reachable");

    let mut seen: Vec<u64> = hits.iter().map(|h| h.heap_ptr.0).collect();
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), n as usize, "no heap id may repeat");

    for window in hits.windows(2) {
        assert!(window[0].distance <= window[1].distance);
    }
}

#[test]
fn query_dimension_mismatch_is_fatal() {
    let (_dir, path) = scratch("dims.pv");
    let index = HnswIndex::create(&path, &small_options()).unwrap();
    index
        .insert(&IndexEntry::new(HeapPointer(1), vec![0.0; 4]))
        .unwrap();

    let mut scan = index.begin_scan(&[0.0; 5], 0.0, 1);
    assert!(matches!(
        scan.next(),
        Err(HnswError::DimMismatch {
            expected: 4,
            actual: 5
        })
    ));

    let result = index.insert(&IndexEntry::new(HeapPointer(2), vec![0.0; 3]));
    assert!(matches!(result, Err(HnswError::DimMismatch { .. })));
}

#[test]
fn empty_index_scan_is_empty() {
    let (_dir, path) = scratch("empty.pv");
    let index = HnswIndex::create(&path, &small_options()).unwrap();
    let hits = collect(&index, &[0.0; 4], 10);
    assert!(hits.is_empty());
}

#[test]
fn topk_bounds_the_scan() {
    let (_dir, path) = scratch("topk.pv");
    let index = HnswIndex::create(&path, &small_options()).unwrap();
    for entry in corner_entries() {
        index.insert(&entry).unwrap();
    }

    let hits = collect(&index, &[0.0; 4], 3);
    assert_eq!(hits.len(), 3);
}

#[test]
fn vacuum_counts_pages() {
    let (_dir, path) = scratch("vacuum.pv");
    let index = HnswIndex::create(&path, &small_options()).unwrap();
    for entry in corner_entries() {
        index.insert(&entry).unwrap();
    }

    let stats = index.vacuum_cleanup().unwrap();
    assert!(stats.num_pages >= 9, "meta + 8 buckets at minimum");
    let total: u64 = index.stats().unwrap().total_tuples();
    assert_eq!(stats.num_index_tuples, total);
}

#[test]
fn dot_metric_orders_by_inner_product() {
    let (_dir, path) = scratch("dot.pv");
    let options = IndexOptions {
        dims: 2,
        m: 4,
        ef_construction: 8,
        ef_search: 8,
        algorithm: "dot".into(),
    };
    let index = HnswIndex::create(&path, &options).unwrap();
    index
        .insert(&IndexEntry::new(HeapPointer(1), vec![1.0, 0.0]))
        .unwrap();
    index
        .insert(&IndexEntry::new(HeapPointer(2), vec![-1.0, 0.0]))
        .unwrap();

    let hits = collect(&index, &[1.0, 0.0], 2);
    assert_eq!(hits[0].heap_ptr, HeapPointer(1));
    assert_eq!(hits[1].heap_ptr, HeapPointer(2));
}

#[test]
fn linear_scorer_uses_bias() {
    let (_dir, path) = scratch("linear.pv");
    let options = IndexOptions {
        dims: 2,
        m: 4,
        ef_construction: 8,
        ef_search: 8,
        algorithm: "linear".into(),
    };
    {
        let index = HnswIndex::create(&path, &options).unwrap();
        let mut a = IndexEntry::new(HeapPointer(1), vec![0.9, 0.0]);
        a.bias = 0.0;
        let mut b = IndexEntry::new(HeapPointer(2), vec![1.0, 0.0]);
        b.bias = 10.0;
        index.insert(&a).unwrap();
        index.insert(&b).unwrap();
        index.flush().unwrap();
    }

    // With the bias-penalizing scorer installed, the stronger raw
    // match loses to the unbiased tuple.
    let index = HnswIndex::open_with_scorer(&path, |s, bias| -s + bias).unwrap();
    let hits = collect(&index, &[1.0, 0.0], 2);
    assert_eq!(hits[0].heap_ptr, HeapPointer(1));
}
