//! Structural invariants checked over freshly built indexes: chain
//! integrity, degree bounds, level-homogeneous links, dimension
//! consistency and the advisory degree accounting.

use pagevec::{BuildOptions, HeapPointer, HnswIndex, IndexEntry, IndexOptions};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn random_entries(n: u64, dims: usize, seed: u64) -> Vec<IndexEntry> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let vector: Vec<f32> = (0..dims).map(|_| rng.gen_range(-1.0..1.0)).collect();
            IndexEntry::new(HeapPointer(i + 1), vector)
        })
        .collect()
}

fn build_index(
    path: &std::path::Path,
    entries: Vec<IndexEntry>,
    workers: u32,
) -> HnswIndex {
    let options = IndexOptions {
        dims: 16,
        m: 8,
        ef_construction: 48,
        ef_search: 32,
        algorithm: "l2".into(),
    };
    let index = HnswIndex::create(path, &options).unwrap();
    index
        .build(
            entries,
            &BuildOptions {
                parallel_workers: workers,
            },
        )
        .unwrap();
    index
}

#[test]
fn sequential_build_invariants_hold() {
    let dir = tempfile::tempdir().unwrap();
    let index = build_index(&dir.path().join("seq.pv"), random_entries(400, 16, 11), 0);

    // stats() validates chain back-pointers, page level stamps, degree
    // bounds, self-links, cross-level links and per-tuple dims.
    let stats = index.stats().unwrap();
    assert_eq!(stats.levels[0].ntuples, 400);
    assert!(stats.max_level >= 0);

    // Every level above max_level stays empty.
    for level in &stats.levels {
        if i64::from(level.level) > i64::from(stats.max_level) {
            assert_eq!(level.ntuples, 0);
            assert_eq!(level.pages, 0);
        }
    }
}

#[test]
fn parallel_build_invariants_hold() {
    let dir = tempfile::tempdir().unwrap();
    let index = build_index(&dir.path().join("par.pv"), random_entries(400, 16, 11), 4);
    let stats = index.stats().unwrap();
    assert_eq!(stats.levels[0].ntuples, 400);
}

#[test]
fn degree_accounting_stays_balanced() {
    let dir = tempfile::tempdir().unwrap();
    let index = build_index(&dir.path().join("deg.pv"), random_entries(300, 16, 23), 0);
    let stats = index.stats().unwrap();

    let out = stats.total_out_degree() as i64;
    let in_ = stats.total_in_degree() as i64;
    assert!(out > 0, "a built graph has edges");
    // in_degree is advisory; drift must stay within 1% of the edges.
    let drift = (out - in_).abs() as f64;
    assert!(
        drift <= (out as f64) * 0.01,
        "degree drift {drift} exceeds 1% of {out} edges"
    );
}

#[test]
fn deletion_hides_rows_from_any_query() {
    let dir = tempfile::tempdir().unwrap();
    let entries = random_entries(200, 16, 37);
    let vectors: Vec<Vec<f32>> = entries.iter().map(|e| e.vector.clone()).collect();
    let index = build_index(&dir.path().join("del.pv"), entries, 0);

    // Tombstone every third row.
    let deleted: Vec<HeapPointer> = (1..=200u64)
        .filter(|i| i % 3 == 0)
        .map(HeapPointer)
        .collect();
    let stats = index
        .bulk_delete(|hp| deleted.contains(&hp))
        .unwrap();
    assert!(stats.tuples_removed >= deleted.len() as u64);

    // No query may surface a deleted heap id, whatever its topology.
    for query in vectors.iter().step_by(17) {
        let mut scan = index.begin_scan(query, 0.0, 50);
        let hits = scan.collect_hits().unwrap();
        for hit in hits {
            assert!(
                !deleted.contains(&hit.heap_ptr),
                "deleted {:?} surfaced",
                hit.heap_ptr
            );
        }
    }
}

#[test]
fn stats_roundtrip_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("persist.pv");
    let before = {
        let index = build_index(&path, random_entries(150, 16, 51), 0);
        index.flush().unwrap();
        index.stats().unwrap()
    };

    let index = HnswIndex::open(&path).unwrap();
    let after = index.stats().unwrap();
    assert_eq!(before.max_level, after.max_level);
    for (b, a) in before.levels.iter().zip(after.levels.iter()) {
        assert_eq!(b.ntuples, a.ntuples);
        assert_eq!(b.pages, a.pages);
        assert_eq!(b.sum_out_degree, a.sum_out_degree);
    }
}

#[test]
fn vector_roundtrip_via_scan() {
    // Inserted vectors come back with exact distances: querying a
    // stored vector returns its own row at distance zero.
    let dir = tempfile::tempdir().unwrap();
    let entries = random_entries(64, 16, 77);
    let vectors: Vec<Vec<f32>> = entries.iter().map(|e| e.vector.clone()).collect();
    let index = build_index(&dir.path().join("rt.pv"), entries, 0);

    for (i, vector) in vectors.iter().enumerate() {
        let mut scan = index.begin_scan(vector, 0.0, 1);
        let hit = scan.next().unwrap().expect("row found");
        assert_eq!(hit.heap_ptr, HeapPointer(i as u64 + 1));
        assert!(hit.distance.abs() < 1e-6);
    }
}
