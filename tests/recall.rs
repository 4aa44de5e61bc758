//! Recall calibration against brute force, sequential vs. parallel.

use pagevec::{BuildOptions, HeapPointer, HnswIndex, IndexEntry, IndexOptions};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;

const N: u64 = 800;
const DIMS: usize = 24;
const TOPK: usize = 10;
const QUERIES: usize = 20;

fn dataset(seed: u64) -> (Vec<IndexEntry>, Vec<Vec<f32>>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let entries: Vec<IndexEntry> = (0..N)
        .map(|i| {
            let vector: Vec<f32> = (0..DIMS).map(|_| rng.gen_range(0.0..1.0)).collect();
            IndexEntry::new(HeapPointer(i + 1), vector)
        })
        .collect();
    let queries: Vec<Vec<f32>> = (0..QUERIES)
        .map(|_| (0..DIMS).map(|_| rng.gen_range(0.0..1.0)).collect())
        .collect();
    (entries, queries)
}

fn l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn brute_force_topk(entries: &[IndexEntry], query: &[f32], k: usize) -> HashSet<u64> {
    let mut scored: Vec<(f32, u64)> = entries
        .iter()
        .map(|e| (l2(&e.vector, query), e.heap_ptr.0))
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));
    scored.iter().take(k).map(|(_, id)| *id).collect()
}

fn build(path: &std::path::Path, entries: Vec<IndexEntry>, workers: u32) -> HnswIndex {
    let options = IndexOptions {
        dims: DIMS as u32,
        m: 16,
        ef_construction: 96,
        ef_search: 64,
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

fn measure_recall(index: &HnswIndex, entries: &[IndexEntry], queries: &[Vec<f32>]) -> f64 {
    let mut found = 0usize;
    for query in queries {
        let exact = brute_force_topk(entries, query, TOPK);
        let mut scan = index.begin_scan(query, 0.0, TOPK);
        let hits = scan.collect_hits().unwrap();
        found += hits.iter().filter(|h| exact.contains(&h.heap_ptr.0)).count();
    }
    found as f64 / (TOPK * queries.len()) as f64
}

#[test]
fn sequential_recall_beats_floor() {
    let dir = tempfile::tempdir().unwrap();
    let (entries, queries) = dataset(5);
    let index = build(&dir.path().join("seq.pv"), entries.clone(), 0);
    let recall = measure_recall(&index, &entries, &queries);
    assert!(recall >= 0.9, "sequential recall {recall} below floor");
}

#[test]
fn parallel_build_matches_sequential_recall() {
    let dir = tempfile::tempdir().unwrap();
    let (entries, queries) = dataset(5);

    let seq = build(&dir.path().join("seq.pv"), entries.clone(), 0);
    let par = build(&dir.path().join("par.pv"), entries.clone(), 4);

    let recall_seq = measure_recall(&seq, &entries, &queries);
    let recall_par = measure_recall(&par, &entries, &queries);

    assert!(recall_par >= 0.85, "parallel recall {recall_par} below floor");
    assert!(
        (recall_seq - recall_par).abs() <= 0.05,
        "recall gap too wide: sequential {recall_seq} vs parallel {recall_par}"
    );
}
