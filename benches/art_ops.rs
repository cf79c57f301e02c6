//! Benchmarks for ART operations.

use artkv::{Art, KeyValueDb};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;

fn generate_sequential_keys(n: usize) -> Vec<Vec<u8>> {
    (0..n).map(|i| format!("key:{:08}", i).into_bytes()).collect()
}

fn generate_url_like_keys(n: usize) -> Vec<Vec<u8>> {
    let domains = ["example.com", "test.org", "demo.net", "sample.io"];
    let paths = ["users", "posts", "comments", "api/v1", "api/v2"];

    (0..n)
        .map(|i| {
            let domain = domains[i % domains.len()];
            let path = paths[(i / domains.len()) % paths.len()];
            let id = i / (domains.len() * paths.len());
            format!("{}/{}/{}", domain, path, id).into_bytes()
        })
        .collect()
}

fn shuffled(mut keys: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    keys.shuffle(&mut StdRng::seed_from_u64(42));
    keys
}

fn filled_art(keys: &[Vec<u8>]) -> (Art, artkv::RootId) {
    let mut art = Art::new();
    let root = art.create_empty_root();
    let mut c = art.create_cursor(root);
    for (i, key) in keys.iter().enumerate() {
        c.upsert(&mut art, key, &(i as u64).to_le_bytes());
    }
    (art, root)
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");

    for size in [1_000, 10_000, 100_000] {
        let keys = shuffled(generate_sequential_keys(size));

        group.bench_with_input(BenchmarkId::new("Art", size), &keys, |b, keys| {
            b.iter(|| black_box(filled_art(keys)));
        });

        group.bench_with_input(BenchmarkId::new("Art/build_tree", size), &keys, |b, keys| {
            let mut sorted = keys.clone();
            sorted.sort();
            b.iter(|| {
                let mut art = Art::new();
                let root = art.create_empty_root();
                let mut c = art.create_cursor(root);
                c.build_tree(&mut art, sorted.iter().map(|k| (k, &k[4..])));
                black_box(art)
            });
        });

        group.bench_with_input(BenchmarkId::new("BTreeMap", size), &keys, |b, keys| {
            b.iter(|| {
                let mut map: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
                for (i, key) in keys.iter().enumerate() {
                    map.insert(key.clone(), (i as u64).to_le_bytes().to_vec());
                }
                black_box(map)
            });
        });
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");

    for size in [1_000, 10_000, 100_000] {
        let keys = generate_sequential_keys(size);
        let (art, root) = filled_art(&keys);

        let mut btree: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for (i, key) in keys.iter().enumerate() {
            btree.insert(key.clone(), (i as u64).to_le_bytes().to_vec());
        }

        let probes = shuffled(keys);
        group.bench_with_input(BenchmarkId::new("Art", size), &probes, |b, keys| {
            let mut cursor = art.create_cursor(root);
            b.iter(|| {
                let mut sum = 0usize;
                for key in keys.iter() {
                    if cursor.find_exact(&art, key) {
                        sum += cursor.value_length(&art);
                    }
                }
                black_box(sum)
            });
        });

        group.bench_with_input(BenchmarkId::new("BTreeMap", size), &probes, |b, keys| {
            b.iter(|| {
                let mut sum = 0usize;
                for key in keys.iter() {
                    if let Some(v) = btree.get(key) {
                        sum += v.len();
                    }
                }
                black_box(sum)
            });
        });
    }

    group.finish();
}

fn bench_iterate(c: &mut Criterion) {
    let mut group = c.benchmark_group("iterate");
    let keys = generate_url_like_keys(100_000);
    let (art, root) = filled_art(&keys);

    group.bench_function("Art/move_next", |b| {
        let mut cursor = art.create_cursor(root);
        b.iter(|| {
            let mut n = 0u64;
            if cursor.find_first(&art, b"") {
                n += 1;
                while cursor.move_next(&art) {
                    n += 1;
                }
            }
            black_box(n)
        });
    });

    group.bench_function("Art/seek_index", |b| {
        let mut cursor = art.create_cursor(root);
        b.iter(|| {
            let mut total = 0usize;
            for i in (0..keys.len() as u64).step_by(97) {
                cursor.seek_index(&art, i);
                total += cursor.key_length();
            }
            black_box(total)
        });
    });

    group.finish();
}

fn bench_erase(c: &mut Criterion) {
    let mut group = c.benchmark_group("erase");
    let keys = generate_sequential_keys(10_000);

    group.bench_function("Art/erase_each", |b| {
        let probes = shuffled(keys.clone());
        b.iter(|| {
            let (mut art, root) = filled_art(&keys);
            let mut cursor = art.create_cursor(root);
            for key in &probes {
                if cursor.find_exact(&art, key) {
                    cursor.erase(&mut art);
                }
            }
            black_box(art.key_count(root))
        });
    });

    group.bench_function("Art/erase_range_half", |b| {
        b.iter(|| {
            let (mut art, root) = filled_art(&keys);
            let mut left = art.create_cursor(root);
            let mut right = art.create_cursor(root);
            left.seek_index(&art, 2_500);
            right.seek_index(&art, 7_499);
            black_box(left.erase_to(&mut art, &mut right))
        });
    });

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");
    let keys = generate_url_like_keys(10_000);

    group.bench_function("Art/clone_root_then_write", |b| {
        let (mut art, root) = filled_art(&keys);
        let mut cursor = art.create_cursor(root);
        let mut i = 0usize;
        b.iter(|| {
            let snapshot = art.clone_root(root);
            cursor.upsert(&mut art, &keys[i % keys.len()], b"changed");
            art.dereference_root(snapshot);
            i += 1;
        });
    });

    group.bench_function("KeyValueDb/write_commit", |b| {
        let db = KeyValueDb::new();
        let mut i = 0usize;
        b.iter(|| {
            let mut tr = db.start_transaction();
            for key in keys.iter().skip(i % 100).step_by(100) {
                tr.create_or_update_key_value(key, b"v").expect("single writer");
            }
            tr.commit();
            i += 1;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_insert,
    bench_lookup,
    bench_iterate,
    bench_erase,
    bench_snapshot
);
criterion_main!(benches);
