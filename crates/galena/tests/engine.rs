//! End-to-end tests driving the public engine API only.

use std::collections::BTreeMap;
use std::path::Path;

use bytes::Bytes;
use galena::{Database, Error, IndexKind, IteratorOptions, Options, WriteBatchOptions};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use test_case::test_case;

fn options(dir: &Path) -> Options {
    Options {
        dir_path: dir.to_path_buf(),
        max_file_size: 8 * 1024,
        merge_ratio: 0.0,
        ..Options::default()
    }
}

fn key(i: usize) -> Bytes {
    Bytes::from(format!("engine-key-{i:05}"))
}

fn value(i: usize) -> Bytes {
    Bytes::from(format!("engine-value-{i:05}-{}", "x".repeat(i % 40)))
}

/// Replays a random put/delete workload against a `BTreeMap` model and
/// checks the engine agrees before and after a reopen.
#[test]
fn random_workload_matches_a_model() {
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path());
    let db = Database::open(opts.clone()).unwrap();

    let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(0x6a1e_9a01);

    for _ in 0..2_000 {
        let k = format!("model-key-{:03}", rng.gen_range(0..150)).into_bytes();
        if rng.gen_bool(0.25) {
            model.remove(&k);
            db.delete(Bytes::from(k)).unwrap();
        } else {
            let fill = rng.gen_range(0u8..=255);
            let v = vec![fill; rng.gen_range(1..64)];
            model.insert(k.clone(), v.clone());
            db.put(Bytes::from(k), Bytes::from(v)).unwrap();
        }
    }

    let check = |db: &Database| {
        let keys = db.list_keys();
        let expected: Vec<Bytes> = model.keys().map(|k| Bytes::copy_from_slice(k)).collect();
        assert_eq!(keys, expected);
        for (k, v) in &model {
            assert_eq!(db.get(Bytes::copy_from_slice(k)).unwrap(), v.as_slice());
        }
    };

    check(&db);
    db.close().unwrap();
    drop(db);

    let db = Database::open(opts).unwrap();
    check(&db);
    db.close().unwrap();
}

#[test_case(IndexKind::BTree, false; "btree")]
#[test_case(IndexKind::BTree, true; "btree mmap")]
#[test_case(IndexKind::Art, false; "art")]
#[test_case(IndexKind::Art, true; "art mmap")]
#[test_case(IndexKind::BPlusTree, false; "bplustree")]
fn multi_segment_state_survives_reopen(kind: IndexKind, mmap: bool) {
    let dir = tempfile::tempdir().unwrap();
    let mut opts = options(dir.path());
    opts.index_kind = kind;

    let db = Database::open(opts.clone()).unwrap();
    for i in 0..300 {
        db.put(key(i), value(i)).unwrap();
    }
    for i in 0..100 {
        db.put(key(i), value(i + 10_000)).unwrap();
    }
    for i in 250..300 {
        db.delete(key(i)).unwrap();
    }
    db.close().unwrap();
    drop(db);

    opts.mmap_at_startup = mmap;
    let db = Database::open(opts).unwrap();
    let stat = db.stat().unwrap();
    assert_eq!(stat.key_count, 250);
    assert!(stat.file_count > 1, "workload should span segments");
    for i in 0..100 {
        assert_eq!(db.get(key(i)).unwrap(), value(i + 10_000));
    }
    for i in 100..250 {
        assert_eq!(db.get(key(i)).unwrap(), value(i));
    }
    for i in 250..300 {
        assert!(matches!(db.get(key(i)), Err(Error::KeyNotFound)));
    }
    db.close().unwrap();
}

#[test]
fn batches_interleave_with_direct_writes() {
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path());
    let db = Database::open(opts.clone()).unwrap();

    db.put(Bytes::from("direct-1"), Bytes::from("a")).unwrap();
    {
        let batch = db.new_write_batch(WriteBatchOptions::default()).unwrap();
        batch.put(Bytes::from("batched-1"), Bytes::from("b")).unwrap();
        batch.put(Bytes::from("batched-2"), Bytes::from("c")).unwrap();
        db.put(Bytes::from("direct-2"), Bytes::from("d")).unwrap();
        batch.commit().unwrap();
    }
    db.put(Bytes::from("direct-3"), Bytes::from("e")).unwrap();
    db.close().unwrap();
    drop(db);

    let db = Database::open(opts).unwrap();
    for (k, v) in [
        ("direct-1", "a"),
        ("batched-1", "b"),
        ("batched-2", "c"),
        ("direct-2", "d"),
        ("direct-3", "e"),
    ] {
        assert_eq!(db.get(Bytes::from(k)).unwrap(), v);
    }
    db.close().unwrap();
}

#[test]
fn repeated_merge_cycles_keep_the_data_set() {
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path());

    let mut expected: BTreeMap<usize, usize> = BTreeMap::new();
    let mut db = Database::open(opts.clone()).unwrap();

    for round in 0..3 {
        for i in 0..120 {
            let generation = round * 1_000 + i;
            db.put(key(i), value(generation)).unwrap();
            expected.insert(i, generation);
        }
        for i in (0..120).step_by(7) {
            db.delete(key(i)).unwrap();
            expected.remove(&i);
        }
        db.merge().unwrap();
        db.close().unwrap();
        drop(db);

        db = Database::open(opts.clone()).unwrap();
        assert_eq!(db.stat().unwrap().key_count, expected.len());
        for (&i, &generation) in &expected {
            assert_eq!(db.get(key(i)).unwrap(), value(generation));
        }
    }
    db.close().unwrap();
}

#[test]
fn iterator_prefix_and_reverse_compose_with_seek() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(options(dir.path())).unwrap();
    for group in ["red", "green", "blue"] {
        for i in 0..5 {
            db.put(
                Bytes::from(format!("{group}:{i}")),
                Bytes::from(format!("{group}-{i}")),
            )
            .unwrap();
        }
    }

    let mut iter = db.iter(IteratorOptions {
        prefix: b"green:".to_vec(),
        reverse: true,
    });
    let mut seen = Vec::new();
    while let Some(entry) = iter.next() {
        seen.push(entry.unwrap().0);
    }
    assert_eq!(seen, vec![
        "green:4", "green:3", "green:2", "green:1", "green:0"
    ]);

    iter.rewind();
    iter.seek(b"green:2");
    assert_eq!(iter.next().unwrap().unwrap().0, "green:2");

    db.close().unwrap();
}

#[test]
fn fold_visits_pairs_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(options(dir.path())).unwrap();
    for i in 0..20 {
        db.put(key(i), value(i)).unwrap();
    }

    let mut visited = Vec::new();
    db.fold(|k, v| {
        visited.push((k, v));
        true
    })
    .unwrap();

    assert_eq!(visited.len(), 20);
    assert!(visited.windows(2).all(|w| w[0].0 < w[1].0));
    assert_eq!(visited[0].1, value(0));
    db.close().unwrap();
}

#[test]
fn sync_writes_mode_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let mut opts = options(dir.path());
    opts.sync_writes = true;
    let db = Database::open(opts.clone()).unwrap();
    for i in 0..25 {
        db.put(key(i), value(i)).unwrap();
    }
    db.close().unwrap();
    drop(db);

    let db = Database::open(opts).unwrap();
    for i in 0..25 {
        assert_eq!(db.get(key(i)).unwrap(), value(i));
    }
    db.close().unwrap();
}
