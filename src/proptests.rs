use crate::allocator::NodeAllocator;
use crate::art::{Art, FindResult, RootId};

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::ops::Bound;

type Model = BTreeMap<Vec<u8>, Vec<u8>>;

fn forward(art: &Art, root: RootId) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut c = art.create_cursor(root);
    let mut out = Vec::new();
    if c.find_first(art, b"") {
        loop {
            out.push((c.key(art), c.value(art).to_vec()));
            if !c.move_next(art) {
                break;
            }
        }
    }
    out
}

fn backward(art: &Art, root: RootId) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut c = art.create_cursor(root);
    let mut out = Vec::new();
    if c.find_last(art, b"") {
        loop {
            out.push((c.key(art), c.value(art).to_vec()));
            if !c.move_previous(art) {
                break;
            }
        }
    }
    out.reverse();
    out
}

fn validate(art: &Art, root: RootId, model: &Model) {
    assert_eq!(art.structure_check(root), model.len() as u64);
    let expected: Vec<(Vec<u8>, Vec<u8>)> =
        model.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    assert_eq!(forward(art, root), expected, "forward iteration");
    assert_eq!(backward(art, root), expected, "backward iteration");

    let mut c = art.create_cursor(root);
    for (i, key) in model.keys().enumerate() {
        assert!(c.seek_index(art, i as u64));
        assert_eq!(&c.key(art), key);
        assert!(c.find_exact(art, key));
        assert_eq!(c.calc_index(art), Some(i as u64));
    }
    assert!(!c.seek_index(art, model.len() as u64));
}

#[derive(Clone, Debug)]
enum Op {
    Upsert(Vec<u8>, Vec<u8>),
    Erase(Vec<u8>),
    Find(Vec<u8>),
    EraseRange(usize, usize),
    WriteValueAt(usize, Vec<u8>),
    Snapshot,
    DropSnapshot(usize),
    Rebuild,
}

fn key_strategy() -> impl Strategy<Value = Vec<u8>> + Clone {
    // A tiny alphabet makes shared prefixes and prefix-of-another keys common.
    let dense = prop::collection::vec(prop::sample::select(vec![0u8, 1, b'a', b'b', 0xff]), 0..=6);
    let sparse = prop::collection::vec(any::<u8>(), 0..=24);
    prop_oneof![3 => dense, 1 => sparse]
}

fn value_strategy() -> impl Strategy<Value = Vec<u8>> + Clone {
    // Straddles the 7-byte inline limit.
    prop::collection::vec(any::<u8>(), 0..=12)
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    let key = key_strategy();
    let value = value_strategy();
    let op = prop_oneof![
        50 => (key.clone(), value.clone()).prop_map(|(k, v)| Op::Upsert(k, v)),
        15 => key.clone().prop_map(Op::Erase),
        15 => key.clone().prop_map(Op::Find),
        5 => (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Op::EraseRange(a, b)),
        8 => (any::<usize>(), value).prop_map(|(i, v)| Op::WriteValueAt(i, v)),
        3 => Just(Op::Snapshot),
        2 => any::<usize>().prop_map(Op::DropSnapshot),
        1 => Just(Op::Rebuild),
    ];
    prop::collection::vec(op, 0..=400)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 20_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence_with_snapshots(ops in ops_strategy()) {
        let mut art = Art::new();
        let root = art.create_empty_root();
        let mut c = art.create_cursor(root);
        let mut m: Model = BTreeMap::new();
        let mut snapshots: Vec<(RootId, Model)> = Vec::new();

        for op in ops {
            match op {
                Op::Upsert(key, value) => {
                    let created = c.upsert(&mut art, &key, &value);
                    prop_assert_eq!(created, m.insert(key.clone(), value.clone()).is_none());
                    prop_assert_eq!(c.key(&art), key);
                    prop_assert_eq!(c.value(&art), &value[..]);
                }
                Op::Erase(key) => {
                    let found = c.find_exact(&art, &key);
                    prop_assert_eq!(found, m.contains_key(&key));
                    if found {
                        c.erase(&mut art);
                        m.remove(&key);
                    }
                }
                Op::Find(key) => {
                    let before = m
                        .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(&key[..])))
                        .next_back();
                    let after = m
                        .range::<[u8], _>((Bound::Excluded(&key[..]), Bound::Unbounded))
                        .next();
                    match c.find(&art, &key) {
                        FindResult::Exact => {
                            prop_assert!(m.contains_key(&key));
                            prop_assert_eq!(c.value(&art), &m[&key][..]);
                        }
                        FindResult::Previous => {
                            prop_assert!(!m.contains_key(&key));
                            prop_assert_eq!(Some(c.key(&art)), before.map(|(k, _)| k.clone()));
                        }
                        FindResult::Next => {
                            prop_assert!(!m.contains_key(&key));
                            prop_assert_eq!(Some(c.key(&art)), after.map(|(k, _)| k.clone()));
                        }
                        FindResult::NotFound => {
                            prop_assert!(m.is_empty());
                            prop_assert!(!c.is_valid());
                        }
                    }
                }
                Op::EraseRange(a, b) => {
                    if m.is_empty() {
                        continue;
                    }
                    let (a, b) = (a % m.len(), b % m.len());
                    let (lo, hi) = (a.min(b), a.max(b));
                    let mut left = art.create_cursor(root);
                    let mut right = art.create_cursor(root);
                    prop_assert!(left.seek_index(&art, a as u64));
                    prop_assert!(right.seek_index(&art, b as u64));
                    let erased = left.erase_to(&mut art, &mut right);
                    prop_assert_eq!(erased, (hi - lo + 1) as u64);
                    let doomed: Vec<Vec<u8>> =
                        m.keys().skip(lo).take(hi - lo + 1).cloned().collect();
                    for key in doomed {
                        m.remove(&key);
                    }
                }
                Op::WriteValueAt(i, value) => {
                    if m.is_empty() {
                        continue;
                    }
                    let i = i % m.len();
                    prop_assert!(c.seek_index(&art, i as u64));
                    c.write_value(&mut art, &value);
                    prop_assert_eq!(c.value(&art), &value[..]);
                    let key = c.key(&art);
                    m.insert(key, value);
                }
                Op::Snapshot => {
                    if snapshots.len() < 4 {
                        snapshots.push((art.clone_root(root), m.clone()));
                    }
                }
                Op::DropSnapshot(i) => {
                    if !snapshots.is_empty() {
                        let (snapshot, _) = snapshots.swap_remove(i % snapshots.len());
                        art.dereference_root(snapshot);
                    }
                }
                Op::Rebuild => {
                    let entries: Vec<(Vec<u8>, Vec<u8>)> =
                        m.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                    c.build_tree(&mut art, entries);
                }
            }

            prop_assert_eq!(art.key_count(root), m.len() as u64);
        }

        validate(&art, root, &m);
        for (snapshot, model) in &snapshots {
            validate(&art, *snapshot, model);
        }

        for (snapshot, _) in snapshots {
            art.dereference_root(snapshot);
        }
        art.dereference_root(root);
        prop_assert_eq!(art.allocator().live_allocations(), 0);
        prop_assert_eq!(art.allocator().allocated_bytes(), 0);
    }

    #[test]
    fn prop_prefix_scans_match_range(
        keys in prop::collection::btree_set(key_strategy(), 0..=200),
        prefix in prop::collection::vec(
            prop::sample::select(vec![0u8, 1, b'a', b'b', 0xff]),
            0..=3,
        ),
    ) {
        let mut art = Art::new();
        let root = art.create_empty_root();
        let mut c = art.create_cursor(root);
        for key in &keys {
            c.upsert(&mut art, key, key);
        }
        let expected: Vec<&Vec<u8>> = keys.iter().filter(|k| k.starts_with(&prefix)).collect();

        let found_first = c.find_first(&art, &prefix);
        prop_assert_eq!(found_first, !expected.is_empty());
        if let (true, Some(first)) = (found_first, expected.first()) {
            prop_assert_eq!(&c.key(&art), *first);
            prop_assert!(c.key_has_prefix(&art, &prefix));
        }
        let found_last = c.find_last(&art, &prefix);
        prop_assert_eq!(found_last, !expected.is_empty());
        if let (true, Some(last)) = (found_last, expected.last()) {
            prop_assert_eq!(&c.key(&art), *last);
        }

        for key in &keys {
            if let Some(rest) = key.strip_prefix(&prefix[..]) {
                prop_assert_eq!(c.find_with_prefix(&art, &prefix, rest), FindResult::Exact);
                prop_assert_eq!(&c.key(&art), key);
            }
        }
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

fn small_key_set() -> Vec<Vec<u8>> {
    vec![
        Vec::new(),
        b"a".to_vec(),
        b"b".to_vec(),
        b"aa".to_vec(),
        b"ab".to_vec(),
        b"aab".to_vec(),
        b"ba".to_vec(),
    ]
}

#[test]
fn exhaustive_insert_order_small_set() {
    let keys = small_key_set();
    for_each_permutation(&keys, |perm| {
        let mut art = Art::new();
        let root = art.create_empty_root();
        let mut c = art.create_cursor(root);
        let mut m: Model = BTreeMap::new();
        for (i, key) in perm.into_iter().enumerate() {
            let value = vec![i as u8; i * 2];
            assert_eq!(c.upsert(&mut art, &key, &value), m.insert(key, value).is_none());
        }
        validate(&art, root, &m);
    });
}

#[test]
fn exhaustive_erase_order_small_set() {
    let keys = small_key_set();
    let mut art = Art::new();
    let base = art.create_empty_root();
    let mut c = art.create_cursor(base);
    let mut base_map: Model = BTreeMap::new();
    for (i, key) in keys.iter().enumerate() {
        let value = vec![i as u8; 3 + i];
        c.upsert(&mut art, key, &value);
        base_map.insert(key.clone(), value);
    }

    for_each_permutation(&keys, |perm| {
        let root = art.clone_root(base);
        let mut c = art.create_cursor(root);
        let mut m = base_map.clone();
        for key in perm {
            assert!(c.find_exact(&art, &key));
            c.erase(&mut art);
            m.remove(&key);
            validate(&art, root, &m);
        }
        assert!(art.root(root).is_empty());
        art.dereference_root(root);
        validate(&art, base, &base_map);
    });
    art.dereference_root(base);
    assert_eq!(art.allocator().live_allocations(), 0);
}

#[test]
fn node_class_transitions_grow_and_shrink() {
    let mut art = Art::new();
    let root = art.create_empty_root();
    let mut c = art.create_cursor(root);
    let mut m: Model = BTreeMap::new();
    for b in 0..5u8 {
        c.upsert(&mut art, &[b'n', b], &[b]);
        m.insert(vec![b'n', b], vec![b]);
    }
    assert_eq!(art.memory_stats(root).node16_count, 1);
    for b in [0u8, 2, 4] {
        assert!(c.find_exact(&art, &[b'n', b]));
        c.erase(&mut art);
        m.remove(&vec![b'n', b]);
    }
    let stats = art.memory_stats(root);
    assert_eq!(stats.node16_count, 0);
    assert_eq!(stats.node4_count, 1);
    validate(&art, root, &m);
}
