//! A small randomized workload: writes (including some overwrites and
//! deletes) applied in shuffled order must still leave `get` and a full
//! scan agreeing with a plain in-memory model.

use std::collections::BTreeMap;

use rand::{seq::SliceRandom, Rng};
use tempfile::tempdir;

use crate::{ObLsm, ObLsmOptions, ObLsmReadOptions};

enum Op {
    Put(String, String),
    Remove(String),
}

#[test]
fn random_put_remove_matches_a_btreemap_model() {
    let mut rng = rand::thread_rng();
    let keys: Vec<String> = (0..200).map(|i| format!("k{i:04}")).collect();

    let mut ops = Vec::new();
    for _ in 0..2_000 {
        let key = keys.choose(&mut rng).unwrap().clone();
        if rng.gen_bool(0.2) {
            ops.push(Op::Remove(key));
        } else {
            let value: String = (0..8).map(|_| rng.gen_range(b'a'..=b'z') as char).collect();
            ops.push(Op::Put(key, value));
        }
    }
    ops.shuffle(&mut rng);

    let mut model: BTreeMap<String, String> = BTreeMap::new();
    let dir = tempdir().unwrap();
    let db = ObLsm::open(dir.path(), ObLsmOptions::default()).unwrap();
    for op in &ops {
        match op {
            Op::Put(k, v) => {
                db.put(k.as_bytes(), v.as_bytes()).unwrap();
                model.insert(k.clone(), v.clone());
            }
            Op::Remove(k) => {
                db.remove(k.as_bytes()).unwrap();
                model.remove(k);
            }
        }
    }

    for key in &keys {
        let got = db.get(key.as_bytes()).unwrap();
        let expected = model.get(key);
        match expected {
            Some(v) => assert_eq!(got.as_deref(), Some(v.as_bytes())),
            None => assert!(got.is_none()),
        }
    }

    let mut iter = db.new_iterator(ObLsmReadOptions::default()).unwrap();
    let mut scanned = BTreeMap::new();
    while iter.valid() {
        scanned.insert(
            String::from_utf8(iter.key().to_vec()).unwrap(),
            String::from_utf8(iter.value().to_vec()).unwrap(),
        );
        iter.next().unwrap();
    }
    assert_eq!(scanned, model);
}
