//! Basic get-after-put and shadowing by a newer write, plus the matching
//! `remove` (tombstone) behavior.

use std::ops::Bound;

use tempfile::tempdir;

use crate::{ObLsm, ObLsmOptions, ObLsmReadOptions};

#[test]
fn get_after_put() {
    let dir = tempdir().unwrap();
    let db = ObLsm::open(dir.path(), ObLsmOptions::default()).unwrap();
    db.put(b"key1", b"value1").unwrap();
    assert_eq!(db.get(b"key1").unwrap().as_deref(), Some(&b"value1"[..]));
}

#[test]
fn newer_put_shadows_older() {
    let dir = tempdir().unwrap();
    let db = ObLsm::open(dir.path(), ObLsmOptions::default()).unwrap();
    db.put(b"k", b"v1").unwrap();
    db.put(b"k", b"v2").unwrap();
    assert_eq!(db.get(b"k").unwrap().as_deref(), Some(&b"v2"[..]));

    let mut iter = db.new_iterator(ObLsmReadOptions::default()).unwrap();
    let mut seen = Vec::new();
    while iter.valid() {
        seen.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next().unwrap();
    }
    assert_eq!(seen, vec![(b"k".to_vec(), b"v2".to_vec())]);
}

#[test]
fn remove_then_get_reports_not_found() {
    let dir = tempdir().unwrap();
    let db = ObLsm::open(dir.path(), ObLsmOptions::default()).unwrap();
    db.put(b"k", b"v1").unwrap();
    db.remove(b"k").unwrap();
    assert!(db.get(b"k").unwrap().is_none());

    db.put(b"k", b"v2").unwrap();
    assert_eq!(db.get(b"k").unwrap().as_deref(), Some(&b"v2"[..]));
}

#[test]
fn removed_key_is_absent_from_scan() {
    let dir = tempdir().unwrap();
    let db = ObLsm::open(dir.path(), ObLsmOptions::default()).unwrap();
    db.put(b"a", b"1").unwrap();
    db.put(b"b", b"2").unwrap();
    db.remove(b"a").unwrap();

    let mut iter = db.scan(Bound::Unbounded, Bound::Unbounded, ObLsmReadOptions::default()).unwrap();
    let mut seen = Vec::new();
    while iter.valid() {
        seen.push(iter.key().to_vec());
        iter.next().unwrap();
    }
    assert_eq!(seen, vec![b"b".to_vec()]);
}

#[test]
fn batch_put_applies_every_pair() {
    let dir = tempdir().unwrap();
    let db = ObLsm::open(dir.path(), ObLsmOptions::default()).unwrap();
    db.batch_put(&[(b"a".as_slice(), b"1".as_slice()), (b"b", b"2"), (b"c", b"3")])
        .unwrap();
    assert_eq!(db.get(b"a").unwrap().as_deref(), Some(&b"1"[..]));
    assert_eq!(db.get(b"b").unwrap().as_deref(), Some(&b"2"[..]));
    assert_eq!(db.get(b"c").unwrap().as_deref(), Some(&b"3"[..]));
}

#[test]
fn empty_key_is_rejected() {
    let dir = tempdir().unwrap();
    let db = ObLsm::open(dir.path(), ObLsmOptions::default()).unwrap();
    assert!(db.put(b"", b"v").is_err());
}
