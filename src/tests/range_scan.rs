//! A forward scan over many keys returns every key exactly once in
//! ascending lexicographic order.

use tempfile::tempdir;

use crate::{ObLsm, ObLsmOptions, ObLsmReadOptions};

#[test]
fn scan_yields_all_keys_in_lexicographic_order() {
    let dir = tempdir().unwrap();
    let db = ObLsm::open(dir.path(), ObLsmOptions::default()).unwrap();

    const N: usize = 10_000;
    for i in 0..N {
        let key = format!("key{i}");
        let value = format!("value{i}");
        db.put(key.as_bytes(), value.as_bytes()).unwrap();
    }

    let mut iter = db.new_iterator(ObLsmReadOptions::default()).unwrap();
    let mut seen = Vec::with_capacity(N);
    while iter.valid() {
        seen.push((
            String::from_utf8(iter.key().to_vec()).unwrap(),
            String::from_utf8(iter.value().to_vec()).unwrap(),
        ));
        iter.next().unwrap();
    }

    assert_eq!(seen.len(), N);
    let mut expected: Vec<String> = (0..N).map(|i| format!("key{i}")).collect();
    expected.sort();
    let got: Vec<&String> = seen.iter().map(|(k, _)| k).collect();
    assert_eq!(got, expected.iter().collect::<Vec<_>>());
    // "key10" sorts before "key2" lexicographically.
    let pos10 = expected.iter().position(|k| k == "key10").unwrap();
    let pos2 = expected.iter().position(|k| k == "key2").unwrap();
    assert!(pos10 < pos2);
    for (k, v) in &seen {
        assert_eq!(v, &k.replacen("key", "value", 1));
    }
}

#[test]
fn bounded_scan_respects_lower_and_upper() {
    let dir = tempdir().unwrap();
    let db = ObLsm::open(dir.path(), ObLsmOptions::default()).unwrap();
    for key in ["a", "b", "c", "d", "e"] {
        db.put(key.as_bytes(), key.as_bytes()).unwrap();
    }

    let mut iter = db
        .scan(
            std::ops::Bound::Included(b"b".to_vec()),
            std::ops::Bound::Excluded(b"d".to_vec()),
            ObLsmReadOptions::default(),
        )
        .unwrap();
    let mut seen = Vec::new();
    while iter.valid() {
        seen.push(iter.key().to_vec());
        iter.next().unwrap();
    }
    assert_eq!(seen, vec![b"b".to_vec(), b"c".to_vec()]);
}
