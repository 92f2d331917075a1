//! Several threads write disjoint keys concurrently; after joining and
//! quiescing, every write is visible, both immediately and after a
//! close/reopen cycle.

use std::sync::Arc;
use std::thread;

use tempfile::tempdir;

use crate::{ObLsm, ObLsmOptions, ObLsmReadOptions};

const THREADS: usize = 4;
const KEYS_PER_THREAD: usize = 25_000;

fn thread_key(thread_idx: usize, i: usize) -> String {
    format!("t{thread_idx}-key{i}")
}

#[test]
fn concurrent_disjoint_writers_are_all_visible() {
    let dir = tempdir().unwrap();
    let db = Arc::new(ObLsm::open(dir.path(), ObLsmOptions::default()).unwrap());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let db = db.clone();
            thread::spawn(move || {
                for i in 0..KEYS_PER_THREAD {
                    let key = thread_key(t, i);
                    db.put(key.as_bytes(), key.as_bytes()).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    db.force_flush().unwrap();

    let mut iter = db.new_iterator(ObLsmReadOptions::default()).unwrap();
    let mut count = 0;
    while iter.valid() {
        count += 1;
        iter.next().unwrap();
    }
    assert_eq!(count, THREADS * KEYS_PER_THREAD);

    for t in 0..THREADS {
        for i in 0..KEYS_PER_THREAD {
            let key = thread_key(t, i);
            assert_eq!(db.get(key.as_bytes()).unwrap().as_deref(), Some(key.as_bytes()));
        }
    }

    db.close().unwrap();
    drop(db);

    let db = ObLsm::open(dir.path(), ObLsmOptions::default()).unwrap();
    let mut iter = db.new_iterator(ObLsmReadOptions::default()).unwrap();
    let mut count = 0;
    while iter.valid() {
        count += 1;
        iter.next().unwrap();
    }
    assert_eq!(count, THREADS * KEYS_PER_THREAD);
}
