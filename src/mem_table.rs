// a basic memtable, based on crossbeam-skiplist.
use bytes::Bytes;
use crossbeam_skiplist::map::Entry;
use crossbeam_skiplist::SkipMap;
use ouroboros::self_referencing;
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use crate::error::Result;
use crate::iterators::StorageIterator;
use crate::key::{KeyBytes, KeySlice};
use crate::table::builder::SsTableBuilder;
use crate::wal::Wal;

/// Create a bound of `KeyBytes` from a bound of `KeySlice`.
pub(crate) fn map_key_bound(bound: Bound<KeySlice>) -> Bound<KeyBytes> {
    match bound {
        Bound::Included(x) => Bound::Included(KeyBytes::from_bytes_with_ts(
            Bytes::copy_from_slice(x.key_ref()),
            x.ts(),
        )),
        Bound::Excluded(x) => Bound::Excluded(KeyBytes::from_bytes_with_ts(
            Bytes::copy_from_slice(x.key_ref()),
            x.ts(),
        )),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// The in-memory write buffer for the LSM tree. Entries are inserted in
/// internal-key order (user key ascending, seq descending) and flushed into
/// an SSTable once `memtable_size` is reached.
pub struct MemTable {
    pub(crate) map: Arc<SkipMap<KeyBytes, Bytes>>,
    id: usize,
    approximate_size: Arc<AtomicUsize>,
    wal: Option<Wal>,
}

impl MemTable {
    pub fn create(id: usize) -> Self {
        Self {
            id,
            map: Arc::new(SkipMap::new()),
            approximate_size: Arc::new(AtomicUsize::new(0)),
            wal: None,
        }
    }

    pub fn create_with_wal(id: usize, path: impl AsRef<Path>, force_sync: bool) -> Result<Self> {
        Ok(Self {
            id,
            wal: Some(Wal::create(path, force_sync)?),
            map: Arc::new(SkipMap::new()),
            approximate_size: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Replays a WAL file into a fresh memtable, returning the maximum
    /// sequence number observed (used to resume the global seq counter
    /// during recovery).
    pub fn recover_from_wal(
        id: usize,
        path: impl AsRef<Path>,
        force_sync: bool,
    ) -> Result<(Self, u64)> {
        let map = Arc::new(SkipMap::new());
        let (wal, max_seq) = Wal::recover(path, force_sync, &map)?;
        Ok((
            Self {
                id,
                wal: Some(wal),
                map,
                approximate_size: Arc::new(AtomicUsize::new(0)),
            },
            max_seq,
        ))
    }

    pub fn get(&self, key: KeySlice) -> Option<Bytes> {
        let key_bytes =
            KeyBytes::from_bytes_with_ts(Bytes::copy_from_slice(key.key_ref()), key.ts());
        self.map.get(&key_bytes).map(|e| e.value().clone())
    }

    /// Seeks the newest version of `user_key` visible at `snapshot_seq`: the
    /// internal-key order (user key ascending, seq descending) means the
    /// first entry at or
    /// after `(user_key, snapshot_seq)` is that version, if its user key
    /// still matches.
    pub fn get_visible(&self, user_key: &[u8], snapshot_seq: u64) -> Option<Bytes> {
        let lookup = KeyBytes::from_bytes_with_ts(Bytes::copy_from_slice(user_key), snapshot_seq);
        let mut range = self.map.range(lookup..);
        let entry = range.next()?;
        if entry.key().key_ref() == user_key {
            Some(entry.value().clone())
        } else {
            None
        }
    }

    pub fn scan(&self, lower: Bound<KeySlice>, upper: Bound<KeySlice>) -> MemTableIterator {
        let (lower, upper) = (map_key_bound(lower), map_key_bound(upper));
        let mut iter = MemTableIteratorBuilder {
            map: self.map.clone(),
            iter_builder: |map| map.range((lower, upper)),
            item: (KeyBytes::new(), Bytes::new()),
        }
        .build();
        iter.next().unwrap();
        iter
    }

    pub fn put(&self, key: KeySlice, value: &[u8]) -> Result<()> {
        if let Some(ref wal) = self.wal {
            wal.put(key, value)?;
        }
        let estimated_size = key.raw_len() + value.len();
        self.map.insert(
            key.to_key_vec().into_key_bytes(),
            Bytes::copy_from_slice(value),
        );
        self.approximate_size
            .fetch_add(estimated_size, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    /// Drains every entry into `builder` in ascending internal-key order.
    pub fn flush(&self, builder: &mut SsTableBuilder) -> Result<()> {
        for entry in self.map.iter() {
            builder.add(entry.key().as_key_slice(), &entry.value()[..])?;
        }
        Ok(())
    }

    pub fn sync_wal(&self) -> Result<()> {
        if let Some(ref wal) = self.wal {
            wal.sync()?;
        }
        Ok(())
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn approximate_size(&self) -> usize {
        self.approximate_size
            .load(std::sync::atomic::Ordering::Relaxed)
    }
}

type SkipMapRangeIter<'a> = crossbeam_skiplist::map::Range<
    'a,
    KeyBytes,
    (Bound<KeyBytes>, Bound<KeyBytes>),
    KeyBytes,
    Bytes,
>;

#[self_referencing]
pub struct MemTableIterator {
    map: Arc<SkipMap<KeyBytes, Bytes>>,

    #[borrows(map)]
    #[not_covariant]
    iter: SkipMapRangeIter<'this>,
    item: (KeyBytes, Bytes),
}

impl MemTableIterator {
    fn entry_to_item(entry: Option<Entry<'_, KeyBytes, Bytes>>) -> (KeyBytes, Bytes) {
        entry
            .map(|x| (x.key().clone(), x.value().clone()))
            .unwrap_or_else(|| (KeyBytes::new(), Bytes::new()))
    }
}

impl StorageIterator for MemTableIterator {
    type KeyType<'a> = KeySlice<'a>;

    fn key(&self) -> KeySlice {
        self.borrow_item().0.as_key_slice()
    }

    fn value(&self) -> &[u8] {
        &self.borrow_item().1[..]
    }

    fn is_valid(&self) -> bool {
        !self.borrow_item().0.is_empty()
    }

    fn next(&mut self) -> Result<()> {
        let entry = self.with_iter_mut(|iter| MemTableIterator::entry_to_item(iter.next()));
        self.with_mut(|x| *x.item = entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeySlice;

    #[test]
    fn put_get_roundtrip() {
        let table = MemTable::create(0);
        table.put(KeySlice::from_slice(b"a", 1), b"1").unwrap();
        table.put(KeySlice::from_slice(b"b", 2), b"2").unwrap();
        assert_eq!(
            table.get(KeySlice::from_slice(b"a", 1)).unwrap(),
            Bytes::from_static(b"1")
        );
        assert!(table.get(KeySlice::from_slice(b"a", 0)).is_none());
    }

    #[test]
    fn scan_yields_ascending_order() {
        let table = MemTable::create(0);
        for (k, v) in [(b"c", b"3"), (b"a", b"1"), (b"b", b"2")] {
            table.put(KeySlice::from_slice(k, 1), v).unwrap();
        }
        let mut iter = table.scan(Bound::Unbounded, Bound::Unbounded);
        let mut seen = Vec::new();
        while iter.is_valid() {
            seen.push(iter.key().key_ref().to_vec());
            iter.next().unwrap();
        }
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }
}
