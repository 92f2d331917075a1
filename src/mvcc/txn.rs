//! A single transaction: a snapshot seq plus a local write buffer, merged
//! over the engine's MVCC view on read and flushed atomically on commit.

use std::{collections::BTreeMap, ops::Bound, sync::Arc};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{
    error::Result,
    iterators::{two_merge_iterator::TwoMergeIterator, StorageIterator},
    lsm_iterator::BoundedUserIterator,
    lsm_storage::LsmStorageInner,
};

/// A simple owned-`Vec` cursor over a transaction's local write set. Unlike
/// the memtable/SSTable iterators, a txn's write set is a private,
/// single-threaded snapshot taken at `new_iterator` time, so there is no
/// need for `crossbeam-skiplist`'s lock-free cursor or the self-referential
/// plumbing `MemTableIterator` needs to hold one open across an `Arc`.
pub struct LocalIterator {
    items: Vec<(Vec<u8>, Bytes)>,
    idx: usize,
}

impl LocalIterator {
    fn new(items: Vec<(Vec<u8>, Bytes)>) -> Self {
        Self { items, idx: 0 }
    }
}

impl StorageIterator for LocalIterator {
    type KeyType<'a> = &'a [u8];

    fn key(&self) -> &[u8] {
        &self.items[self.idx].0
    }

    fn value(&self) -> &[u8] {
        &self.items[self.idx].1
    }

    fn is_valid(&self) -> bool {
        self.idx < self.items.len()
    }

    fn next(&mut self) -> Result<()> {
        self.idx += 1;
        Ok(())
    }
}

/// Merges a transaction's local writes over the engine's bounded view, with
/// the local copy winning on equal user keys.
/// The engine side (`BoundedUserIterator`) already drops its own
/// tombstones, but a *local* `remove` is stored the same way (an empty
/// value) so it can shadow an older engine entry in the merge; this wrapper
/// then skips any resulting position whose value is empty, so a locally
/// removed key never surfaces to the caller either.
type MergedTxnIterator = TwoMergeIterator<LocalIterator, BoundedUserIterator>;

pub struct TxnIterator {
    inner: MergedTxnIterator,
}

impl TxnIterator {
    fn create(inner: MergedTxnIterator) -> Result<Self> {
        let mut iter = Self { inner };
        iter.skip_tombstones()?;
        Ok(iter)
    }

    fn skip_tombstones(&mut self) -> Result<()> {
        while self.inner.is_valid() && self.inner.value().is_empty() {
            self.inner.next()?;
        }
        Ok(())
    }
}

impl StorageIterator for TxnIterator {
    type KeyType<'a> = &'a [u8];

    fn key(&self) -> &[u8] {
        self.inner.key()
    }

    fn value(&self) -> &[u8] {
        self.inner.value()
    }

    fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    fn next(&mut self) -> Result<()> {
        self.inner.next()?;
        self.skip_tombstones()
    }

    fn number_of_iterators(&self) -> usize {
        self.inner.number_of_iterators()
    }
}

/// A snapshot-isolated transaction. Reads are bounded by
/// `read_ts`, the seq captured at `begin_transaction()`; writes accumulate
/// in `local_writes` and are invisible to other readers until `commit`.
pub struct Transaction {
    inner: Arc<LsmStorageInner>,
    read_ts: u64,
    local_writes: Mutex<BTreeMap<Vec<u8>, Bytes>>,
}

impl Transaction {
    pub(crate) fn new(inner: Arc<LsmStorageInner>, read_ts: u64) -> Self {
        Self {
            inner,
            read_ts,
            local_writes: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn put(&self, key: &[u8], value: &[u8]) {
        self.local_writes
            .lock()
            .insert(key.to_vec(), Bytes::copy_from_slice(value));
    }

    pub fn remove(&self, key: &[u8]) {
        self.local_writes.lock().insert(key.to_vec(), Bytes::new());
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        if let Some(v) = self.local_writes.lock().get(key) {
            return Ok(if v.is_empty() { None } else { Some(v.clone()) });
        }
        self.inner.get_at(key, self.read_ts)
    }

    pub fn new_iterator(&self, lower: Bound<Vec<u8>>, upper: Bound<Vec<u8>>) -> Result<TxnIterator> {
        let local_items: Vec<(Vec<u8>, Bytes)> = self
            .local_writes
            .lock()
            .range((lower.clone(), upper.clone()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let local = LocalIterator::new(local_items);
        let user_seq = self.read_ts;
        let engine_user_iter = self.inner.build_bounded_iter(lower, upper, user_seq)?;
        TxnIterator::create(TwoMergeIterator::create(local, engine_user_iter)?)
    }

    /// Acquires a fresh seq and applies every local write to the engine
    /// under it, atomically with respect to other writers, by taking the
    /// engine lock once for the whole batch.
    pub fn commit(&self) -> Result<()> {
        let writes = std::mem::take(&mut *self.local_writes.lock());
        if writes.is_empty() {
            return Ok(());
        }
        self.inner.commit_writes(writes)
    }

    /// Drops the local write buffer without touching the engine.
    pub fn rollback(&self) {
        self.local_writes.lock().clear();
    }
}
