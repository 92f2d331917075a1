//! The merging iterator over memtable/SSTable sources and the MVCC-resolving
//! user iterator that sits on top of it.

use crate::error::Result;
use crate::iterators::{merge_iterator::MergeIterator, StorageIterator};
use crate::key::KeySlice;
use crate::mem_table::MemTableIterator;
use crate::table::iterator::SsTableIterator;

/// A child of the engine's merging iterator: either a memtable or an
/// SSTable, both ordered by internal key. Construction order in
/// `LsmStorageInner` determines tie-breaking: active memtable, then
/// immutable memtables newest first, then SSTables level by level, L0
/// newest first.
pub enum EngineChildIterator {
    MemTable(MemTableIterator),
    SsTable(SsTableIterator),
}

impl StorageIterator for EngineChildIterator {
    type KeyType<'a> = KeySlice<'a>;

    fn key(&self) -> KeySlice {
        match self {
            EngineChildIterator::MemTable(i) => i.key(),
            EngineChildIterator::SsTable(i) => i.key(),
        }
    }

    fn value(&self) -> &[u8] {
        match self {
            EngineChildIterator::MemTable(i) => i.value(),
            EngineChildIterator::SsTable(i) => i.value(),
        }
    }

    fn is_valid(&self) -> bool {
        match self {
            EngineChildIterator::MemTable(i) => i.is_valid(),
            EngineChildIterator::SsTable(i) => i.is_valid(),
        }
    }

    fn next(&mut self) -> Result<()> {
        match self {
            EngineChildIterator::MemTable(i) => i.next(),
            EngineChildIterator::SsTable(i) => i.next(),
        }
    }
}

pub type MergedIterator = MergeIterator<EngineChildIterator>;

/// Resolves MVCC visibility over a merged view of memtable, immutable
/// memtable and SSTable sources: entries newer than the
/// snapshot are skipped, a deletion marks its user key as shadowed for the
/// rest of the scan, and only the newest visible version of each user key
/// is ever returned.
pub struct UserIterator {
    inner: MergedIterator,
    snapshot_seq: u64,
    /// The last user key this iterator resolved (returned, or found
    /// deleted); further entries for the same key are skipped.
    resolved: Option<Vec<u8>>,
}

impl UserIterator {
    pub fn create(inner: MergedIterator, snapshot_seq: u64) -> Result<Self> {
        let mut iter = Self {
            inner,
            snapshot_seq,
            resolved: None,
        };
        iter.skip_to_visible()?;
        Ok(iter)
    }

    fn skip_to_visible(&mut self) -> Result<()> {
        loop {
            if !self.inner.is_valid() {
                return Ok(());
            }
            let key = self.inner.key();
            if key.ts() > self.snapshot_seq {
                self.inner.next()?;
                continue;
            }
            if self.resolved.as_deref() == Some(key.key_ref()) {
                self.inner.next()?;
                continue;
            }
            if self.inner.value().is_empty() {
                self.resolved = Some(key.key_ref().to_vec());
                self.inner.next()?;
                continue;
            }
            return Ok(());
        }
    }
}

impl StorageIterator for UserIterator {
    type KeyType<'a> = &'a [u8];

    fn key(&self) -> &[u8] {
        self.inner.key().key_ref()
    }

    fn value(&self) -> &[u8] {
        self.inner.value()
    }

    fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    fn next(&mut self) -> Result<()> {
        self.resolved = Some(self.inner.key().key_ref().to_vec());
        self.inner.next()?;
        self.skip_to_visible()
    }

    fn number_of_iterators(&self) -> usize {
        self.inner.number_of_iterators()
    }
}

/// Clamps a [`UserIterator`] to an upper bound, exposing the public
/// iterator API (`valid`, `key`, `value`, `next`) over a bounded range.
pub struct BoundedUserIterator {
    inner: UserIterator,
    upper: std::ops::Bound<Vec<u8>>,
    valid: bool,
}

impl BoundedUserIterator {
    pub fn new(inner: UserIterator, upper: std::ops::Bound<Vec<u8>>) -> Self {
        let valid = Self::within_bound(&inner, &upper);
        Self { inner, upper, valid }
    }

    fn within_bound(inner: &UserIterator, upper: &std::ops::Bound<Vec<u8>>) -> bool {
        if !inner.is_valid() {
            return false;
        }
        match upper {
            std::ops::Bound::Unbounded => true,
            std::ops::Bound::Included(k) => inner.key() <= k.as_slice(),
            std::ops::Bound::Excluded(k) => inner.key() < k.as_slice(),
        }
    }
}

impl StorageIterator for BoundedUserIterator {
    type KeyType<'a> = &'a [u8];

    fn key(&self) -> &[u8] {
        self.inner.key()
    }

    fn value(&self) -> &[u8] {
        self.inner.value()
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    fn next(&mut self) -> Result<()> {
        self.inner.next()?;
        self.valid = Self::within_bound(&self.inner, &self.upper);
        Ok(())
    }
}
