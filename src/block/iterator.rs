use bytes::Buf;

use crate::key::{KeySlice, KeyVec};
use std::sync::Arc;

use super::Block;

pub struct BlockIterator {
    // reference to the block
    block: Arc<Block>,
    // the current key at the iterator position
    key: KeyVec,
    // the first key in the block
    first_key: KeyVec,
    // the value range from the block
    value_range: (usize, usize),
    // the current index at the iterator position
    idx: usize,
}

impl BlockIterator {
    /// constructor: create a new BlockIterator.
    fn new(block: Arc<Block>) -> Self {
        let first_key = KeyVec::decode(&block.get_first_key());
        Self {
            first_key,
            key: KeyVec::new(),
            block,
            value_range: (0, 0),
            idx: 0,
        }
    }

    pub fn create_and_seek_to_first(block: Arc<Block>) -> Self {
        let mut iter = Self::new(block);
        iter.seek_to_first();
        iter
    }

    pub fn create_and_seek_to_key(block: Arc<Block>, key: KeySlice) -> Self {
        let mut iter = Self::new(block);
        iter.seek_to_key(key);
        iter
    }

    pub fn key(&self) -> KeySlice {
        self.key.as_key_slice()
    }

    pub fn value(&self) -> &[u8] {
        &self.block.data[self.value_range.0..self.value_range.1]
    }

    pub fn is_valid(&self) -> bool {
        !self.key.is_empty()
    }

    /// find the first key.
    pub fn seek_to_first(&mut self) {
        self.seek_to(0);
    }

    /// seek to a specific index.
    fn seek_to(&mut self, idx: usize) {
        if idx >= self.block.offsets.len() {
            self.key.clear();
            self.value_range = (0, 0);
            return;
        }
        let offset = self.block.offsets[idx] as usize;
        self.seek_to_offset(offset);
        self.idx = idx;
    }

    /// move to the specified offset, reconstructing the full key from the
    /// block's first key and the entry's prefix-compressed suffix.
    fn seek_to_offset(&mut self, offset: usize) {
        let mut entry = &self.block.data[offset..];
        let overlap_len = entry.get_u16() as usize;
        let rest_len = entry.get_u16() as usize;
        let rest_key = &entry[..rest_len];

        let first_key_raw = self.first_key.encode();
        let mut raw_key = Vec::with_capacity(overlap_len + rest_len);
        raw_key.extend_from_slice(&first_key_raw[..overlap_len]);
        raw_key.extend_from_slice(rest_key);
        self.key = KeyVec::decode(&raw_key);

        entry.advance(rest_len);
        let value_len = entry.get_u16() as usize;
        let value_begin = offset + 2 + 2 + rest_len + 2;
        let value_end = value_begin + value_len;
        self.value_range = (value_begin, value_end);
    }

    /// find the key, or the first key greater than it.
    pub fn seek_to_key(&mut self, key: KeySlice) {
        let mut lo = 0;
        let mut hi = self.block.offsets.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            self.seek_to(mid);
            assert!(self.is_valid());
            match self.key().cmp(&key) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Equal => return,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        self.seek_to(lo);
    }

    /// move to next entry.
    pub fn next(&mut self) {
        self.idx += 1;
        self.seek_to(self.idx);
    }
}
