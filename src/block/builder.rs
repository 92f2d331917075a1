use bytes::BufMut;

use super::Block;
use super::SIZEOF_U16;
use crate::key::KeySlice;

/// Builds a block, prefix-compressing each key against the block's first key.
pub struct BlockBuilder {
    data: Vec<u8>,
    offsets: Vec<u16>,
    block_size: usize,
    first_key: Vec<u8>,
}

fn common_prefix(first_key: &[u8], key: &[u8]) -> usize {
    first_key
        .iter()
        .zip(key.iter())
        .take_while(|(a, b)| a == b)
        .count()
}

impl BlockBuilder {
    pub fn new(block_size: usize) -> Self {
        Self {
            data: Vec::new(),
            offsets: Vec::new(),
            block_size,
            first_key: Vec::new(),
        }
    }

    fn estimated_size(&self) -> usize {
        self.data.len() + self.offsets.len() * SIZEOF_U16 + SIZEOF_U16
    }

    /// Adds a key-value pair to the block. Returns `false` when this entry
    /// would overflow `block_size`. If the block already holds entries, the
    /// caller should finalize it and retry against a fresh one; if the block
    /// is empty, the entry alone exceeds `block_size` and cannot be stored in
    /// any block.
    #[must_use]
    pub fn add(&mut self, key: KeySlice, value: &[u8]) -> bool {
        assert!(!key.is_empty(), "key must not be empty");
        let raw_key = key.encode();
        let add_on = raw_key.len() + value.len() + SIZEOF_U16 * 3;
        if self.estimated_size() + add_on > self.block_size {
            return false;
        }

        self.offsets.push(self.data.len() as u16);

        let prefix = common_prefix(&self.first_key, &raw_key);
        self.data.put_u16(prefix as u16);
        self.data.put_u16((raw_key.len() - prefix) as u16);
        self.data.put(&raw_key[prefix..]);
        self.data.put_u16(value.len() as u16);
        self.data.put(value);

        if self.first_key.is_empty() {
            self.first_key = raw_key;
        }

        true
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn build(self) -> Block {
        assert!(!self.is_empty(), "block should not be empty");
        Block {
            data: self.data,
            offsets: self.offsets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_overflow_once_non_empty() {
        let mut builder = BlockBuilder::new(40);
        assert!(builder.add(KeySlice::from_slice(b"a", 1), b"v"));
        assert!(!builder.add(KeySlice::from_slice(b"b", 1), &[0u8; 100]));
    }
}
