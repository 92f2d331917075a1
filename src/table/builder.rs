use crate::{
    block::builder::BlockBuilder,
    bloom::Bloom,
    cache::BlockCache,
    error::{Error, Result},
    key::{KeySlice, KeyVec},
};
use bytes::BufMut;

use super::{BlockMeta, FileObject, SsTable};
use std::{path::Path, sync::Arc};

/// Builds an SSTable from key-value pairs presented in ascending internal-key
/// order.
pub struct SsTableBuilder {
    builder: BlockBuilder,
    block_size: usize,
    first_key: KeyVec,
    last_key: KeyVec,
    data: Vec<u8>,
    meta: Vec<BlockMeta>,
    bloom: Bloom,
}

impl SsTableBuilder {
    pub fn new(block_size: usize) -> Self {
        Self {
            builder: BlockBuilder::new(block_size),
            block_size,
            first_key: KeyVec::new(),
            last_key: KeyVec::new(),
            data: Vec::new(),
            meta: Vec::new(),
            bloom: Bloom::default(),
        }
    }

    pub fn add(&mut self, key: KeySlice, value: &[u8]) -> Result<()> {
        if self.builder.add(key, value) {
            if self.first_key.is_empty() {
                self.first_key.set_from_slice(key);
            }
            self.last_key.set_from_slice(key);
            self.bloom.insert(key.key_ref());
            return Ok(());
        }

        if self.builder.is_empty() {
            return Err(Error::Unimplemented("oversized key-value pair"));
        }

        self.finish_block();

        if !self.builder.add(key, value) {
            return Err(Error::Unimplemented("oversized key-value pair"));
        }
        self.first_key.set_from_slice(key);
        self.last_key.set_from_slice(key);
        self.bloom.insert(key.key_ref());
        Ok(())
    }

    pub fn estimate_size(&self) -> usize {
        self.data.len()
    }

    fn finish_block(&mut self) {
        let builder = std::mem::replace(&mut self.builder, BlockBuilder::new(self.block_size));
        let encoded_block = builder.build().encode();
        self.meta.push(BlockMeta {
            offset: self.data.len(),
            first_key: std::mem::take(&mut self.first_key),
            last_key: std::mem::take(&mut self.last_key),
        });
        let checksum = crc32fast::hash(&encoded_block);
        self.data.extend(encoded_block);
        self.data.put_u32(checksum);
    }

    pub fn build(
        mut self,
        id: usize,
        block_cache: Option<Arc<BlockCache>>,
        path: impl AsRef<Path>,
    ) -> Result<SsTable> {
        if !self.builder.is_empty() {
            self.finish_block();
        }
        let mut buf = self.data;
        let meta_offset = buf.len();
        BlockMeta::encode_block_meta(&self.meta, &mut buf);
        buf.put_u32(meta_offset as u32);
        let bloom_offset = buf.len();
        self.bloom.encode(&mut buf);
        buf.put_u32(bloom_offset as u32);
        let file = FileObject::create(path.as_ref(), buf)?;
        SsTable::open(id, block_cache, file)
    }

    #[cfg(test)]
    pub(crate) fn build_for_test(self, path: impl AsRef<Path>) -> Result<SsTable> {
        self.build(0, None, path)
    }
}
