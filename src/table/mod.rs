//! An SSTable is an immutable, sorted, on-disk key-value file composed of
//! blocks and a block-meta index. File layout: `blocks | block_meta |
//! meta_offset(u32) | bloom | bloom_offset(u32)`.

pub mod builder;
pub mod iterator;

use crate::block::Block;
use crate::bloom::Bloom;
use crate::cache::BlockCache;
use crate::error::{Error, Result};
use crate::key::{KeySlice, KeyVec};
use bytes::{Buf, BufMut};
use std::{fs::File, path::Path, sync::Arc};

#[derive(Clone, Debug)]
pub struct BlockMeta {
    pub offset: usize,
    pub first_key: KeyVec,
    pub last_key: KeyVec,
}

impl BlockMeta {
    pub fn encode_block_meta(block_meta: &[BlockMeta], buf: &mut Vec<u8>) {
        let original_len = buf.len();
        buf.put_u32(block_meta.len() as u32);
        for meta in block_meta {
            let first = meta.first_key.as_key_slice().encode();
            let last = meta.last_key.as_key_slice().encode();
            buf.put_u32(meta.offset as u32);
            buf.put_u16(first.len() as u16);
            buf.put_slice(&first);
            buf.put_u16(last.len() as u16);
            buf.put_slice(&last);
        }
        let checksum = crc32fast::hash(&buf[original_len + 4..]);
        buf.put_u32(checksum);
    }

    pub fn decode_block_meta(mut buf: &[u8]) -> Result<Vec<BlockMeta>> {
        let mut block_meta = Vec::new();
        let num = buf.get_u32() as usize;
        let checksum = crc32fast::hash(&buf[..buf.remaining() - 4]);
        for _ in 0..num {
            let offset = buf.get_u32() as usize;
            let first_key_len = buf.get_u16() as usize;
            let first_key = KeyVec::decode(&buf.copy_to_bytes(first_key_len));
            let last_key_len = buf.get_u16() as usize;
            let last_key = KeyVec::decode(&buf.copy_to_bytes(last_key_len));
            block_meta.push(BlockMeta {
                offset,
                first_key,
                last_key,
            });
        }
        if buf.get_u32() != checksum {
            return Err(Error::Internal("block meta checksum mismatch".into()));
        }
        Ok(block_meta)
    }
}

/// A read-only handle to an on-disk SSTable file.
pub struct FileObject(File, u64);

impl FileObject {
    pub fn create(path: &Path, data: Vec<u8>) -> Result<Self> {
        std::fs::write(path, &data).map_err(Error::IoWrite)?;
        File::open(path).map_err(Error::IoRead)?.sync_all().map_err(Error::IoSync)?;
        Ok(FileObject(
            File::options()
                .read(true)
                .write(false)
                .open(path)
                .map_err(|e| Error::IoOpen {
                    path: path.display().to_string(),
                    source: e,
                })?,
            data.len() as u64,
        ))
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(false)
            .open(path)
            .map_err(|e| Error::IoOpen {
                path: path.display().to_string(),
                source: e,
            })?;
        let size = file.metadata().map_err(Error::IoRead)?.len();
        Ok(FileObject(file, size))
    }

    pub fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        use std::os::unix::fs::FileExt;
        let mut data = vec![0; len as usize];
        self.0
            .read_exact_at(&mut data[..], offset)
            .map_err(Error::IoRead)?;
        Ok(data)
    }

    pub fn size(&self) -> u64 {
        self.1
    }
}

pub struct SsTable {
    file: FileObject,
    block_meta: Vec<BlockMeta>,
    block_meta_offset: usize,
    id: usize,
    block_cache: Option<Arc<BlockCache>>,
    first_key: KeyVec,
    last_key: KeyVec,
    bloom: Option<Bloom>,
}

impl SsTable {
    pub fn open(id: usize, block_cache: Option<Arc<BlockCache>>, file: FileObject) -> Result<Self> {
        let len = file.size();
        let raw_bloom_offset = file.read(len - 4, 4)?;
        let bloom_offset = (&raw_bloom_offset[..]).get_u32() as u64;
        let raw_bloom = file.read(bloom_offset, len - 4 - bloom_offset)?;
        let bloom = Bloom::decode(&raw_bloom)?;

        let raw_meta_offset = file.read(bloom_offset - 4, 4)?;
        let block_meta_offset = (&raw_meta_offset[..]).get_u32() as u64;
        let raw_meta = file.read(block_meta_offset, bloom_offset - 4 - block_meta_offset)?;
        let block_meta = BlockMeta::decode_block_meta(&raw_meta[..])?;

        Ok(Self {
            file,
            first_key: block_meta.first().unwrap().first_key.clone(),
            last_key: block_meta.last().unwrap().last_key.clone(),
            block_meta,
            block_meta_offset: block_meta_offset as usize,
            id,
            block_cache,
            bloom: Some(bloom),
        })
    }

    fn read_block(&self, block_idx: usize) -> Result<Arc<Block>> {
        let offset = self.block_meta[block_idx].offset;
        let offset_end = self
            .block_meta
            .get(block_idx + 1)
            .map_or(self.block_meta_offset, |m| m.offset);
        let block_len = offset_end - offset - 4;
        let raw = self.file.read(offset as u64, (offset_end - offset) as u64)?;
        let checksum = (&raw[block_len..]).get_u32();
        if checksum != crc32fast::hash(&raw[..block_len]) {
            return Err(Error::Internal("block checksum mismatch".into()));
        }
        Ok(Arc::new(Block::decode(&raw[..block_len])))
    }

    /// Consults the block cache keyed by `(sst_id, block_idx)` before
    /// reading from disk.
    pub fn read_block_cached(&self, block_idx: usize) -> Result<Arc<Block>> {
        match &self.block_cache {
            Some(cache) => cache.get_or_load(self.id, block_idx, || self.read_block(block_idx)),
            None => self.read_block(block_idx),
        }
    }

    /// Finds the first block whose key range may contain `key`.
    pub fn find_block_idx(&self, key: KeySlice) -> usize {
        self.block_meta
            .partition_point(|meta| meta.first_key.as_key_slice() <= key)
            .saturating_sub(1)
    }

    pub fn may_contain(&self, user_key: &[u8]) -> bool {
        self.bloom.as_ref().map_or(true, |b| b.contains(user_key))
    }

    pub fn num_of_blocks(&self) -> usize {
        self.block_meta.len()
    }

    pub fn table_size(&self) -> u64 {
        self.file.size()
    }

    pub fn sst_id(&self) -> usize {
        self.id
    }

    pub fn first_key(&self) -> &KeyVec {
        &self.first_key
    }

    pub fn last_key(&self) -> &KeyVec {
        &self.last_key
    }
}
