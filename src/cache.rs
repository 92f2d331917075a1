//! Fixed-capacity LRU block cache, backed by `moka::sync::Cache`. Evicting
//! an entry does not invalidate `Arc` handles already cloned out by readers.

use std::sync::Arc;

use crate::block::Block;
use crate::error::Result;

pub struct BlockCache {
    inner: moka::sync::Cache<(usize, usize), Arc<Block>>,
}

impl BlockCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: moka::sync::Cache::new(capacity),
        }
    }

    pub fn get(&self, sst_id: usize, block_idx: usize) -> Option<Arc<Block>> {
        self.inner.get(&(sst_id, block_idx))
    }

    pub fn put(&self, sst_id: usize, block_idx: usize, block: Arc<Block>) {
        self.inner.insert((sst_id, block_idx), block);
    }

    pub fn contains(&self, sst_id: usize, block_idx: usize) -> bool {
        self.inner.contains_key(&(sst_id, block_idx))
    }

    pub fn get_or_load(
        &self,
        sst_id: usize,
        block_idx: usize,
        load: impl FnOnce() -> Result<Arc<Block>>,
    ) -> Result<Arc<Block>> {
        if let Some(block) = self.get(sst_id, block_idx) {
            return Ok(block);
        }
        let block = load()?;
        self.put(sst_id, block_idx, block.clone());
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get() {
        let cache = BlockCache::new(8);
        let block = Arc::new(Block {
            data: vec![0u8; 4],
            offsets: vec![],
        });
        cache.put(1, 0, block.clone());
        assert!(cache.contains(1, 0));
        assert!(Arc::ptr_eq(&cache.get(1, 0).unwrap(), &block));
    }
}
