//! A fixed-size, thread-safe bloom filter. One instance guards a single
//! SSTable; the table builder constructs the filter at table construction
//! time and persists it alongside the table.

use parking_lot::Mutex;

const DEFAULT_BITS: usize = 1 << 16;
const DEFAULT_HASH_COUNT: usize = 4;

struct Inner {
    bits: Vec<u64>,
    object_count: usize,
}

/// `insert`/`contains` never return a false negative; `contains` may return
/// a false positive.
pub struct Bloom {
    hash_function_count: usize,
    total_bits: usize,
    inner: Mutex<Inner>,
}

fn seeded_hash(data: &[u8], seed: u64) -> u64 {
    let base = farmhash::hash64(data);
    base ^ (seed
        .wrapping_add(0x9e37_79b9)
        .wrapping_add(seed << 6)
        .wrapping_add(seed >> 2))
}

impl Inner {
    fn new(total_bits: usize) -> Self {
        Self {
            bits: vec![0u64; total_bits.div_ceil(64)],
            object_count: 0,
        }
    }

    fn set_bit(&mut self, idx: usize) {
        self.bits[idx / 64] |= 1 << (idx % 64);
    }

    fn get_bit(&self, idx: usize) -> bool {
        self.bits[idx / 64] & (1 << (idx % 64)) != 0
    }
}

impl Bloom {
    pub fn new(hash_function_count: usize, total_bits: usize) -> Self {
        Self {
            hash_function_count,
            total_bits,
            inner: Mutex::new(Inner::new(total_bits)),
        }
    }

    pub fn insert(&self, object: &[u8]) {
        let mut inner = self.inner.lock();
        for seed in 0..self.hash_function_count as u64 {
            let bit = (seeded_hash(object, seed) % self.total_bits as u64) as usize;
            inner.set_bit(bit);
        }
        inner.object_count += 1;
    }

    pub fn contains(&self, object: &[u8]) -> bool {
        let inner = self.inner.lock();
        for seed in 0..self.hash_function_count as u64 {
            let bit = (seeded_hash(object, seed) % self.total_bits as u64) as usize;
            if !inner.get_bit(bit) {
                return false;
            }
        }
        true
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.bits.iter_mut().for_each(|w| *w = 0);
        inner.object_count = 0;
    }

    pub fn object_count(&self) -> usize {
        self.inner.lock().object_count
    }

    pub fn empty(&self) -> bool {
        self.object_count() == 0
    }

    /// Serializes the filter as `bits || hash_count(u8) || crc32(u32 LE)`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let offset = buf.len();
        let inner = self.inner.lock();
        for word in &inner.bits {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        buf.push(self.hash_function_count as u8);
        let checksum = crc32fast::hash(&buf[offset..]);
        buf.extend_from_slice(&checksum.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> crate::error::Result<Self> {
        if buf.len() < 5 {
            return Err(crate::error::Error::RecordEof);
        }
        let checksum_offset = buf.len() - 4;
        let checksum = u32::from_le_bytes(buf[checksum_offset..].try_into().unwrap());
        if checksum != crc32fast::hash(&buf[..checksum_offset]) {
            return Err(crate::error::Error::Internal(
                "bloom filter checksum mismatch".into(),
            ));
        }
        let k = buf[checksum_offset - 1] as usize;
        let bits_buf = &buf[..checksum_offset - 1];
        let bits: Vec<u64> = bits_buf
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        let total_bits = bits.len() * 64;
        Ok(Self {
            hash_function_count: k,
            total_bits,
            inner: Mutex::new(Inner {
                bits,
                object_count: 0,
            }),
        })
    }
}

impl Default for Bloom {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_COUNT, DEFAULT_BITS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_false_negatives() {
        let bloom = Bloom::default();
        for k in [&b"a"[..], b"bb", b"ccc"] {
            bloom.insert(k);
        }
        for k in [&b"a"[..], b"bb", b"ccc"] {
            assert!(bloom.contains(k));
        }
        assert_eq!(bloom.object_count(), 3);
    }

    #[test]
    fn clear_resets_state() {
        let bloom = Bloom::default();
        bloom.insert(b"x");
        bloom.clear();
        assert!(bloom.empty());
    }

    #[test]
    fn encode_decode_roundtrip() {
        let bloom = Bloom::default();
        bloom.insert(b"alpha");
        let mut buf = Vec::new();
        bloom.encode(&mut buf);
        let decoded = Bloom::decode(&buf).unwrap();
        assert!(decoded.contains(b"alpha"));
    }
}
