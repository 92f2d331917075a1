//! The internal key type: a user key paired with a sequence number (called
//! `ts` here). Ordered so that entries sort by user key ascending, then by
//! sequence number descending, matching `comparator::compare_internal_key`
//! and the on-disk encoding (`user_key || seq(8B LE)`).

use bytes::Bytes;
use std::cmp::Ordering;

use crate::coding::{self, SEQ_SIZE};

#[derive(Debug)]
pub struct Key<T: AsRef<[u8]>>(T, u64);

impl<T: AsRef<[u8]> + Clone> Clone for Key<T> {
    fn clone(&self) -> Self {
        Key(self.0.clone(), self.1)
    }
}

impl<'a> Copy for Key<&'a [u8]> {}

pub type KeySlice<'a> = Key<&'a [u8]>;
pub type KeyVec = Key<Vec<u8>>;
pub type KeyBytes = Key<Bytes>;

impl<T: AsRef<[u8]>> Key<T> {
    pub fn key_ref(&self) -> &[u8] {
        self.0.as_ref()
    }

    pub fn ts(&self) -> u64 {
        self.1
    }

    pub fn len(&self) -> usize {
        self.0.as_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.as_ref().is_empty()
    }

    /// Length of the encoded internal key (`user_key || seq`).
    pub fn raw_len(&self) -> usize {
        self.0.as_ref().len() + SEQ_SIZE
    }

    pub fn into_inner(self) -> T {
        self.0
    }

    /// `user_key || seq(8B LE)`, as written into blocks and the WAL.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.raw_len());
        buf.extend_from_slice(self.0.as_ref());
        coding::put_fixed64(&mut buf, self.1);
        buf
    }
}

impl KeyVec {
    pub fn new() -> Self {
        Self(Vec::new(), 0)
    }

    pub fn from_vec_with_ts(v: Vec<u8>, ts: u64) -> Self {
        Self(v, ts)
    }

    pub fn as_key_slice(&self) -> KeySlice {
        Key(&self.0[..], self.1)
    }

    pub fn into_key_bytes(self) -> KeyBytes {
        Key(Bytes::from(self.0), self.1)
    }

    pub fn set_from_slice(&mut self, key: KeySlice) {
        self.0.clear();
        self.0.extend_from_slice(key.key_ref());
        self.1 = key.ts();
    }

    pub fn clear(&mut self) {
        self.0.clear();
        self.1 = 0;
    }

    /// Decodes an on-disk `user_key || seq(8B LE)` record.
    pub fn decode(raw: &[u8]) -> Self {
        let user_key = coding::extract_user_key(raw).to_vec();
        let ts = coding::extract_sequence(raw);
        Self(user_key, ts)
    }
}

impl Default for KeyVec {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyBytes {
    pub fn new() -> Self {
        Self(Bytes::new(), 0)
    }

    pub fn from_bytes_with_ts(bytes: Bytes, ts: u64) -> Self {
        Self(bytes, ts)
    }

    pub fn as_key_slice(&self) -> KeySlice {
        Key(&self.0[..], self.1)
    }
}

impl Default for KeyBytes {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> KeySlice<'a> {
    pub fn from_slice(slice: &'a [u8], ts: u64) -> Self {
        Self(slice, ts)
    }

    pub fn to_key_vec(self) -> KeyVec {
        KeyVec(self.0.to_vec(), self.1)
    }
}

impl<T: AsRef<[u8]>> Key<T> {
    fn cmp_parts<U: AsRef<[u8]>>(&self, other: &Key<U>) -> Ordering {
        match self.0.as_ref().cmp(other.0.as_ref()) {
            Ordering::Equal => other.1.cmp(&self.1),
            ord => ord,
        }
    }
}

impl<T: AsRef<[u8]>> PartialEq for Key<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_parts(other) == Ordering::Equal
    }
}

impl<T: AsRef<[u8]>> Eq for Key<T> {}

impl<T: AsRef<[u8]>> PartialOrd for Key<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: AsRef<[u8]>> Ord for Key<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_parts(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_ts_sorts_first() {
        let a = KeyVec::from_vec_with_ts(b"x".to_vec(), 9);
        let b = KeyVec::from_vec_with_ts(b"x".to_vec(), 1);
        assert!(a < b);
    }

    #[test]
    fn encode_decode_roundtrip() {
        let k = KeyVec::from_vec_with_ts(b"hello".to_vec(), 42);
        let encoded = k.as_key_slice().encode();
        let decoded = KeyVec::decode(&encoded);
        assert_eq!(decoded.key_ref(), b"hello");
        assert_eq!(decoded.ts(), 42);
    }
}
