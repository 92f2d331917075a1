//! Little-endian fixed-width and length-prefixed encoding helpers shared by
//! the internal key, lookup key, and WAL record formats.

use bytes::{Buf, BufMut};

pub const SEQ_SIZE: usize = 8;
pub const LOOKUP_KEY_PREFIX_SIZE: usize = 8;

pub fn put_fixed32(dst: &mut Vec<u8>, v: u32) {
    dst.put_u32_le(v);
}

pub fn get_fixed32(src: &[u8]) -> u32 {
    (&src[..4]).get_u32_le()
}

pub fn put_fixed64(dst: &mut Vec<u8>, v: u64) {
    dst.put_u64_le(v);
}

pub fn get_fixed64(src: &[u8]) -> u64 {
    (&src[..8]).get_u64_le()
}

/// Appends `len(data) as u64 LE` followed by `data`.
pub fn put_length_prefixed(dst: &mut Vec<u8>, data: &[u8]) {
    dst.put_u64_le(data.len() as u64);
    dst.put_slice(data);
}

/// Reads a `put_length_prefixed` record back out, returning the payload and
/// the number of bytes consumed.
pub fn get_length_prefixed(src: &[u8]) -> Option<(&[u8], usize)> {
    if src.len() < 8 {
        return None;
    }
    let len = (&src[..8]).get_u64_le() as usize;
    let start = 8;
    let end = start.checked_add(len)?;
    if end > src.len() {
        return None;
    }
    Some((&src[start..end], end))
}

/// `user_key || seq(8B LE)`, as stored inside memtables and SSTable blocks.
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    &internal_key[..internal_key.len() - SEQ_SIZE]
}

pub fn extract_sequence(internal_key: &[u8]) -> u64 {
    get_fixed64(&internal_key[internal_key.len() - SEQ_SIZE..])
}

/// lookup key: `len(user_key + 8)(8B LE) || user_key || snapshot_seq(8B LE)`.
pub fn user_key_size_from_lookup_key(lookup_key: &[u8]) -> usize {
    lookup_key.len() - SEQ_SIZE - LOOKUP_KEY_PREFIX_SIZE
}

pub fn extract_user_key_from_lookup_key(lookup_key: &[u8]) -> &[u8] {
    let size = user_key_size_from_lookup_key(lookup_key);
    &lookup_key[LOOKUP_KEY_PREFIX_SIZE..LOOKUP_KEY_PREFIX_SIZE + size]
}

pub fn extract_internal_key(lookup_key: &[u8]) -> &[u8] {
    &lookup_key[LOOKUP_KEY_PREFIX_SIZE..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_roundtrip() {
        let mut buf = Vec::new();
        put_fixed32(&mut buf, 0xdead_beef);
        put_fixed64(&mut buf, 0x1122_3344_5566_7788);
        assert_eq!(get_fixed32(&buf[0..4]), 0xdead_beef);
        assert_eq!(get_fixed64(&buf[4..12]), 0x1122_3344_5566_7788);
    }

    #[test]
    fn length_prefixed_roundtrip() {
        let mut buf = Vec::new();
        put_length_prefixed(&mut buf, b"hello");
        let (payload, consumed) = get_length_prefixed(&buf).unwrap();
        assert_eq!(payload, b"hello");
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn internal_key_extraction() {
        let mut key = b"abc".to_vec();
        put_fixed64(&mut key, 42);
        assert_eq!(extract_user_key(&key), b"abc");
        assert_eq!(extract_sequence(&key), 42);
    }

    #[test]
    fn lookup_key_extraction() {
        let user_key = b"abc";
        let mut lk = Vec::new();
        put_fixed64(&mut lk, (user_key.len() + SEQ_SIZE) as u64);
        lk.extend_from_slice(user_key);
        put_fixed64(&mut lk, 7);
        assert_eq!(extract_user_key_from_lookup_key(&lk), user_key);
        assert_eq!(extract_internal_key(&lk), &lk[LOOKUP_KEY_PREFIX_SIZE..]);
    }
}
