//! A block is the unit of I/O within an SSTable (default target 4 KiB).
//! Each entry is `common_prefix_len(u16) | rest_key_len(u16) | rest_key |
//! value_len(u16) | value`, followed by a trailing array of `u16` entry
//! offsets and an offset count.

use bytes::{Buf, BufMut, Bytes};

pub mod builder;
pub mod iterator;

pub(crate) const SIZEOF_U16: usize = std::mem::size_of::<u16>();

pub struct Block {
    pub(crate) data: Vec<u8>,
    pub(crate) offsets: Vec<u16>,
}

impl Block {
    pub fn encode(&self) -> Bytes {
        let mut buf = self.data.clone();
        let offsets_len = self.offsets.len();
        for offset in &self.offsets {
            buf.put_u16(*offset);
        }
        buf.put_u16(offsets_len as u16);
        buf.into()
    }

    pub fn decode(data: &[u8]) -> Self {
        let entry_offsets_len = (&data[data.len() - SIZEOF_U16..]).get_u16() as usize;
        let data_end = data.len() - SIZEOF_U16 - entry_offsets_len * SIZEOF_U16;
        let offsets_raw = &data[data_end..data.len() - SIZEOF_U16];
        let offsets = offsets_raw
            .chunks(SIZEOF_U16)
            .map(|mut x| x.get_u16())
            .collect();
        let data = data[0..data_end].to_vec();
        Self { data, offsets }
    }

    fn get_first_key(&self) -> Vec<u8> {
        let mut buf = &self.data[..];
        buf.get_u16();
        let key_len = buf.get_u16();
        buf[..key_len as usize].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::builder::BlockBuilder;
    use super::*;
    use crate::key::KeySlice;

    #[test]
    fn encode_decode_roundtrip() {
        let mut builder = BlockBuilder::new(4096);
        assert!(builder.add(KeySlice::from_slice(b"alpha", 3), b"1"));
        assert!(builder.add(KeySlice::from_slice(b"alphabet", 2), b"2"));
        assert!(builder.add(KeySlice::from_slice(b"beta", 1), b"3"));
        let block = builder.build();
        let encoded = block.encode();
        let decoded = Block::decode(&encoded);
        assert_eq!(decoded.data, block.data);
        assert_eq!(decoded.offsets, block.offsets);
    }
}
