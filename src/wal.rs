//! Per-memtable write-ahead log. Record format: `len(8) || seq(8) ||
//! key_len(4) || key || value_len(4) || value`, matching the fixed-width
//! little-endian coding used throughout this crate. A value length of zero
//! marks a tombstone.

use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Read, Seek, SeekFrom, Write},
    path::Path,
    sync::Arc,
};

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;
use parking_lot::Mutex;

use crate::coding::{get_fixed32, get_fixed64, put_fixed32, put_fixed64};
use crate::error::{Error, Result};
use crate::key::{KeyBytes, KeySlice};

pub struct Wal {
    file: Arc<Mutex<BufWriter<File>>>,
    force_sync: bool,
}

enum RecordDecodeError {
    /// The buffer declares a record longer than the remaining bytes: a torn
    /// trailing write left by a crash.
    Incomplete,
    Eof,
}

impl Wal {
    pub fn create(path: impl AsRef<Path>, force_sync: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .create_new(true)
            .write(true)
            .open(path.as_ref())
            .map_err(|e| Error::IoOpen {
                path: path.as_ref().display().to_string(),
                source: e,
            })?;
        Ok(Self {
            file: Arc::new(Mutex::new(BufWriter::new(file))),
            force_sync,
        })
    }

    /// Replays every fully-written record in `path` into `skiplist`,
    /// returning a `Wal` ready for further appends plus the maximum
    /// sequence number observed, so callers can resume the global seq
    /// counter past it.
    pub fn recover(
        path: impl AsRef<Path>,
        force_sync: bool,
        skiplist: &Arc<SkipMap<KeyBytes, Bytes>>,
    ) -> Result<(Self, u64)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .map_err(|e| Error::IoOpen {
                path: path.as_ref().display().to_string(),
                source: e,
            })?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(Error::IoRead)?;

        let mut rest = &buf[..];
        let mut max_seq = 0u64;
        loop {
            match Self::decode_record(rest) {
                Ok((seq, key, value, consumed)) => {
                    max_seq = max_seq.max(seq);
                    skiplist.insert(KeyBytes::from_bytes_with_ts(Bytes::from(key), seq), Bytes::from(value));
                    rest = &rest[consumed..];
                }
                Err(RecordDecodeError::Incomplete) | Err(RecordDecodeError::Eof) => break,
            }
        }

        let valid_len = buf.len() - rest.len();
        file.set_len(valid_len as u64).map_err(Error::IoWrite)?;
        file.seek(SeekFrom::End(0)).map_err(Error::IoWrite)?;

        Ok((
            Self {
                file: Arc::new(Mutex::new(BufWriter::new(file))),
                force_sync,
            },
            max_seq,
        ))
    }

    fn decode_record(
        buf: &[u8],
    ) -> std::result::Result<(u64, Vec<u8>, Vec<u8>, usize), RecordDecodeError> {
        if buf.len() < 8 {
            return Err(RecordDecodeError::Eof);
        }
        let total_len = get_fixed64(&buf[..8]) as usize;
        if buf.len() < 8 + total_len {
            return Err(RecordDecodeError::Incomplete);
        }
        let payload = &buf[8..8 + total_len];
        if payload.len() < 16 {
            return Err(RecordDecodeError::Incomplete);
        }
        let seq = get_fixed64(&payload[0..8]);
        let key_len = get_fixed32(&payload[8..12]) as usize;
        let key_start = 12;
        if payload.len() < key_start + key_len + 4 {
            return Err(RecordDecodeError::Incomplete);
        }
        let key = payload[key_start..key_start + key_len].to_vec();
        let value_len_start = key_start + key_len;
        let value_len = get_fixed32(&payload[value_len_start..value_len_start + 4]) as usize;
        let value_start = value_len_start + 4;
        if payload.len() < value_start + value_len {
            return Err(RecordDecodeError::Incomplete);
        }
        let value = payload[value_start..value_start + value_len].to_vec();
        Ok((seq, key, value, 8 + total_len))
    }

    /// Appends `(seq, key, value)`, optionally fsyncing depending on
    /// `force_sync_new_log`.
    pub fn put(&self, key: KeySlice, value: &[u8]) -> Result<()> {
        let mut payload = Vec::with_capacity(16 + key.key_ref().len() + value.len());
        put_fixed64(&mut payload, key.ts());
        put_fixed32(&mut payload, key.key_ref().len() as u32);
        payload.extend_from_slice(key.key_ref());
        put_fixed32(&mut payload, value.len() as u32);
        payload.extend_from_slice(value);

        let mut record = Vec::with_capacity(8 + payload.len());
        put_fixed64(&mut record, payload.len() as u64);
        record.extend_from_slice(&payload);

        let mut file = self.file.lock();
        file.write_all(&record).map_err(Error::IoWrite)?;
        if self.force_sync {
            file.flush().map_err(Error::IoWrite)?;
            file.get_ref().sync_all().map_err(Error::IoSync)?;
        }
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        let mut file = self.file.lock();
        file.flush().map_err(Error::IoWrite)?;
        file.get_ref().sync_all().map_err(Error::IoSync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeySlice;
    use tempfile::tempdir;

    #[test]
    fn put_then_recover_restores_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.wal");
        {
            let wal = Wal::create(&path, true).unwrap();
            wal.put(KeySlice::from_slice(b"a", 1), b"1").unwrap();
            wal.put(KeySlice::from_slice(b"b", 2), b"").unwrap();
        }
        let skiplist = Arc::new(SkipMap::new());
        let (_wal, max_seq) = Wal::recover(&path, true, &skiplist).unwrap();
        assert_eq!(max_seq, 2);
        assert_eq!(skiplist.len(), 2);
        let tombstone = skiplist
            .get(&KeyBytes::from_bytes_with_ts(Bytes::from_static(b"b"), 2))
            .unwrap();
        assert!(tombstone.value().is_empty());
    }

    #[test]
    fn truncated_trailing_record_is_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.wal");
        {
            let wal = Wal::create(&path, true).unwrap();
            wal.put(KeySlice::from_slice(b"a", 1), b"1").unwrap();
        }
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0u8; 5]).unwrap();
        }
        let skiplist = Arc::new(SkipMap::new());
        let (_wal, max_seq) = Wal::recover(&path, true, &skiplist).unwrap();
        assert_eq!(max_seq, 1);
        assert_eq!(skiplist.len(), 1);
    }
}
