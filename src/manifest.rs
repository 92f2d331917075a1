//! The durable metadata log describing live SSTables, compaction events, and
//! memtable/WAL linkage. Records are length-prefixed and CRC32-checksummed,
//! and come in three kinds: full-state snapshots, new-memtable markers, and
//! compaction results.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Write},
    path::Path,
    sync::Arc,
};

use bytes::BufMut;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::options::CompactionType;

/// One SSTable's placement, as tracked by a `Snapshot` or `Compaction`
/// record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SsTableInfo {
    pub sstable_id: usize,
    pub level: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ManifestRecord {
    /// Full set of live SSTables grouped by level, plus the counters needed
    /// to resume allocation.
    Snapshot {
        sstables: Vec<SsTableInfo>,
        next_sstable_id: usize,
        next_seq: u64,
        compaction_type: CompactionType,
    },
    /// A freshly opened memtable, paired with a WAL file of the same id.
    NewMemtable { memtable_id: usize },
    /// A compaction's effect on the live SSTable set, applied atomically.
    Compaction {
        compaction_type: CompactionType,
        added: Vec<SsTableInfo>,
        removed: Vec<usize>,
        next_sstable_id: usize,
        seq: u64,
    },
}

/// Appends length-prefixed, CRC32-checksummed JSON records, sequentially.
pub struct Manifest {
    file: Arc<Mutex<File>>,
}

impl Manifest {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
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
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn recover(path: impl AsRef<Path>) -> Result<(Self, Vec<ManifestRecord>)> {
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

        let mut records = Vec::new();
        let mut rest = &buf[..];
        while rest.len() >= 8 {
            let len = u64::from_be_bytes(rest[..8].try_into().unwrap()) as usize;
            if rest.len() < 8 + len + 4 {
                break;
            }
            let payload = &rest[8..8 + len];
            let checksum = u32::from_be_bytes(rest[8 + len..8 + len + 4].try_into().unwrap());
            if crc32fast::hash(payload) != checksum {
                return Err(Error::Internal("manifest record checksum mismatch".into()));
            }
            let record: ManifestRecord = serde_json::from_slice(payload)?;
            records.push(record);
            rest = &rest[8 + len + 4..];
        }

        Ok((
            Self {
                file: Arc::new(Mutex::new(file)),
            },
            records,
        ))
    }

    pub fn add_record(
        &self,
        _state_lock_observer: &MutexGuard<()>,
        record: ManifestRecord,
    ) -> Result<()> {
        self.append(&record)
    }

    pub fn add_record_when_init(&self, record: ManifestRecord) -> Result<()> {
        self.append(&record)
    }

    fn append(&self, record: &ManifestRecord) -> Result<()> {
        let mut file = self.file.lock();
        let mut buf = serde_json::to_vec(record)?;
        let checksum = crc32fast::hash(&buf);
        let mut framed = Vec::with_capacity(8 + buf.len() + 4);
        framed.extend_from_slice(&(buf.len() as u64).to_be_bytes());
        framed.append(&mut buf);
        framed.put_u32(checksum);
        file.write_all(&framed).map_err(Error::IoWrite)?;
        file.sync_all().map_err(Error::IoSync)
    }
}

/// `CURRENT` names the active manifest file by its numeric id.
pub fn read_current(dir: impl AsRef<Path>) -> Result<Option<usize>> {
    let path = dir.as_ref().join("CURRENT");
    match std::fs::read_to_string(&path) {
        Ok(contents) => {
            let id = contents
                .trim()
                .parse::<usize>()
                .map_err(|_| Error::Internal("malformed CURRENT file".into()))?;
            Ok(Some(id))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::IoRead(e)),
    }
}

/// Atomically points `CURRENT` at manifest `id`: write-then-rename so a
/// crash mid-write never leaves `CURRENT` pointing at a partial file. The
/// new manifest is written fully and fsynced, `CURRENT` is swapped
/// atomically, and only then is the old manifest removed.
pub fn write_current(dir: impl AsRef<Path>, id: usize) -> Result<()> {
    let dir = dir.as_ref();
    let tmp_path = dir.join("CURRENT.tmp");
    let final_path = dir.join("CURRENT");
    {
        let mut tmp = File::create(&tmp_path).map_err(Error::IoWrite)?;
        tmp.write_all(id.to_string().as_bytes())
            .map_err(Error::IoWrite)?;
        tmp.sync_all().map_err(Error::IoSync)?;
    }
    std::fs::rename(&tmp_path, &final_path).map_err(Error::IoWrite)?;
    Ok(())
}

pub fn manifest_path(dir: impl AsRef<Path>, id: usize) -> std::path::PathBuf {
    dir.as_ref().join(format!("{id}.mf"))
}

pub fn wal_path(dir: impl AsRef<Path>, id: usize) -> std::path::PathBuf {
    dir.as_ref().join(format!("{id}.wal"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_and_recover_roundtrip() {
        let dir = tempdir().unwrap();
        let path = manifest_path(dir.path(), 0);
        {
            let manifest = Manifest::create(&path).unwrap();
            manifest
                .add_record_when_init(ManifestRecord::NewMemtable { memtable_id: 0 })
                .unwrap();
            manifest
                .add_record_when_init(ManifestRecord::Snapshot {
                    sstables: vec![SsTableInfo {
                        sstable_id: 1,
                        level: 0,
                    }],
                    next_sstable_id: 2,
                    next_seq: 5,
                    compaction_type: CompactionType::Leveled,
                })
                .unwrap();
        }
        let (_manifest, records) = Manifest::recover(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(
            records[0],
            ManifestRecord::NewMemtable { memtable_id: 0 }
        ));
    }

    #[test]
    fn current_roundtrip() {
        let dir = tempdir().unwrap();
        assert!(read_current(dir.path()).unwrap().is_none());
        write_current(dir.path(), 3).unwrap();
        assert_eq!(read_current(dir.path()).unwrap(), Some(3));
    }
}
