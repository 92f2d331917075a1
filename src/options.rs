//! Engine configuration: tunable sizes, compaction policy, and read-time
//! snapshot selection.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompactionType {
    Tiered,
    Leveled,
}

#[derive(Debug, Clone)]
pub struct ObLsmOptions {
    /// bytes; a memtable is rotated to immutable once it grows past this.
    pub memtable_size: usize,
    /// target bytes per SSTable produced by flush/compaction.
    pub table_size: usize,
    /// target bytes per block within an SSTable.
    pub block_size: usize,
    /// Leveled: number of levels below L0.
    pub default_levels: usize,
    /// Leveled: byte budget of L1; each lower level multiplies by `default_level_ratio`.
    pub default_l1_level_size: usize,
    pub default_level_ratio: usize,
    /// Leveled: L0 -> L1 compaction triggers once L0 holds more files than this.
    pub default_l0_file_num: usize,
    /// Tiered: number of runs that triggers a merge of the two oldest.
    pub default_run_num: usize,
    pub compaction_type: CompactionType,
    /// fsync the WAL after every write.
    pub force_sync_new_log: bool,
}

impl Default for ObLsmOptions {
    fn default() -> Self {
        Self {
            memtable_size: 8 * 1024,
            table_size: 16 * 1024,
            block_size: 4 * 1024,
            default_levels: 7,
            default_l1_level_size: 128 * 1024,
            default_level_ratio: 10,
            default_l0_file_num: 3,
            default_run_num: 7,
            compaction_type: CompactionType::Leveled,
            force_sync_new_log: true,
        }
    }
}

/// `seq == CURRENT_SEQ` means "use the engine's current sequence counter".
pub const CURRENT_SEQ: i64 = -1;

#[derive(Debug, Clone, Copy)]
pub struct ObLsmReadOptions {
    pub seq: i64,
}

impl Default for ObLsmReadOptions {
    fn default() -> Self {
        Self { seq: CURRENT_SEQ }
    }
}
