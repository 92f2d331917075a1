//! Compaction picking: selects input SSTables per policy. The executor that
//! turns a picked [`CompactionTask`] into new SSTables lives in
//! `lsm_storage.rs`, alongside the merging iterator it streams through.

pub mod leveled;
pub mod tiered;

use crate::lsm_storage::LsmStorageState;
use crate::options::{CompactionType, ObLsmOptions};
use leveled::LeveledCompactionController;
use tiered::TieredCompactionController;

/// A set of SSTables selected for compaction, plus enough information to
/// publish the result as a `Compaction` manifest record.
#[derive(Debug, Clone)]
pub enum CompactionTask {
    /// Merge one or more tiers (Tiered mode). `tiers` lists the
    /// `(tier_generation, sstable_ids)` pairs being merged; the result
    /// becomes a single new tier holding all surviving entries, at the
    /// minimum generation of its inputs (see `LsmStorageState::levels`).
    Tiered { tiers: Vec<(usize, Vec<usize>)> },
    /// Merge `upper` (L0 when `upper_level` is `None`) into `lower_level`
    /// (Leveled mode).
    Leveled {
        upper_level: Option<usize>,
        upper_sst_ids: Vec<usize>,
        lower_level: usize,
        lower_sst_ids: Vec<usize>,
    },
}

impl CompactionTask {
    /// Whether the compaction's output is the oldest surviving data for
    /// every key it touches, so that a pure-tombstone entry may be dropped
    /// rather than carried forward.
    pub fn compacts_to_bottom(&self, state: &LsmStorageState) -> bool {
        match self {
            CompactionTask::Tiered { tiers } => {
                let merged_ids: std::collections::HashSet<usize> =
                    tiers.iter().flat_map(|(_, ids)| ids.iter().copied()).collect();
                state
                    .levels
                    .iter()
                    .all(|(_, ids)| ids.iter().all(|id| merged_ids.contains(id)))
            }
            CompactionTask::Leveled { lower_level, .. } => {
                *lower_level == state.levels.last().map(|(lvl, _)| *lvl).unwrap_or(*lower_level)
            }
        }
    }

    pub fn all_input_sst_ids(&self) -> Vec<usize> {
        match self {
            CompactionTask::Tiered { tiers } => {
                tiers.iter().flat_map(|(_, ids)| ids.iter().copied()).collect()
            }
            CompactionTask::Leveled {
                upper_sst_ids,
                lower_sst_ids,
                ..
            } => upper_sst_ids
                .iter()
                .chain(lower_sst_ids.iter())
                .copied()
                .collect(),
        }
    }
}

/// Dispatches to the configured compaction policy.
pub enum CompactionController {
    Tiered(TieredCompactionController),
    Leveled(LeveledCompactionController),
}

impl CompactionController {
    pub fn new(options: &ObLsmOptions) -> Self {
        match options.compaction_type {
            CompactionType::Tiered => {
                CompactionController::Tiered(TieredCompactionController::new(options.default_run_num))
            }
            CompactionType::Leveled => CompactionController::Leveled(LeveledCompactionController::new(
                options.default_levels,
                options.default_l0_file_num,
                options.default_l1_level_size,
                options.default_level_ratio,
            )),
        }
    }

    /// Picks the next compaction to run, if the triggering condition for
    /// this policy currently holds.
    pub fn generate_compaction_task(
        &self,
        state: &LsmStorageState,
        table_sizes: impl Fn(usize) -> u64,
    ) -> Option<CompactionTask> {
        match self {
            CompactionController::Tiered(c) => c.generate_compaction_task(state),
            CompactionController::Leveled(c) => c.generate_compaction_task(state, table_sizes),
        }
    }
}
