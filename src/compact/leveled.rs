//! Leveled compaction: L0 may hold overlapping SSTables; levels ≥ 1 are
//! partitioned into disjoint key ranges. Each level enforces a byte budget
//! that grows by a fixed ratio going down the tree.

use super::CompactionTask;
use crate::key::KeyVec;
use crate::lsm_storage::LsmStorageState;

pub struct LeveledCompactionController {
    levels: usize,
    l0_file_num_trigger: usize,
    l1_level_size: usize,
    level_size_multiplier: usize,
}

fn key_range(state: &LsmStorageState, ids: &[usize]) -> Option<(KeyVec, KeyVec)> {
    let mut first: Option<KeyVec> = None;
    let mut last: Option<KeyVec> = None;
    for id in ids {
        let table = state.sstables.get(id)?;
        first = Some(match first {
            Some(f) if f.as_key_slice() <= table.first_key().as_key_slice() => f,
            _ => table.first_key().clone(),
        });
        last = Some(match last {
            Some(l) if l.as_key_slice() >= table.last_key().as_key_slice() => l,
            _ => table.last_key().clone(),
        });
    }
    Some((first?, last?))
}

fn overlapping_ids(state: &LsmStorageState, level: usize, lo: &KeyVec, hi: &KeyVec) -> Vec<usize> {
    let Some((_, ids)) = state.levels.iter().find(|(lvl, _)| *lvl == level) else {
        return Vec::new();
    };
    ids.iter()
        .copied()
        .filter(|id| {
            let Some(table) = state.sstables.get(id) else {
                return false;
            };
            table.first_key().as_key_slice() <= hi.as_key_slice()
                && table.last_key().as_key_slice() >= lo.as_key_slice()
        })
        .collect()
}

impl LeveledCompactionController {
    pub fn new(
        levels: usize,
        l0_file_num_trigger: usize,
        l1_level_size: usize,
        level_size_multiplier: usize,
    ) -> Self {
        Self {
            levels,
            l0_file_num_trigger,
            l1_level_size,
            level_size_multiplier,
        }
    }

    /// Byte budget for 1-indexed level `level`: L1's budget is
    /// `default_l1_level_size`, and each subsequent level multiplies it by
    /// `default_level_ratio`.
    pub fn level_budget(&self, level: usize) -> u64 {
        let multiplier = self.level_size_multiplier.pow((level - 1) as u32);
        (self.l1_level_size * multiplier) as u64
    }

    pub fn generate_compaction_task(
        &self,
        state: &LsmStorageState,
        table_size: impl Fn(usize) -> u64,
    ) -> Option<CompactionTask> {
        if state.l0_sstables.len() > self.l0_file_num_trigger {
            let (lo, hi) = key_range(state, &state.l0_sstables)?;
            let lower_sst_ids = overlapping_ids(state, 1, &lo, &hi);
            return Some(CompactionTask::Leveled {
                upper_level: None,
                upper_sst_ids: state.l0_sstables.clone(),
                lower_level: 1,
                lower_sst_ids,
            });
        }

        for level in 1..self.levels {
            let Some((_, ids)) = state.levels.iter().find(|(lvl, _)| *lvl == level) else {
                continue;
            };
            let total: u64 = ids.iter().map(|id| table_size(*id)).sum();
            if total > self.level_budget(level) {
                let victim = *ids.iter().min()?;
                let (lo, hi) = key_range(state, std::slice::from_ref(&victim))?;
                let lower_sst_ids = overlapping_ids(state, level + 1, &lo, &hi);
                return Some(CompactionTask::Leveled {
                    upper_level: Some(level),
                    upper_sst_ids: vec![victim],
                    lower_level: level + 1,
                    lower_sst_ids,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_budget_scales_by_ratio() {
        let controller = LeveledCompactionController::new(7, 3, 128 * 1024, 10);
        assert_eq!(controller.level_budget(1), 128 * 1024);
        assert_eq!(controller.level_budget(2), 1_280 * 1024);
    }
}
