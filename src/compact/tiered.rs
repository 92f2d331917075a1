//! Tiered compaction: a flat list of "runs" (tiers). Each flush produces a
//! new tier holding exactly the flushed SSTable(s); compaction merges the
//! oldest tiers together once their count crosses a threshold.

use super::CompactionTask;
use crate::lsm_storage::LsmStorageState;

pub struct TieredCompactionController {
    /// Number of tiers that triggers a merge of the two oldest
    /// (`default_run_num`).
    run_num_trigger: usize,
}

impl TieredCompactionController {
    pub fn new(run_num_trigger: usize) -> Self {
        Self { run_num_trigger }
    }

    /// `state.levels` holds one entry per tier, newest tier first (flushes
    /// insert new tiers at the front; the oldest-two compaction's result is
    /// pushed onto the back, where the data it was built from already sat),
    /// so the oldest two always sit at the back of the vector.
    pub fn generate_compaction_task(&self, state: &LsmStorageState) -> Option<CompactionTask> {
        if state.levels.len() < self.run_num_trigger {
            return None;
        }
        let oldest_two = state.levels[state.levels.len() - 2..].to_vec();
        Some(CompactionTask::Tiered { tiers: oldest_two })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn state_with_tiers(tiers: &[(usize, Vec<usize>)]) -> LsmStorageState {
        LsmStorageState {
            memtable: std::sync::Arc::new(crate::mem_table::MemTable::create(0)),
            imm_memtables: Vec::new(),
            l0_sstables: Vec::new(),
            levels: tiers.to_vec(),
            sstables: HashMap::new(),
        }
    }

    #[test]
    fn merges_once_run_count_reaches_trigger() {
        let controller = TieredCompactionController::new(3);
        let state = state_with_tiers(&[(2, vec![2]), (1, vec![1]), (0, vec![0])]);
        let task = controller.generate_compaction_task(&state).unwrap();
        match task {
            CompactionTask::Tiered { tiers } => {
                assert_eq!(tiers, vec![(1, vec![1]), (0, vec![0])]);
            }
            _ => panic!("expected tiered task"),
        }
    }

    #[test]
    fn no_task_below_trigger() {
        let controller = TieredCompactionController::new(3);
        let state = state_with_tiers(&[(1, vec![1]), (0, vec![0])]);
        assert!(controller.generate_compaction_task(&state).is_none());
    }
}
