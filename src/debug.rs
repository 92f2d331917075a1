//! Debug introspection: prints the live SSTable layout across L0 and every
//! level/tier. Kept as a standalone file adding inherent impls onto
//! [`LsmStorageInner`]/[`ObLsm`] rather than folded into `lsm_storage.rs`.

use crate::lsm_storage::{LsmStorageInner, ObLsm};

impl LsmStorageInner {
    pub fn dump_sstables(&self) {
        let snapshot = self.state.read();

        if !snapshot.l0_sstables.is_empty() {
            println!("L0 ({}): {:?}", snapshot.l0_sstables.len(), snapshot.l0_sstables);
        }

        for (level, ids) in &snapshot.levels {
            println!("L{level} ({}): {:?}", ids.len(), ids);
        }
    }
}

impl ObLsm {
    pub fn dump_sstables(&self) {
        self.inner.dump_sstables()
    }
}
