//! Engine-level scenario tests exercising the public `ObLsm` API end to end,
//! each file using `tempfile::tempdir()` for on-disk state.

mod basic_ops;
mod concurrent_writers;
mod flush_compaction_recovery;
mod random_workload;
mod range_scan;
mod snapshot_mvcc;
