//! Transaction support: snapshot-isolated reads plus a local write buffer
//! that commits atomically under one fresh sequence number. There is no
//! optimistic conflict-checking oracle: commit simply applies the write set
//! atomically rather than validating against concurrent commits (see
//! DESIGN.md's Open Question resolution).

pub mod txn;

pub use txn::{Transaction, TxnIterator};
