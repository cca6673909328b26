//! Shard-side resources consumed by recovery
//!
//! - `Store`: reference-counted shard store with an in-memory directory
//! - `IndexShard`: shard lifecycle state machine, recovery metadata and stats
//!
//! The recovery registry never manages these resources itself; it only
//! acquires and releases store references symmetrically and drives the
//! shard through its recovery transitions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod index_shard;
pub mod store;

pub use index_shard::{IndexShard, RecoveryInfo, RecoveryStats};
pub use store::Store;
