//! In-memory registry of ongoing shard recoveries
//!
//! A node that pulls shard data from a peer registers each attempt with a
//! [`RecoveryRegistry`], accesses it through scoped [`RecoveryRef`] handles
//! while transferring files, and finishes it with exactly one of
//! `mark_as_done`, `fail` or `cancel`. Attempts that stop making progress are
//! failed automatically after their activity timeout.
//!
//! ```ignore
//! use shard_recovery::*;
//! use std::sync::Arc;
//!
//! let registry = RecoveryRegistry::with_thread_scheduler(
//!     RegistryConfig::default(),
//!     tracing::info_span!("node", name = "node-1"),
//! )?;
//! shard.mark_as_recovering("peer recovery", RecoveryType::Replica, Some(primary.clone()))?;
//! let id = registry.start_with_default_timeout(shard, primary, listener)?;
//!
//! if let Some(recovery) = registry.get(id) {
//!     recovery.write_temp_file_chunk("_0.cfs", &bytes)?;
//!     recovery.rename_all_temp_files()?;
//! }
//! registry.mark_as_done(id);
//! ```

#![warn(missing_docs)]

mod types;

pub use types::*;
