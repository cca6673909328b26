//! Core types for shard recovery
//!
//! This crate defines the foundational types shared by every recovery crate:
//! - `RecoveryId`: Process-unique handle for one recovery attempt
//! - `ShardId` / `DiscoveryNode`: Identity of the shard and the peers involved
//! - `RecoveryType` / `RecoveryPhase` / `IndexShardState`: Lifecycle enums
//! - `RecoveryError` / `RecoveryFailedError`: Error taxonomy
//! - `CancellationSet`: Cooperative cancellation signal shared across a reset

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod error;
pub mod types;

pub use cancel::CancellationSet;
pub use error::{FailureCause, RecoveryError, RecoveryFailedError, Result};
pub use types::{DiscoveryNode, IndexShardState, RecoveryId, RecoveryPhase, RecoveryType, ShardId};
