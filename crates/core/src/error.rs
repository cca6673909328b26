//! Error types for shard recovery
//!
//! Two families:
//! - `RecoveryError`: returned synchronously to the caller of an operation
//! - `RecoveryFailedError`: delivered asynchronously to a recovery listener
//!   when an attempt ends in failure (timeout, cancellation, I/O)

use crate::types::{DiscoveryNode, IndexShardState, RecoveryId, ShardId};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for recovery operations
pub type Result<T> = std::result::Result<T, RecoveryError>;

/// Errors surfaced synchronously by recovery operations
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Shard is not in a state that allows the requested operation
    #[error("shard {shard_id} is in state {state}, which does not allow this operation")]
    InvalidState {
        /// Shard the operation targeted
        shard_id: ShardId,
        /// State the shard was found in
        state: IndexShardState,
    },

    /// Status object was used after its last reference was released
    #[error("recovery status [{recovery_id}] is closed")]
    ClosedStatus {
        /// Recovery the closed status belonged to
        recovery_id: RecoveryId,
    },

    /// Store refused to hand out a new reference
    #[error("store of shard {shard_id} is already closed")]
    StoreClosed {
        /// Shard owning the store
        shard_id: ShardId,
    },

    /// No ongoing recovery under this id
    #[error("no ongoing recovery [{recovery_id}]")]
    RecoveryNotFound {
        /// Id that was looked up
        recovery_id: RecoveryId,
    },

    /// Recovery exists but targets a different shard
    #[error("recovery [{recovery_id}] targets shard {actual}, expected {expected}")]
    ShardMismatch {
        /// Id that was looked up
        recovery_id: RecoveryId,
        /// Shard the caller expected
        expected: ShardId,
        /// Shard the recovery actually targets
        actual: ShardId,
    },

    /// Cooperative cancellation was observed
    #[error("operation cancelled: {reason}")]
    Cancelled {
        /// Reason given to the cancellation
        reason: String,
    },

    /// Store directory has no file with this name
    #[error("file [{name}] not found in store")]
    FileNotFound {
        /// Missing file name
        name: String,
    },

    /// Scheduler no longer accepts tasks
    #[error("scheduler is shut down")]
    SchedulerShutdown,

    /// Invalid or unparsable configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Operating-system level failure (e.g. spawning the monitor thread)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecoveryError {
    /// Whether this error signals misuse of a released status
    pub fn is_closed_status(&self) -> bool {
        matches!(self, RecoveryError::ClosedStatus { .. })
    }

    /// Whether this error comes from cooperative cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RecoveryError::Cancelled { .. })
    }
}

/// Why a recovery attempt failed
#[derive(Debug, Error)]
pub enum FailureCause {
    /// No activity was observed within the activity timeout
    #[error("no activity after [{0:?}]")]
    Timeout(Duration),

    /// Cancelled by an administrative call
    #[error("recovery cancelled: {0}")]
    Cancelled(String),

    /// Unexpected I/O failure while recovering
    #[error("I/O failure during recovery")]
    Io(#[from] std::io::Error),

    /// Any other failure reported by the orchestrator
    #[error("{0}")]
    Other(String),
}

impl FailureCause {
    /// Whether the attempt timed out
    pub fn is_timeout(&self) -> bool {
        matches!(self, FailureCause::Timeout(_))
    }

    /// Whether the attempt was cancelled
    pub fn is_cancellation(&self) -> bool {
        matches!(self, FailureCause::Cancelled(_))
    }
}

/// Failure of a recovery attempt, as delivered to a listener
#[derive(Debug, Error)]
#[error("{shard_id}: recovery failed from {source_node} into {target_node}: {cause}")]
pub struct RecoveryFailedError {
    /// Shard that was recovering
    pub shard_id: ShardId,
    /// Node the data was pulled from
    pub source_node: DiscoveryNode,
    /// Node the shard lives on
    pub target_node: DiscoveryNode,
    /// What went wrong
    #[source]
    pub cause: FailureCause,
}

impl RecoveryFailedError {
    /// Create a failure for the given recovery
    pub fn new(
        shard_id: ShardId,
        source_node: DiscoveryNode,
        target_node: DiscoveryNode,
        cause: FailureCause,
    ) -> Self {
        Self {
            shard_id,
            source_node,
            target_node,
            cause,
        }
    }
}
