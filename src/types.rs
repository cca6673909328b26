//! Public types for the shard recovery API.
//!
//! This module re-exports types from internal crates with a clean public interface.

// ============================================================================
// Public API types - these are what users should use
// ============================================================================

// Identity
pub use recovery_core::{DiscoveryNode, RecoveryId, ShardId};

// Lifecycle
pub use recovery_core::{IndexShardState, RecoveryPhase, RecoveryType};

// Errors
pub use recovery_core::{FailureCause, RecoveryError, RecoveryFailedError, Result};

// Cooperative cancellation
pub use recovery_core::CancellationSet;

// Shard-side resources
pub use recovery_shard::{IndexShard, RecoveryInfo, RecoveryStats, Store};

// Registry, handles and listeners
pub use recovery_registry::{
    ChannelListener, NoopListener, RecoveryListener, RecoveryOutcome, RecoveryRef,
    RecoveryRegistry, RecoveryStatus, RegistryConfig,
};

// Scheduling
pub use recovery_registry::{ManualScheduler, Scheduler, Task, ThreadScheduler};
