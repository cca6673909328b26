//! Identity and lifecycle types
//!
//! Everything here is plain data: cheap to clone, comparable, and printable
//! in the bracketed form recovery logs use (`[index][0]`, `{name}{id}{addr}`).

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// RecoveryId
// ============================================================================

/// Handle for one recovery attempt
///
/// Issued by the registry from a monotonic counter. Never reused within a
/// process, and preserved across a reset of the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecoveryId(u64);

impl RecoveryId {
    /// Wrap a raw id
    pub const fn new(id: u64) -> Self {
        RecoveryId(id)
    }

    /// Raw numeric value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecoveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ShardId
// ============================================================================

/// Identity of a shard: index name plus shard number
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardId {
    index: String,
    shard: u32,
}

impl ShardId {
    /// Create a shard id
    pub fn new(index: impl Into<String>, shard: u32) -> Self {
        Self {
            index: index.into(),
            shard,
        }
    }

    /// Index name
    pub fn index(&self) -> &str {
        &self.index
    }

    /// Shard number within the index
    pub fn shard(&self) -> u32 {
        self.shard
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.index, self.shard)
    }
}

// ============================================================================
// DiscoveryNode
// ============================================================================

/// A node taking part in a recovery (source or target)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveryNode {
    id: String,
    name: String,
    address: String,
}

impl DiscoveryNode {
    /// Create a node identity
    pub fn new(id: impl Into<String>, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
        }
    }

    /// Unique node id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable node name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transport address
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for DiscoveryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}{{{}}}{{{}}}", self.name, self.id, self.address)
    }
}

// ============================================================================
// RecoveryType
// ============================================================================

/// Where the recovering shard gets its data from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoveryType {
    /// Local store of the shard itself
    Store,
    /// A repository snapshot
    Snapshot,
    /// Peer recovery of a replica from its primary
    Replica,
    /// Peer recovery of a relocating primary
    PrimaryRelocation,
}

impl RecoveryType {
    /// Lowercase name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryType::Store => "store",
            RecoveryType::Snapshot => "snapshot",
            RecoveryType::Replica => "replica",
            RecoveryType::PrimaryRelocation => "primary_relocation",
        }
    }
}

impl fmt::Display for RecoveryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RecoveryPhase
// ============================================================================

/// Phase of a single recovery attempt
///
/// `Done`, `Failed` and `Cancelled` are terminal. An attempt in the registry
/// is always in a non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RecoveryPhase {
    /// Created, transfer not yet begun
    Initializing = 0,
    /// Transfer in progress
    Running = 1,
    /// Completed successfully
    Done = 2,
    /// Failed (timeout or unexpected error)
    Failed = 3,
    /// Cancelled by an operator or the orchestrator
    Cancelled = 4,
}

impl RecoveryPhase {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecoveryPhase::Done | RecoveryPhase::Failed | RecoveryPhase::Cancelled
        )
    }

    /// Decode from the atomic representation
    ///
    /// Unknown values map to `Failed`; only values produced by `as u8` are
    /// ever stored.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => RecoveryPhase::Initializing,
            1 => RecoveryPhase::Running,
            2 => RecoveryPhase::Done,
            4 => RecoveryPhase::Cancelled,
            _ => RecoveryPhase::Failed,
        }
    }
}

impl fmt::Display for RecoveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecoveryPhase::Initializing => "INITIALIZING",
            RecoveryPhase::Running => "RUNNING",
            RecoveryPhase::Done => "DONE",
            RecoveryPhase::Failed => "FAILED",
            RecoveryPhase::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

// ============================================================================
// IndexShardState
// ============================================================================

/// Lifecycle state of an index shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexShardState {
    /// Allocated, nothing happened yet
    Created,
    /// Receiving data from a recovery source
    Recovering,
    /// Recovery finished, waiting to be started
    PostRecovery,
    /// Serving requests
    Started,
    /// Closed; no further use
    Closed,
}

impl fmt::Display for IndexShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndexShardState::Created => "CREATED",
            IndexShardState::Recovering => "RECOVERING",
            IndexShardState::PostRecovery => "POST_RECOVERY",
            IndexShardState::Started => "STARTED",
            IndexShardState::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}
