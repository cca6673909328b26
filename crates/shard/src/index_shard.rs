//! Index shard handle as seen by recovery
//!
//! Only the slice of shard behavior recovery depends on is modelled: the
//! lifecycle state machine, the recovery metadata recorded when a shard is
//! marked as recovering, and recovery statistics.
//!
//! State transitions:
//!
//! ```text
//! Created --mark_as_recovering--> Recovering --post_recovery--> PostRecovery --start--> Started
//!    \______________________________\______________________________\________________close--> Closed
//! ```

use crate::store::Store;
use parking_lot::Mutex;
use recovery_core::{DiscoveryNode, IndexShardState, RecoveryError, RecoveryType, Result, ShardId};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Recovery metadata attached to a shard by `mark_as_recovering`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryInfo {
    /// Kind of recovery
    pub recovery_type: RecoveryType,
    /// Node data is pulled from (absent for store recoveries)
    pub source_node: Option<DiscoveryNode>,
    /// Node the shard lives on
    pub target_node: DiscoveryNode,
    /// Free-form reason, for logs
    pub reason: String,
}

/// Counters describing recoveries of one shard
#[derive(Debug, Default)]
pub struct RecoveryStats {
    current_as_target: AtomicUsize,
    restarts: AtomicU64,
}

impl RecoveryStats {
    /// Number of live recovery statuses targeting this shard
    pub fn current_as_target(&self) -> usize {
        self.current_as_target.load(Ordering::Acquire)
    }

    /// Number of recovery restarts (resets) performed
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Acquire)
    }

    /// Record a new live recovery status
    pub fn inc_current_as_target(&self) {
        self.current_as_target.fetch_add(1, Ordering::AcqRel);
    }

    /// Record the release of a recovery status
    pub fn dec_current_as_target(&self) {
        let _ = self
            .current_as_target
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));
    }

    fn inc_restarts(&self) {
        self.restarts.fetch_add(1, Ordering::AcqRel);
    }
}

/// A shard that can be the target of a recovery
pub struct IndexShard {
    shard_id: ShardId,
    routing_node: DiscoveryNode,
    store: Arc<Store>,
    state: Mutex<IndexShardState>,
    recovery: Mutex<Option<RecoveryInfo>>,
    recovery_stats: RecoveryStats,
}

impl IndexShard {
    /// Create a shard allocated on `routing_node`, with a fresh store
    pub fn new(shard_id: ShardId, routing_node: DiscoveryNode) -> Self {
        let store = Arc::new(Store::new(shard_id.clone()));
        Self::with_store(shard_id, routing_node, store)
    }

    /// Create a shard around an existing store
    ///
    /// The shard takes over the store's owner reference.
    pub fn with_store(shard_id: ShardId, routing_node: DiscoveryNode, store: Arc<Store>) -> Self {
        Self {
            shard_id,
            routing_node,
            store,
            state: Mutex::new(IndexShardState::Created),
            recovery: Mutex::new(None),
            recovery_stats: RecoveryStats::default(),
        }
    }

    /// Shard identity
    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    /// Node this shard is allocated on
    pub fn routing_node(&self) -> &DiscoveryNode {
        &self.routing_node
    }

    /// Shard store
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Current lifecycle state
    pub fn state(&self) -> IndexShardState {
        *self.state.lock()
    }

    /// Recovery statistics
    pub fn recovery_stats(&self) -> &RecoveryStats {
        &self.recovery_stats
    }

    /// Metadata of the current or last recovery
    pub fn recovery_info(&self) -> Option<RecoveryInfo> {
        self.recovery.lock().clone()
    }

    fn transition(
        &self,
        expected: IndexShardState,
        next: IndexShardState,
    ) -> Result<IndexShardState> {
        let mut state = self.state.lock();
        if *state != expected {
            return Err(RecoveryError::InvalidState {
                shard_id: self.shard_id.clone(),
                state: *state,
            });
        }
        *state = next;
        Ok(expected)
    }

    /// Move a freshly created shard into `Recovering`
    pub fn mark_as_recovering(
        &self,
        reason: &str,
        recovery_type: RecoveryType,
        source_node: Option<DiscoveryNode>,
    ) -> Result<()> {
        self.transition(IndexShardState::Created, IndexShardState::Recovering)?;
        *self.recovery.lock() = Some(RecoveryInfo {
            recovery_type,
            source_node,
            target_node: self.routing_node.clone(),
            reason: reason.to_string(),
        });
        tracing::debug!(
            target: "recovery::shard",
            shard_id = %self.shard_id,
            recovery_type = %recovery_type,
            reason = %reason,
            "shard marked as recovering"
        );
        Ok(())
    }

    /// Prepare the shard for a fresh recovery attempt
    ///
    /// Only valid while recovering; the shard stays in `Recovering`.
    pub fn perform_recovery_restart(&self) -> Result<()> {
        self.perform_recovery_restart_with(|| Ok(()))
    }

    /// Restart recovery only if `prepare` succeeds
    ///
    /// `prepare` runs while the shard is held in `Recovering`, so it cannot
    /// be closed or finished concurrently. The restart is counted only when
    /// `prepare` returns `Ok`.
    pub fn perform_recovery_restart_with<T, F>(&self, prepare: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let state = self.state.lock();
        if *state != IndexShardState::Recovering {
            return Err(RecoveryError::InvalidState {
                shard_id: self.shard_id.clone(),
                state: *state,
            });
        }
        let prepared = prepare()?;
        self.recovery_stats.inc_restarts();
        Ok(prepared)
    }

    /// Finish recovery: `Recovering` to `PostRecovery`
    pub fn post_recovery(&self, reason: &str) -> Result<()> {
        self.transition(IndexShardState::Recovering, IndexShardState::PostRecovery)?;
        tracing::debug!(
            target: "recovery::shard",
            shard_id = %self.shard_id,
            reason = %reason,
            "shard recovery finished"
        );
        Ok(())
    }

    /// Start serving: `PostRecovery` to `Started`
    pub fn start(&self) -> Result<()> {
        self.transition(IndexShardState::PostRecovery, IndexShardState::Started)
            .map(|_| ())
    }

    /// Close the shard and release its store reference
    ///
    /// Closing twice is a no-op.
    pub fn close(&self, reason: &str) {
        {
            let mut state = self.state.lock();
            if *state == IndexShardState::Closed {
                return;
            }
            *state = IndexShardState::Closed;
        }
        self.store.dec_ref();
        tracing::debug!(
            target: "recovery::shard",
            shard_id = %self.shard_id,
            reason = %reason,
            "shard closed"
        );
    }
}

impl fmt::Debug for IndexShard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexShard")
            .field("shard_id", &self.shard_id)
            .field("state", &self.state())
            .field("store", &self.store)
            .finish()
    }
}
