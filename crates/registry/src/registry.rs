//! Registry of ongoing recoveries
//!
//! Maps `RecoveryId` to the current `RecoveryStatus` of that recovery and
//! drives one inactivity monitor per entry.
//!
//! # Concurrency
//!
//! - `DashMap`: sharded locks, so unrelated recoveries never contend
//! - `get` acquires a reference and refreshes the access time while holding
//!   the entry's read lock; terminal removals and the reset swap take the
//!   entry's write lock. A reference is therefore never handed out for an
//!   entry that was already removed or replaced.
//! - `start` inserts under the admission lock in read mode; the shard-wide
//!   cancellations take it in write mode so no concurrent `start` for the
//!   shard slips past their scan.
//! - Listener callbacks run after the entry has left the map and with no
//!   registry lock held, so listeners may call back into the registry.
//!
//! # Example
//!
//! ```ignore
//! let scheduler = Arc::new(ThreadScheduler::start("recovery-monitor")?);
//! let registry = RecoveryRegistry::new(scheduler);
//!
//! let id = registry.start(shard, source, listener, Duration::from_secs(60))?;
//! if let Some(recovery) = registry.get(id) {
//!     recovery.write_temp_file_chunk("_0.cfs", &chunk)?;
//! }
//! registry.mark_as_done(id);
//! ```

use crate::config::RegistryConfig;
use crate::listener::RecoveryListener;
use crate::monitor::{Activity, RecoveryMonitor};
use crate::reference::RecoveryRef;
use crate::scheduler::{Scheduler, ThreadScheduler};
use crate::status::{AccessClock, RecoveryStatus};
use dashmap::DashMap;
use parking_lot::RwLock;
use recovery_core::{DiscoveryNode, FailureCause, RecoveryError, RecoveryId, Result, ShardId};
use recovery_shard::IndexShard;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::Span;

const TARGET: &str = "recovery::registry";

pub(crate) struct RegistryInner {
    recoveries: DashMap<RecoveryId, Arc<RecoveryStatus>>,
    id_generator: AtomicU64,
    admission: RwLock<()>,
    scheduler: Arc<dyn Scheduler>,
    config: RegistryConfig,
    clock: AccessClock,
    span: Span,
}

impl RegistryInner {
    pub(crate) fn span(&self) -> &Span {
        &self.span
    }

    pub(crate) fn scheduler(&self) -> &dyn Scheduler {
        self.scheduler.as_ref()
    }

    /// Fail the entry if its access time is still `last_seen`
    pub(crate) fn expire_if_idle(
        &self,
        recovery_id: RecoveryId,
        last_seen: u64,
        check_interval: Duration,
    ) -> Activity {
        let expired = self
            .recoveries
            .remove_if(&recovery_id, |_, status| status.last_access_time() == last_seen);
        if let Some((_, status)) = expired {
            tracing::debug!(
                target: TARGET,
                parent: &self.span,
                recovery_id = %recovery_id,
                shard_id = %status.shard_id(),
                interval = ?check_interval,
                "recovery timed out"
            );
            status.fail(FailureCause::Timeout(check_interval), true);
            return Activity::TimedOut;
        }
        match self.recoveries.get(&recovery_id) {
            Some(entry) => Activity::Active(entry.value().last_access_time()),
            None => Activity::Missing,
        }
    }

    fn remove_all_matching<F>(&self, mut matches: F) -> Vec<Arc<RecoveryStatus>>
    where
        F: FnMut(&RecoveryStatus) -> bool,
    {
        let _admission = self.admission.write();
        let mut removed = Vec::new();
        self.recoveries.retain(|_, status| {
            if matches(status) {
                removed.push(Arc::clone(status));
                false
            } else {
                true
            }
        });
        removed
    }

    fn cancel_all(&self, reason: &str) -> usize {
        let removed = self.remove_all_matching(|_| true);
        let mut cancelled = 0;
        for status in removed {
            tracing::debug!(
                target: TARGET,
                parent: &self.span,
                recovery_id = %status.recovery_id(),
                shard_id = %status.shard_id(),
                reason = %reason,
                "cancelling recovery"
            );
            if status.cancel(reason) {
                cancelled += 1;
            }
        }
        cancelled
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        let remaining = self.cancel_all("recovery registry closed");
        if remaining > 0 {
            tracing::debug!(
                target: TARGET,
                parent: &self.span,
                remaining,
                "cancelled ongoing recoveries on registry close"
            );
        }
    }
}

/// Registry of ongoing shard recoveries
///
/// Cheap to clone; clones share the same registry. When the last clone is
/// dropped every remaining recovery is cancelled.
#[derive(Clone)]
pub struct RecoveryRegistry {
    inner: Arc<RegistryInner>,
}

impl RecoveryRegistry {
    /// Create a registry with the default configuration and no parent span
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self::build(scheduler, RegistryConfig::default(), Span::none())
    }

    /// Create a registry with an explicit configuration and diagnostic span
    ///
    /// Every log event of the registry is emitted as a child of `span`.
    pub fn with_config(
        scheduler: Arc<dyn Scheduler>,
        config: RegistryConfig,
        span: Span,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(scheduler, config, span))
    }

    /// Create a registry backed by its own `ThreadScheduler`
    pub fn with_thread_scheduler(config: RegistryConfig, span: Span) -> Result<Self> {
        config.validate()?;
        let scheduler = Arc::new(ThreadScheduler::start(&config.scheduler_thread_name)?);
        Ok(Self::build(scheduler, config, span))
    }

    fn build(scheduler: Arc<dyn Scheduler>, config: RegistryConfig, span: Span) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                recoveries: DashMap::new(),
                id_generator: AtomicU64::new(1),
                admission: RwLock::new(()),
                scheduler,
                config,
                clock: AccessClock::new(),
                span,
            }),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    // ========================================================================
    // Start
    // ========================================================================

    /// Start tracking a recovery of `index_shard` from `source_node`
    ///
    /// The shard must already be marked as recovering. The recovery fails
    /// with a timeout if it is not accessed through `get` for
    /// `activity_timeout`.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the shard is not recovering
    /// - `StoreClosed` if the shard's store is closed
    /// - `SchedulerShutdown` if the monitor cannot be armed; nothing is
    ///   registered in that case
    pub fn start(
        &self,
        index_shard: Arc<IndexShard>,
        source_node: DiscoveryNode,
        listener: Arc<dyn RecoveryListener>,
        activity_timeout: Duration,
    ) -> Result<RecoveryId> {
        let recovery_id = RecoveryId::new(self.inner.id_generator.fetch_add(1, Ordering::Relaxed));
        let status = Arc::new(RecoveryStatus::new(
            recovery_id,
            index_shard,
            source_node,
            listener,
            self.inner.clock,
            &self.inner.config.temp_file_prefix,
        )?);
        let last_access_time = status.last_access_time();

        {
            let _admission = self.inner.admission.read();
            self.inner.recoveries.insert(recovery_id, Arc::clone(&status));
        }
        tracing::trace!(
            target: TARGET,
            parent: &self.inner.span,
            recovery_id = %recovery_id,
            shard_id = %status.shard_id(),
            source_node = %status.source_node(),
            timeout = ?activity_timeout,
            "started recovery"
        );

        let monitor = RecoveryMonitor::new(
            Arc::downgrade(&self.inner),
            recovery_id,
            activity_timeout,
            last_access_time,
        );
        if let Err(e) = monitor.schedule(self.inner.scheduler()) {
            let rolled_back = self
                .inner
                .recoveries
                .remove_if(&recovery_id, |_, current| Arc::ptr_eq(current, &status))
                .is_some();
            if rolled_back {
                status.cancellation().cancel("failed to arm recovery monitor");
                status.abandon();
            }
            tracing::warn!(
                target: TARGET,
                parent: &self.inner.span,
                recovery_id = %recovery_id,
                error = %e,
                "failed to arm recovery monitor"
            );
            return Err(e);
        }
        Ok(recovery_id)
    }

    /// `start` with the configured activity timeout
    pub fn start_with_default_timeout(
        &self,
        index_shard: Arc<IndexShard>,
        source_node: DiscoveryNode,
        listener: Arc<dyn RecoveryListener>,
    ) -> Result<RecoveryId> {
        let timeout = self.inner.config.activity_timeout();
        self.start(index_shard, source_node, listener, timeout)
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Acquire the ongoing recovery under `recovery_id`
    ///
    /// Returns `None` if there is no such recovery or it already finished.
    /// A successful lookup counts as activity for the inactivity monitor.
    pub fn get(&self, recovery_id: RecoveryId) -> Option<RecoveryRef> {
        let entry = self.inner.recoveries.get(&recovery_id)?;
        let reference = RecoveryRef::acquire(entry.value())?;
        reference.status().touch();
        Some(reference)
    }

    /// Like `get`, but fails if the recovery is missing or targets another
    /// shard
    pub fn get_safe(&self, recovery_id: RecoveryId, shard_id: &ShardId) -> Result<RecoveryRef> {
        let reference = self
            .get(recovery_id)
            .ok_or(RecoveryError::RecoveryNotFound { recovery_id })?;
        if reference.shard_id() != shard_id {
            return Err(RecoveryError::ShardMismatch {
                recovery_id,
                expected: shard_id.clone(),
                actual: reference.shard_id().clone(),
            });
        }
        Ok(reference)
    }

    /// Number of ongoing recoveries
    pub fn size(&self) -> usize {
        self.inner.recoveries.len()
    }

    /// Whether no recovery is ongoing
    pub fn is_empty(&self) -> bool {
        self.inner.recoveries.is_empty()
    }

    /// Ids of the ongoing recoveries of `shard_id`, ascending
    pub fn recovery_ids_for_shard(&self, shard_id: &ShardId) -> Vec<RecoveryId> {
        let mut ids: Vec<RecoveryId> = self
            .inner
            .recoveries
            .iter()
            .filter(|entry| entry.value().shard_id() == shard_id)
            .map(|entry| *entry.key())
            .collect();
        ids.sort();
        ids
    }

    // ========================================================================
    // Terminal transitions
    // ========================================================================

    /// Complete a recovery
    ///
    /// Moves the shard to post-recovery and notifies the listener. Returns
    /// false if the recovery is not ongoing.
    pub fn mark_as_done(&self, recovery_id: RecoveryId) -> bool {
        match self.inner.recoveries.remove(&recovery_id) {
            Some((_, status)) => {
                tracing::trace!(
                    target: TARGET,
                    parent: &self.inner.span,
                    recovery_id = %recovery_id,
                    shard_id = %status.shard_id(),
                    "marking recovery as done"
                );
                status.mark_as_done()
            }
            None => false,
        }
    }

    /// Fail a recovery
    ///
    /// Notifies the listener with `cause`, escalated according to
    /// `send_shard_failure`, and signals the cancellation set. Returns false
    /// if the recovery is not ongoing.
    pub fn fail(
        &self,
        recovery_id: RecoveryId,
        cause: FailureCause,
        send_shard_failure: bool,
    ) -> bool {
        match self.inner.recoveries.remove(&recovery_id) {
            Some((_, status)) => {
                tracing::warn!(
                    target: TARGET,
                    parent: &self.inner.span,
                    recovery_id = %recovery_id,
                    shard_id = %status.shard_id(),
                    cause = %cause,
                    send_shard_failure,
                    "failing recovery"
                );
                status.fail(cause, send_shard_failure)
            }
            None => false,
        }
    }

    /// Cancel a recovery
    ///
    /// Signals the cancellation set and notifies the listener without
    /// escalation. Returns false if the recovery is not ongoing.
    pub fn cancel(&self, recovery_id: RecoveryId, reason: &str) -> bool {
        match self.inner.recoveries.remove(&recovery_id) {
            Some((_, status)) => {
                tracing::debug!(
                    target: TARGET,
                    parent: &self.inner.span,
                    recovery_id = %recovery_id,
                    shard_id = %status.shard_id(),
                    reason = %reason,
                    "cancelling recovery"
                );
                status.cancel(reason)
            }
            None => false,
        }
    }

    /// Cancel every ongoing recovery of `shard_id`
    ///
    /// Returns whether at least one recovery was cancelled.
    pub fn cancel_for_shard(&self, shard_id: &ShardId, reason: &str) -> bool {
        let matched = self
            .inner
            .remove_all_matching(|status| status.shard_id() == shard_id);
        let mut cancelled = false;
        for status in matched {
            tracing::debug!(
                target: TARGET,
                parent: &self.inner.span,
                recovery_id = %status.recovery_id(),
                shard_id = %shard_id,
                reason = %reason,
                "cancelling recovery"
            );
            cancelled |= status.cancel(reason);
        }
        cancelled
    }

    /// Cancel every ongoing recovery
    ///
    /// Returns the number of recoveries cancelled.
    pub fn cancel_all(&self, reason: &str) -> usize {
        self.inner.cancel_all(reason)
    }

    // ========================================================================
    // Reset
    // ========================================================================

    /// Restart a recovery under the same id
    ///
    /// The new attempt shares store, index shard, cancellation set and
    /// listener with the current one and gets a fresh phase, access time and
    /// temp-file namespace. The superseded status stays usable for holders
    /// that acquired it earlier and closes when the last of them releases.
    /// No listener callback fires.
    ///
    /// # Errors
    ///
    /// - `RecoveryNotFound` if the recovery is not ongoing
    /// - `ShardMismatch` if it targets another shard
    /// - `InvalidState` if the shard is no longer recovering
    pub fn reset(&self, recovery_id: RecoveryId, shard_id: &ShardId) -> Result<()> {
        let superseded = {
            let mut entry = self
                .inner
                .recoveries
                .get_mut(&recovery_id)
                .ok_or(RecoveryError::RecoveryNotFound { recovery_id })?;
            let current = Arc::clone(entry.value());
            if current.shard_id() != shard_id {
                return Err(RecoveryError::ShardMismatch {
                    recovery_id,
                    expected: shard_id.clone(),
                    actual: current.shard_id().clone(),
                });
            }
            let fresh = current.index_shard()?.perform_recovery_restart_with(|| {
                let fresh = Arc::new(current.reset_copy()?);
                if !current.try_finish() {
                    fresh.abandon();
                    return Err(RecoveryError::ClosedStatus { recovery_id });
                }
                Ok(fresh)
            })?;
            *entry.value_mut() = fresh;
            current
        };
        superseded.dec_ref();

        tracing::debug!(
            target: TARGET,
            parent: &self.inner.span,
            recovery_id = %recovery_id,
            shard_id = %shard_id,
            "reset recovery"
        );
        Ok(())
    }
}

impl fmt::Debug for RecoveryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryRegistry")
            .field("size", &self.size())
            .field("config", &self.inner.config)
            .finish()
    }
}
