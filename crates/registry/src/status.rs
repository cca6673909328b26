//! State of a single recovery attempt
//!
//! A `RecoveryStatus` is reference counted on its own, independently of the
//! `Arc` that keeps the memory alive:
//!
//! - the registry holds one reference from creation until the attempt
//!   finishes (done, failed, cancelled) or is superseded by a reset
//! - every `RecoveryRef` handed out by the registry holds one more
//!
//! When the count reaches zero the status closes: leftover temp files are
//! deleted, the shard's `current_as_target` stat is decremented and the store
//! reference is released. From then on resource accessors fail with
//! `ClosedStatus`.
//!
//! # Reset
//!
//! `reset_copy` builds a new status for the same recovery id that shares the
//! store, index shard, cancellation set and listener with the old one, but
//! has a fresh phase, access time and temp-file namespace.

use crate::listener::RecoveryListener;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use recovery_core::{
    CancellationSet, DiscoveryNode, FailureCause, IndexShardState, RecoveryError,
    RecoveryFailedError, RecoveryId, RecoveryPhase, RecoveryType, Result, ShardId,
};
use recovery_shard::{IndexShard, Store};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

// ============================================================================
// AccessClock
// ============================================================================

/// Monotonic nanosecond clock shared by a registry and its statuses
#[derive(Debug, Clone, Copy)]
pub(crate) struct AccessClock {
    epoch: Instant,
}

impl AccessClock {
    pub(crate) fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub(crate) fn now_nanos(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

// ============================================================================
// Temp files
// ============================================================================

/// Temp-file namespace of one attempt: `{base}{uuid}.{original}`
struct TempFiles {
    base: String,
    prefix: String,
    /// temp name -> original name
    issued: Mutex<FxHashMap<String, String>>,
}

impl TempFiles {
    fn new(base: &str) -> Self {
        Self {
            base: base.to_string(),
            prefix: format!("{}{}.", base, Uuid::new_v4()),
            issued: Mutex::new(FxHashMap::default()),
        }
    }

    fn name_for(&self, original: &str) -> String {
        format!("{}{}", self.prefix, original)
    }
}

/// Releases the registry's reference on every exit path of a terminal
/// transition, including a panicking listener
struct FinalRelease<'a>(&'a RecoveryStatus);

impl Drop for FinalRelease<'_> {
    fn drop(&mut self) {
        self.0.dec_ref();
    }
}

// ============================================================================
// RecoveryStatus
// ============================================================================

/// Mutable state of one recovery attempt
pub struct RecoveryStatus {
    recovery_id: RecoveryId,
    shard_id: ShardId,
    recovery_type: RecoveryType,
    source_node: DiscoveryNode,
    target_node: DiscoveryNode,
    index_shard: Arc<IndexShard>,
    store: Arc<Store>,
    cancellation: Arc<CancellationSet>,
    listener: Arc<dyn RecoveryListener>,
    clock: AccessClock,
    started_at: DateTime<Utc>,
    last_access_time: AtomicU64,
    phase: AtomicU8,
    ref_count: AtomicUsize,
    finished: AtomicBool,
    temp_files: TempFiles,
}

impl RecoveryStatus {
    /// Create the first attempt of a recovery
    ///
    /// The shard must be `Recovering` and carry recovery metadata. Takes one
    /// store reference and bumps `current_as_target`.
    pub(crate) fn new(
        recovery_id: RecoveryId,
        index_shard: Arc<IndexShard>,
        source_node: DiscoveryNode,
        listener: Arc<dyn RecoveryListener>,
        clock: AccessClock,
        temp_file_prefix: &str,
    ) -> Result<Self> {
        let state = index_shard.state();
        let info = match index_shard.recovery_info() {
            Some(info) if state == IndexShardState::Recovering => info,
            _ => {
                return Err(RecoveryError::InvalidState {
                    shard_id: index_shard.shard_id().clone(),
                    state,
                })
            }
        };
        let store = Arc::clone(index_shard.store());
        store.inc_ref()?;
        index_shard.recovery_stats().inc_current_as_target();

        Ok(Self {
            recovery_id,
            shard_id: index_shard.shard_id().clone(),
            recovery_type: info.recovery_type,
            source_node,
            target_node: info.target_node,
            index_shard,
            store,
            cancellation: Arc::new(CancellationSet::new()),
            listener,
            clock,
            started_at: Utc::now(),
            last_access_time: AtomicU64::new(clock.now_nanos()),
            phase: AtomicU8::new(RecoveryPhase::Initializing as u8),
            ref_count: AtomicUsize::new(1),
            finished: AtomicBool::new(false),
            temp_files: TempFiles::new(temp_file_prefix),
        })
    }

    /// Create the next attempt of this recovery, sharing its resources
    pub(crate) fn reset_copy(&self) -> Result<Self> {
        self.ensure_ref_count()?;
        self.store.inc_ref()?;
        self.index_shard.recovery_stats().inc_current_as_target();

        Ok(Self {
            recovery_id: self.recovery_id,
            shard_id: self.shard_id.clone(),
            recovery_type: self.recovery_type,
            source_node: self.source_node.clone(),
            target_node: self.target_node.clone(),
            index_shard: Arc::clone(&self.index_shard),
            store: Arc::clone(&self.store),
            cancellation: Arc::clone(&self.cancellation),
            listener: Arc::clone(&self.listener),
            clock: self.clock,
            started_at: Utc::now(),
            last_access_time: AtomicU64::new(
                self.clock
                    .now_nanos()
                    .max(self.last_access_time().saturating_add(1)),
            ),
            phase: AtomicU8::new(RecoveryPhase::Initializing as u8),
            ref_count: AtomicUsize::new(1),
            finished: AtomicBool::new(false),
            temp_files: TempFiles::new(&self.temp_files.base),
        })
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// Recovery id; identical across resets
    pub fn recovery_id(&self) -> RecoveryId {
        self.recovery_id
    }

    /// Shard being recovered
    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    /// Kind of recovery
    pub fn recovery_type(&self) -> RecoveryType {
        self.recovery_type
    }

    /// Node data is pulled from
    pub fn source_node(&self) -> &DiscoveryNode {
        &self.source_node
    }

    /// Node the shard lives on
    pub fn target_node(&self) -> &DiscoveryNode {
        &self.target_node
    }

    /// Wall-clock creation time of this attempt
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    // ========================================================================
    // Activity and phase
    // ========================================================================

    /// Monotonic nanoseconds of the last acquisition through the registry
    pub fn last_access_time(&self) -> u64 {
        self.last_access_time.load(Ordering::Acquire)
    }

    /// Record an access
    ///
    /// Every call strictly increases the stored time, so the monitor can
    /// never confuse two accesses within one clock tick with inactivity.
    pub(crate) fn touch(&self) {
        let now = self.clock.now_nanos();
        let _ = self
            .last_access_time
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |previous| {
                Some(now.max(previous.saturating_add(1)))
            });
    }

    /// Current phase
    pub fn phase(&self) -> RecoveryPhase {
        RecoveryPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: RecoveryPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// Move from `Initializing` to `Running`
    ///
    /// Returns false if the attempt was not initializing.
    pub fn mark_running(&self) -> bool {
        self.phase
            .compare_exchange(
                RecoveryPhase::Initializing as u8,
                RecoveryPhase::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    // ========================================================================
    // Shared resources
    // ========================================================================

    /// Cancellation set shared by every attempt of this recovery
    ///
    /// Stays readable after close so late holders can observe cancellation.
    pub fn cancellation(&self) -> &Arc<CancellationSet> {
        &self.cancellation
    }

    /// Shard store
    pub fn store(&self) -> Result<&Arc<Store>> {
        self.ensure_ref_count()?;
        Ok(&self.store)
    }

    /// Index shard being recovered
    pub fn index_shard(&self) -> Result<&Arc<IndexShard>> {
        self.ensure_ref_count()?;
        Ok(&self.index_shard)
    }

    // ========================================================================
    // Temp files
    // ========================================================================

    /// Temp name for `original` within this attempt's namespace
    pub fn temp_name_for_file(&self, original: &str) -> String {
        self.temp_files.name_for(original)
    }

    /// Append a chunk to the temp file standing in for `original`
    ///
    /// Returns the temp file name.
    pub fn write_temp_file_chunk(&self, original: &str, chunk: &[u8]) -> Result<String> {
        self.ensure_ref_count()?;
        let temp_name = self.temp_files.name_for(original);
        self.store.append_file(&temp_name, chunk)?;
        self.temp_files
            .issued
            .lock()
            .insert(temp_name.clone(), original.to_string());
        Ok(temp_name)
    }

    /// Number of temp files written and not yet renamed
    pub fn pending_temp_files(&self) -> usize {
        self.temp_files.issued.lock().len()
    }

    /// Rename every written temp file to its original name
    pub fn rename_all_temp_files(&self) -> Result<()> {
        self.ensure_ref_count()?;
        let issued = std::mem::take(&mut *self.temp_files.issued.lock());
        for (temp_name, original) in &issued {
            self.store.rename(temp_name, original)?;
        }
        Ok(())
    }

    // ========================================================================
    // Reference counting
    // ========================================================================

    /// Number of outstanding references (registry + holders)
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Whether the last reference has been released
    pub fn is_closed(&self) -> bool {
        self.ref_count() == 0
    }

    /// Whether this attempt has finished or been superseded
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn ensure_ref_count(&self) -> Result<()> {
        if self.is_closed() {
            return Err(RecoveryError::ClosedStatus {
                recovery_id: self.recovery_id,
            });
        }
        Ok(())
    }

    pub(crate) fn try_inc_ref(&self) -> bool {
        self.ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                if count == 0 {
                    None
                } else {
                    Some(count + 1)
                }
            })
            .is_ok()
    }

    pub(crate) fn dec_ref(&self) {
        let previous = self
            .ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));
        match previous {
            Ok(1) => self.close_internal(),
            Ok(_) => {}
            Err(_) => tracing::warn!(
                target: "recovery::status",
                recovery_id = %self.recovery_id,
                "recovery status released after close"
            ),
        }
    }

    fn close_internal(&self) {
        let leftovers: Vec<String> = self
            .temp_files
            .issued
            .lock()
            .drain()
            .map(|(temp_name, _)| temp_name)
            .collect();
        if !leftovers.is_empty() {
            self.store.delete_quiet(leftovers.iter().map(String::as_str));
        }
        self.index_shard.recovery_stats().dec_current_as_target();
        self.store.dec_ref();
        tracing::trace!(
            target: "recovery::status",
            recovery_id = %self.recovery_id,
            shard_id = %self.shard_id,
            temp_files_deleted = leftovers.len(),
            "recovery status closed"
        );
    }

    // ========================================================================
    // Terminal transitions (driven by the registry only)
    // ========================================================================

    /// Claim the single terminal transition of this attempt
    pub(crate) fn try_finish(&self) -> bool {
        self.finished
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn failure(&self, cause: FailureCause) -> RecoveryFailedError {
        RecoveryFailedError::new(
            self.shard_id.clone(),
            self.source_node.clone(),
            self.target_node.clone(),
            cause,
        )
    }

    /// Complete the recovery and notify the listener
    ///
    /// If the shard refuses the post-recovery transition the attempt is
    /// failed instead, so the listener still hears exactly once.
    pub(crate) fn mark_as_done(&self) -> bool {
        if !self.try_finish() {
            return false;
        }
        let _release = FinalRelease(self);

        if let Err(e) = self.index_shard.post_recovery("peer recovery done") {
            tracing::warn!(
                target: "recovery::status",
                recovery_id = %self.recovery_id,
                shard_id = %self.shard_id,
                error = %e,
                "post recovery failed"
            );
            self.set_phase(RecoveryPhase::Failed);
            self.cancellation
                .cancel(&format!("failed recovery [{}]", e));
            self.listener
                .on_recovery_failure(self, self.failure(FailureCause::Other(e.to_string())), true);
            return true;
        }

        let pending = self.pending_temp_files();
        if pending > 0 {
            tracing::warn!(
                target: "recovery::status",
                recovery_id = %self.recovery_id,
                pending,
                "recovery done with temp files not renamed"
            );
        }
        self.set_phase(RecoveryPhase::Done);
        self.listener.on_recovery_done(self);
        true
    }

    /// Fail the recovery and notify the listener
    pub(crate) fn fail(&self, cause: FailureCause, send_shard_failure: bool) -> bool {
        if !self.try_finish() {
            return false;
        }
        let _release = FinalRelease(self);

        self.set_phase(RecoveryPhase::Failed);
        self.cancellation
            .cancel(&format!("failed recovery [{}]", cause));
        self.listener
            .on_recovery_failure(self, self.failure(cause), send_shard_failure);
        true
    }

    /// Cancel the recovery and notify the listener without escalation
    pub(crate) fn cancel(&self, reason: &str) -> bool {
        if !self.try_finish() {
            return false;
        }
        let _release = FinalRelease(self);

        self.set_phase(RecoveryPhase::Cancelled);
        self.cancellation.cancel(reason);
        self.listener.on_recovery_failure(
            self,
            self.failure(FailureCause::Cancelled(reason.to_string())),
            false,
        );
        true
    }

    /// Drop the registry's reference without any side effect on shared
    /// resources or the listener
    pub(crate) fn abandon(&self) -> bool {
        if !self.try_finish() {
            return false;
        }
        self.dec_ref();
        true
    }
}

impl fmt::Debug for RecoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryStatus")
            .field("recovery_id", &self.recovery_id)
            .field("shard_id", &self.shard_id)
            .field("recovery_type", &self.recovery_type)
            .field("source_node", &self.source_node)
            .field("target_node", &self.target_node)
            .field("phase", &self.phase())
            .field("ref_count", &self.ref_count())
            .field("finished", &self.is_finished())
            .finish()
    }
}
