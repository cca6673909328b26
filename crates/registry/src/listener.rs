//! Recovery outcome listeners
//!
//! Exactly one of `on_recovery_done` / `on_recovery_failure` is invoked per
//! recovery id, on the thread that detected the outcome. A reset is not an
//! outcome and invokes nothing.
//!
//! Callbacks run while the registry still holds its reference on the status,
//! so resource accessors remain usable inside the callback.

use crate::status::RecoveryStatus;
use parking_lot::Mutex;
use recovery_core::{RecoveryFailedError, RecoveryId, ShardId};
use std::sync::mpsc;

/// Receives the terminal outcome of a recovery
pub trait RecoveryListener: Send + Sync {
    /// Recovery completed successfully
    fn on_recovery_done(&self, status: &RecoveryStatus);

    /// Recovery failed, timed out or was cancelled
    ///
    /// `send_shard_failure` tells the caller whether the failure should also
    /// be reported as a shard failure to the rest of the cluster.
    fn on_recovery_failure(
        &self,
        status: &RecoveryStatus,
        error: RecoveryFailedError,
        send_shard_failure: bool,
    );
}

/// Tagged outcome delivered by `ChannelListener`
#[derive(Debug)]
pub enum RecoveryOutcome {
    /// Recovery completed
    Done {
        /// Recovery id
        recovery_id: RecoveryId,
        /// Recovered shard
        shard_id: ShardId,
    },
    /// Recovery failed
    Failed {
        /// Recovery id
        recovery_id: RecoveryId,
        /// Shard that was recovering
        shard_id: ShardId,
        /// Failure details
        error: RecoveryFailedError,
        /// Whether to escalate as a shard failure
        send_shard_failure: bool,
    },
}

impl RecoveryOutcome {
    /// Recovery this outcome belongs to
    pub fn recovery_id(&self) -> RecoveryId {
        match self {
            RecoveryOutcome::Done { recovery_id, .. } => *recovery_id,
            RecoveryOutcome::Failed { recovery_id, .. } => *recovery_id,
        }
    }

    /// Whether the recovery completed successfully
    pub fn is_done(&self) -> bool {
        matches!(self, RecoveryOutcome::Done { .. })
    }
}

/// Listener forwarding outcomes over a channel
///
/// Outcomes sent after the receiver is dropped are discarded.
pub struct ChannelListener {
    sender: Mutex<mpsc::Sender<RecoveryOutcome>>,
}

impl ChannelListener {
    /// Create a listener and the receiving end of its channel
    pub fn new() -> (Self, mpsc::Receiver<RecoveryOutcome>) {
        let (sender, receiver) = mpsc::channel();
        (
            Self {
                sender: Mutex::new(sender),
            },
            receiver,
        )
    }

    fn send(&self, outcome: RecoveryOutcome) {
        let recovery_id = outcome.recovery_id();
        if self.sender.lock().send(outcome).is_err() {
            tracing::trace!(
                target: "recovery::listener",
                recovery_id = %recovery_id,
                "outcome receiver dropped"
            );
        }
    }
}

impl RecoveryListener for ChannelListener {
    fn on_recovery_done(&self, status: &RecoveryStatus) {
        self.send(RecoveryOutcome::Done {
            recovery_id: status.recovery_id(),
            shard_id: status.shard_id().clone(),
        });
    }

    fn on_recovery_failure(
        &self,
        status: &RecoveryStatus,
        error: RecoveryFailedError,
        send_shard_failure: bool,
    ) {
        self.send(RecoveryOutcome::Failed {
            recovery_id: status.recovery_id(),
            shard_id: status.shard_id().clone(),
            error,
            send_shard_failure,
        });
    }
}

/// Listener that ignores every outcome
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl RecoveryListener for NoopListener {
    fn on_recovery_done(&self, _status: &RecoveryStatus) {}

    fn on_recovery_failure(
        &self,
        _status: &RecoveryStatus,
        _error: RecoveryFailedError,
        _send_shard_failure: bool,
    ) {
    }
}
