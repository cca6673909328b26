//! Inactivity monitor for one recovery
//!
//! Armed by `start` with the recovery's activity timeout. Each run compares
//! the status's last access time with the one seen on the previous run:
//!
//! - unchanged: the recovery went silent; it is removed and failed with a
//!   timeout (escalated as a shard failure)
//! - changed: remember the new time and run again after another interval
//! - recovery gone (finished, cancelled) or registry dropped: stop
//!
//! The idle check and the removal are one atomic step on the map entry, and
//! `get` refreshes the access time under the same entry lock, so a timeout
//! never removes an entry that was accessed since the previous run.

use crate::registry::RegistryInner;
use crate::scheduler::Scheduler;
use recovery_core::{RecoveryId, Result};
use std::sync::Weak;
use std::time::Duration;

/// Outcome of one activity check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Activity {
    /// No entry under the id anymore
    Missing,
    /// Entry was idle and has been failed
    TimedOut,
    /// Entry was accessed; carries the latest access time
    Active(u64),
}

pub(crate) struct RecoveryMonitor {
    registry: Weak<RegistryInner>,
    recovery_id: RecoveryId,
    check_interval: Duration,
    last_seen_access_time: u64,
}

impl RecoveryMonitor {
    pub(crate) fn new(
        registry: Weak<RegistryInner>,
        recovery_id: RecoveryId,
        check_interval: Duration,
        last_seen_access_time: u64,
    ) -> Self {
        Self {
            registry,
            recovery_id,
            check_interval,
            last_seen_access_time,
        }
    }

    pub(crate) fn schedule(self, scheduler: &dyn Scheduler) -> Result<()> {
        let delay = self.check_interval;
        scheduler.schedule(delay, Box::new(move || self.run()))
    }

    fn run(mut self) {
        let registry = match self.registry.upgrade() {
            Some(registry) => registry,
            None => return,
        };

        match registry.expire_if_idle(
            self.recovery_id,
            self.last_seen_access_time,
            self.check_interval,
        ) {
            Activity::Missing => {
                tracing::trace!(
                    target: "recovery::monitor",
                    parent: registry.span(),
                    recovery_id = %self.recovery_id,
                    "no status found, shutting down monitor"
                );
            }
            Activity::TimedOut => {}
            Activity::Active(access_time) => {
                self.last_seen_access_time = access_time;
                tracing::trace!(
                    target: "recovery::monitor",
                    parent: registry.span(),
                    recovery_id = %self.recovery_id,
                    last_access_time = access_time,
                    "rescheduling activity check"
                );
                let recovery_id = self.recovery_id;
                if let Err(e) = self.schedule(registry.scheduler()) {
                    tracing::warn!(
                        target: "recovery::monitor",
                        parent: registry.span(),
                        recovery_id = %recovery_id,
                        error = %e,
                        "failed to reschedule activity check"
                    );
                }
            }
        }
    }
}
