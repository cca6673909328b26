//! Scoped access to a recovery status
//!
//! A `RecoveryRef` holds one reference on the status it was acquired for.
//! The reference is released exactly once, on `close` or on drop, whichever
//! comes first. While held, the status stays open even if the registry
//! cancels, fails or resets the recovery in the meantime.

use crate::status::RecoveryStatus;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Guard over a live recovery status
pub struct RecoveryRef {
    status: Arc<RecoveryStatus>,
    released: bool,
}

impl RecoveryRef {
    /// Take a reference unless the status is already closed
    pub(crate) fn acquire(status: &Arc<RecoveryStatus>) -> Option<Self> {
        if status.try_inc_ref() {
            Some(Self {
                status: Arc::clone(status),
                released: false,
            })
        } else {
            None
        }
    }

    /// The wrapped status
    ///
    /// Remains reachable after `close`, but its resource accessors then fail
    /// with `ClosedStatus` once no other reference keeps it open.
    pub fn status(&self) -> &RecoveryStatus {
        &self.status
    }

    /// Whether both guards wrap the same status object
    pub fn same_status(&self, other: &RecoveryRef) -> bool {
        Arc::ptr_eq(&self.status, &other.status)
    }

    /// Release the reference early
    pub fn close(&mut self) {
        if !self.released {
            self.released = true;
            self.status.dec_ref();
        }
    }

    /// Whether this guard has released its reference
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Deref for RecoveryRef {
    type Target = RecoveryStatus;

    fn deref(&self) -> &RecoveryStatus {
        &self.status
    }
}

impl Drop for RecoveryRef {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for RecoveryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryRef")
            .field("recovery_id", &self.status.recovery_id())
            .field("released", &self.released)
            .finish()
    }
}
