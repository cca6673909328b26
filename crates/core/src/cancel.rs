//! Cooperative cancellation shared by every attempt of one recovery
//!
//! A `CancellationSet` is created once per recovery and survives resets.
//! Code performing recovery I/O polls it (`check_for_cancel`, `execute`) or
//! registers hooks that abort blocking work (`on_cancel`). Nothing is ever
//! interrupted forcibly.

use crate::error::{RecoveryError, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

type CancelHook = Box<dyn FnOnce(&str) + Send>;

/// Shared, one-shot cancellation signal
pub struct CancellationSet {
    cancelled: AtomicBool,
    reason: Mutex<Option<String>>,
    hooks: Mutex<Vec<CancelHook>>,
}

impl CancellationSet {
    /// Create an untriggered set
    pub fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            reason: Mutex::new(None),
            hooks: Mutex::new(Vec::new()),
        }
    }

    /// Trigger cancellation
    ///
    /// Only the first call records its reason and runs the registered hooks.
    /// Returns whether this call triggered the set.
    pub fn cancel(&self, reason: &str) -> bool {
        {
            let mut slot = self.reason.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(reason.to_string());
        }
        self.cancelled.store(true, Ordering::Release);

        let hooks = std::mem::take(&mut *self.hooks.lock());
        tracing::debug!(
            target: "recovery::cancel",
            reason = %reason,
            hooks = hooks.len(),
            "cancellation triggered"
        );
        for hook in hooks {
            hook(reason);
        }
        true
    }

    /// Whether cancellation has been triggered
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Reason passed to the triggering `cancel` call
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// Fail with `RecoveryError::Cancelled` if cancellation was triggered
    pub fn check_for_cancel(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(RecoveryError::Cancelled {
                reason: self.reason().unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// Run `work` unless cancelled, and discard its result if cancellation
    /// happened while it ran
    pub fn execute<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.check_for_cancel()?;
        let result = work();
        self.check_for_cancel()?;
        result
    }

    /// Register a hook invoked with the reason when cancellation triggers
    ///
    /// If the set is already cancelled the hook runs immediately on the
    /// calling thread.
    pub fn on_cancel<F>(&self, hook: F)
    where
        F: FnOnce(&str) + Send + 'static,
    {
        {
            let mut hooks = self.hooks.lock();
            if !self.is_cancelled() {
                hooks.push(Box::new(hook));
                return;
            }
        }
        hook(&self.reason().unwrap_or_default());
    }
}

impl Default for CancellationSet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSet")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}
