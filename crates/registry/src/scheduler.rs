//! Delayed task execution for recovery monitors
//!
//! The registry never spawns timers on its own; it is handed a `Scheduler`
//! at construction. Two implementations ship with the crate:
//!
//! - `ThreadScheduler`: one named background thread running tasks in
//!   deadline order. Used in production.
//! - `ManualScheduler`: virtual time advanced explicitly by the caller. Used
//!   by tests and by embedders that drive time themselves.

use parking_lot::{Condvar, Mutex};
use recovery_core::{RecoveryError, Result};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Delays longer than this are clamped; the task then effectively never runs
/// unless the scheduler is shut down first
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// A unit of delayed work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks after a delay
pub trait Scheduler: Send + Sync {
    /// Run `task` once `delay` has elapsed
    ///
    /// Fails with `SchedulerShutdown` if the scheduler no longer accepts work.
    fn schedule(&self, delay: Duration, task: Task) -> Result<()>;
}

// ============================================================================
// Scheduled entries
// ============================================================================

/// Heap entry ordered by deadline, then by submission order
struct Scheduled<D> {
    deadline: D,
    seq: u64,
    task: Task,
}

impl<D: Ord> PartialEq for Scheduled<D> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<D: Ord> Eq for Scheduled<D> {}

impl<D: Ord> PartialOrd for Scheduled<D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<D: Ord> Ord for Scheduled<D> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

fn run_task(task: Task) {
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        tracing::error!(target: "recovery::scheduler", "scheduled task panicked");
    }
}

// ============================================================================
// ThreadScheduler
// ============================================================================

struct TimerQueue {
    entries: BinaryHeap<Reverse<Scheduled<Instant>>>,
    next_seq: u64,
    shutdown: bool,
}

struct TimerShared {
    queue: Mutex<TimerQueue>,
    wakeup: Condvar,
}

/// Scheduler backed by a single background thread
///
/// Tasks run one at a time in deadline order; ties run in submission order.
/// A panicking task is logged and does not stop the thread. Dropping the
/// scheduler stops the thread and discards pending tasks.
pub struct ThreadScheduler {
    shared: Arc<TimerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadScheduler {
    /// Spawn the background thread under `thread_name`
    pub fn start(thread_name: &str) -> std::io::Result<Self> {
        let shared = Arc::new(TimerShared {
            queue: Mutex::new(TimerQueue {
                entries: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || Self::run(worker_shared))?;
        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    fn run(shared: Arc<TimerShared>) {
        loop {
            let task = {
                let mut queue = shared.queue.lock();
                loop {
                    if queue.shutdown {
                        return;
                    }
                    let next_deadline = queue.entries.peek().map(|entry| entry.0.deadline);
                    match next_deadline {
                        None => {
                            shared.wakeup.wait(&mut queue);
                        }
                        Some(deadline) if deadline <= Instant::now() => {
                            if let Some(Reverse(entry)) = queue.entries.pop() {
                                break entry.task;
                            }
                        }
                        Some(deadline) => {
                            shared.wakeup.wait_until(&mut queue, deadline);
                        }
                    }
                }
            };
            run_task(task);
        }
    }

    /// Number of tasks waiting to run
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().entries.len()
    }

    /// Stop accepting tasks, discard pending ones and join the thread
    ///
    /// Safe to call more than once, and from a task running on the
    /// scheduler thread (the thread is then not joined).
    pub fn shutdown(&self) {
        let discarded = {
            let mut queue = self.shared.queue.lock();
            queue.shutdown = true;
            let discarded = queue.entries.len();
            queue.entries.clear();
            discarded
        };
        self.shared.wakeup.notify_all();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                tracing::warn!(target: "recovery::scheduler", "scheduler thread panicked");
            }
            tracing::debug!(target: "recovery::scheduler", discarded, "scheduler stopped");
        }
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> Result<()> {
        {
            let mut queue = self.shared.queue.lock();
            if queue.shutdown {
                return Err(RecoveryError::SchedulerShutdown);
            }
            let seq = queue.next_seq;
            queue.next_seq += 1;
            queue.entries.push(Reverse(Scheduled {
                deadline: deadline_after(Instant::now(), delay),
                seq,
                task,
            }));
        }
        self.shared.wakeup.notify_one();
        Ok(())
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ThreadScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

// ============================================================================
// ManualScheduler
// ============================================================================

struct ManualState {
    now: Duration,
    entries: BinaryHeap<Reverse<Scheduled<Duration>>>,
    next_seq: u64,
    shutdown: bool,
}

/// Scheduler driven by explicit calls to `advance`
///
/// Tasks run on the thread calling `advance`/`run_due`. Tasks scheduled by a
/// running task are picked up in the same call if already due.
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    /// Create a scheduler at virtual time zero
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: Duration::ZERO,
                entries: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
        }
    }

    /// Current virtual time
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Number of tasks waiting to run
    pub fn pending(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Move virtual time forward and run every task that became due
    ///
    /// Returns the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = {
            let mut state = self.state.lock();
            state.now = state.now.saturating_add(by);
            state.now
        };
        let mut ran = 0;
        loop {
            let task = {
                let mut state = self.state.lock();
                let due = state
                    .entries
                    .peek()
                    .map_or(false, |entry| entry.0.deadline <= target);
                if due {
                    state.entries.pop().map(|entry| entry.0.task)
                } else {
                    None
                }
            };
            match task {
                Some(task) => {
                    run_task(task);
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Run tasks that are already due without moving time
    pub fn run_due(&self) -> usize {
        self.advance(Duration::ZERO)
    }

    /// Reject further tasks and discard pending ones
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        state.entries.clear();
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> Result<()> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Err(RecoveryError::SchedulerShutdown);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        let deadline = state.now.saturating_add(delay);
        state.entries.push(Reverse(Scheduled {
            deadline,
            seq,
            task,
        }));
        Ok(())
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ManualScheduler")
            .field("now", &state.now)
            .field("pending", &state.entries.len())
            .finish()
    }
}
