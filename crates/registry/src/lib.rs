//! Registry of ongoing shard recoveries
//!
//! Tracks every in-flight recovery on a node by `RecoveryId`:
//! - `RecoveryRegistry`: start, look up, reset, complete, fail and cancel
//! - `RecoveryStatus`: per-attempt state with its own reference count
//! - `RecoveryRef`: scoped reference that keeps a status open while held
//! - `RecoveryListener`: receives exactly one terminal outcome per recovery
//! - `Scheduler`: delayed execution driving the inactivity monitors
//!
//! # Design
//!
//! The registry never blocks on I/O and never calls a listener while holding
//! one of its own locks. Inactivity detection is done by one self-rescheduling
//! monitor task per recovery; a recovery that is not accessed for its activity
//! timeout is failed and reported as a shard failure.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod listener;
mod monitor;
pub mod reference;
pub mod registry;
pub mod scheduler;
pub mod status;

pub use config::RegistryConfig;
pub use listener::{ChannelListener, NoopListener, RecoveryListener, RecoveryOutcome};
pub use reference::RecoveryRef;
pub use registry::RecoveryRegistry;
pub use scheduler::{ManualScheduler, Scheduler, Task, ThreadScheduler};
pub use status::RecoveryStatus;
