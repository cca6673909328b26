//! Tier 3: Cancellation completeness

use crate::test_utils::*;
use parking_lot::Mutex;
use shard_recovery::{
    NoopListener, RecoveryFailedError, RecoveryListener, RecoveryStatus, ShardId,
};
use std::sync::Arc;

/// Records the reason of every failure callback
#[derive(Default)]
struct RecordingListener {
    failures: Mutex<Vec<(String, bool)>>,
}

impl RecoveryListener for RecordingListener {
    fn on_recovery_done(&self, _status: &RecoveryStatus) {}

    fn on_recovery_failure(
        &self,
        _status: &RecoveryStatus,
        error: RecoveryFailedError,
        send_shard_failure: bool,
    ) {
        self.failures
            .lock()
            .push((error.cause.to_string(), send_shard_failure));
    }
}

#[test]
fn test_cancel_for_shard_removes_every_entry_of_the_shard() {
    let (_scheduler, registry) = manual_registry();
    let target = recovering_shard("logs", 0);
    let bystander = recovering_shard("logs", 1);
    let listener = Arc::new(RecordingListener::default());

    let ids: Vec<_> = (0..4)
        .map(|_| {
            registry
                .start(target.clone(), primary(), listener.clone(), HOUR)
                .unwrap()
        })
        .collect();
    let other = registry
        .start(bystander.clone(), primary(), Arc::new(NoopListener), HOUR)
        .unwrap();

    assert!(registry.cancel_for_shard(target.shard_id(), "shard closed"));
    assert!(registry.recovery_ids_for_shard(target.shard_id()).is_empty());
    for id in &ids {
        assert!(registry.get(*id).is_none());
    }
    assert_eq!(registry.size(), 1);
    assert!(registry.get(other).is_some());

    let failures = listener.failures.lock();
    assert_eq!(failures.len(), 4);
    assert!(failures
        .iter()
        .all(|(reason, escalate)| reason.contains("shard closed") && !escalate));
    assert_eq!(target.recovery_stats().current_as_target(), 0);
}

#[test]
fn test_cancel_for_unknown_shard_is_noop() {
    let (_scheduler, registry) = manual_registry();
    registry
        .start(recovering_shard("a", 0), primary(), Arc::new(NoopListener), HOUR)
        .unwrap();
    assert!(!registry.cancel_for_shard(&ShardId::new("b", 0), "nothing"));
    assert_eq!(registry.size(), 1);
}

#[test]
fn test_cancel_all_reports_count() {
    let (_scheduler, registry) = manual_registry();
    let listener = Arc::new(RecordingListener::default());
    for n in 0..3 {
        registry
            .start(recovering_shard("index", n), primary(), listener.clone(), HOUR)
            .unwrap();
    }
    assert_eq!(registry.cancel_all("node shutting down"), 3);
    assert!(registry.is_empty());
    assert_eq!(registry.cancel_all("again"), 0);
    assert_eq!(listener.failures.lock().len(), 3);
}

#[test]
fn test_cancellation_signal_reaches_running_work() {
    let (_scheduler, registry) = manual_registry();
    let id = registry
        .start(recovering_shard("index", 0), primary(), Arc::new(NoopListener), HOUR)
        .unwrap();
    let recovery = registry.get(id).unwrap();
    let token = Arc::clone(recovery.cancellation());

    let observed = Arc::new(Mutex::new(None));
    let sink = observed.clone();
    token.on_cancel(move |reason| *sink.lock() = Some(reason.to_string()));

    assert!(registry.cancel(id, "operator request"));
    assert_eq!(observed.lock().as_deref(), Some("operator request"));
    let err = token.execute(|| Ok(())).unwrap_err();
    assert!(err.is_cancelled());
}

#[test]
fn test_dropping_last_registry_clone_cancels() {
    let (_scheduler, registry) = manual_registry();
    let shard = recovering_shard("index", 0);
    let listener = Arc::new(RecordingListener::default());
    let clone = registry.clone();
    registry
        .start(shard.clone(), primary(), listener.clone(), HOUR)
        .unwrap();

    drop(registry);
    assert_eq!(clone.size(), 1);
    drop(clone);

    let failures = listener.failures.lock();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].0.contains("recovery registry closed"));
    assert_eq!(shard.store().ref_count(), 1);
}
