//! Tier 1: Handle lifecycle and scoped references

use crate::test_utils::*;
use shard_recovery::{NoopListener, RecoveryError, RecoveryId, RecoveryPhase, ShardId};
use std::sync::Arc;

#[test]
fn test_start_get_cancel_end_to_end() {
    let (_scheduler, registry) = manual_registry();
    let shard = recovering_shard("index", 0);
    let (listener, rx) = channel_listener();

    let id = registry.start(shard.clone(), primary(), listener, HOUR).unwrap();
    {
        let recovery = registry.get(id).unwrap();
        assert_eq!(recovery.shard_id(), shard.shard_id());
        assert_eq!(recovery.source_node(), &primary());
        assert_eq!(recovery.target_node(), &replica_node());
    }

    assert!(registry.cancel(id, "test"));
    assert!(registry.get(id).is_none());
    assert_eq!(registry.size(), 0);
    assert_eq!(rx.try_iter().count(), 1);
}

#[test]
fn test_handles_are_never_reused() {
    let (_scheduler, registry) = manual_registry();
    let shard = recovering_shard("index", 0);
    let mut seen = Vec::new();
    for _ in 0..10 {
        let id = registry
            .start(shard.clone(), primary(), Arc::new(NoopListener), HOUR)
            .unwrap();
        assert!(registry.cancel(id, "cycle"));
        seen.push(id);
    }
    let mut unique = seen.clone();
    unique.dedup();
    assert_eq!(unique, seen);
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn test_get_safe_distinguishes_missing_and_mismatch() {
    let (_scheduler, registry) = manual_registry();
    let shard = recovering_shard("index", 3);
    let id = registry
        .start(shard.clone(), primary(), Arc::new(NoopListener), HOUR)
        .unwrap();

    let recovery = registry.get_safe(id, shard.shard_id()).unwrap();
    assert_eq!(recovery.recovery_id(), id);
    drop(recovery);

    match registry.get_safe(id, &ShardId::new("index", 4)) {
        Err(RecoveryError::ShardMismatch { expected, actual, .. }) => {
            assert_eq!(expected, ShardId::new("index", 4));
            assert_eq!(&actual, shard.shard_id());
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert!(matches!(
        registry.get_safe(RecoveryId::new(u64::MAX), shard.shard_id()),
        Err(RecoveryError::RecoveryNotFound { .. })
    ));
}

#[test]
fn test_scoped_reference_released_once() {
    let (_scheduler, registry) = manual_registry();
    let shard = recovering_shard("index", 0);
    let id = registry
        .start(shard.clone(), primary(), Arc::new(NoopListener), HOUR)
        .unwrap();

    let mut recovery = registry.get(id).unwrap();
    assert_eq!(recovery.ref_count(), 2);
    recovery.close();
    recovery.close();
    assert!(recovery.is_released());
    assert_eq!(recovery.ref_count(), 1);
    drop(recovery);

    let recovery = registry.get(id).unwrap();
    assert_eq!(recovery.ref_count(), 2);
}

#[test]
fn test_reference_outlives_cancellation() {
    let (_scheduler, registry) = manual_registry();
    let shard = recovering_shard("index", 0);
    let id = registry
        .start(shard.clone(), primary(), Arc::new(NoopListener), HOUR)
        .unwrap();

    let recovery = registry.get(id).unwrap();
    let temp = recovery.write_temp_file_chunk("_0.si", b"segment info").unwrap();
    assert!(registry.cancel(id, "shard closed"));

    assert_eq!(recovery.phase(), RecoveryPhase::Cancelled);
    assert!(recovery.cancellation().is_cancelled());
    assert!(recovery.cancellation().check_for_cancel().is_err());
    assert!(recovery.store().is_ok());
    assert!(shard.store().contains(&temp));

    drop(recovery);
    assert!(!shard.store().contains(&temp));
    assert_eq!(shard.store().ref_count(), 1);
    assert_eq!(shard.recovery_stats().current_as_target(), 0);
}

#[test]
fn test_mark_as_done_renames_and_finishes() {
    let (_scheduler, registry) = manual_registry();
    let shard = recovering_shard("index", 0);
    let (listener, rx) = channel_listener();
    let id = registry.start(shard.clone(), primary(), listener, HOUR).unwrap();

    {
        let recovery = registry.get(id).unwrap();
        assert!(recovery.mark_running());
        recovery.write_temp_file_chunk("_0.cfs", b"abc").unwrap();
        recovery.write_temp_file_chunk("_0.cfs", b"def").unwrap();
        recovery.rename_all_temp_files().unwrap();
    }
    assert!(registry.mark_as_done(id));

    let outcome = rx.try_recv().unwrap();
    assert!(outcome.is_done());
    assert_eq!(outcome.recovery_id(), id);
    assert_eq!(shard.store().read_file("_0.cfs").unwrap(), b"abcdef");
    assert_eq!(shard.store().list_all(), vec!["_0.cfs".to_string()]);
    shard.start().unwrap();
}

#[test]
fn test_start_requires_recovering_shard() {
    let (_scheduler, registry) = manual_registry();
    let shard = recovering_shard("index", 0);
    shard.post_recovery("already recovered").unwrap();

    let err = registry
        .start(shard, primary(), Arc::new(NoopListener), HOUR)
        .unwrap_err();
    assert!(matches!(err, RecoveryError::InvalidState { .. }));
    assert!(registry.is_empty());
}
