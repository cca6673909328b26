//! Tier 4: Reset identity and reference counting

use crate::test_utils::*;
use shard_recovery::{NoopListener, RecoveryError, RecoveryPhase};
use std::sync::Arc;

#[test]
fn test_reset_preserves_resources_and_changes_generation() {
    let (_scheduler, registry) = manual_registry();
    let shard = recovering_shard("index", 0);
    let (listener, rx) = channel_listener();
    let id = registry.start(shard.clone(), primary(), listener, HOUR).unwrap();

    let store_refs_before = shard.store().ref_count();
    assert_eq!(shard.recovery_stats().current_as_target(), 1);

    let mut old = registry.get(id).unwrap();
    let old_temp_name = old.temp_name_for_file("foobar");
    let old_store = Arc::clone(old.store().unwrap());
    let old_shard = Arc::clone(old.index_shard().unwrap());
    let old_token = Arc::clone(old.cancellation());

    registry.reset(id, shard.shard_id()).unwrap();

    let new = registry.get(id).unwrap();
    assert!(!old.same_status(&new));
    assert_eq!(new.recovery_id(), id);
    assert!(Arc::ptr_eq(&old_store, new.store().unwrap()));
    assert!(Arc::ptr_eq(&old_shard, new.index_shard().unwrap()));
    assert!(Arc::ptr_eq(&old_token, new.cancellation()));
    assert_ne!(old_temp_name, new.temp_name_for_file("foobar"));
    assert_eq!(new.phase(), RecoveryPhase::Initializing);

    // both generations count as targets until the old one is released
    assert_eq!(shard.recovery_stats().current_as_target(), 2);
    assert!(old.store().is_ok());

    old.close();
    assert_eq!(shard.recovery_stats().current_as_target(), 1);
    match old.store() {
        Err(RecoveryError::ClosedStatus { recovery_id }) => assert_eq!(recovery_id, id),
        other => panic!("expected ClosedStatus, got {:?}", other.map(|_| ())),
    }
    assert!(old.write_temp_file_chunk("foobar", b"late").unwrap_err().is_closed_status());

    drop(new);
    assert_eq!(shard.store().ref_count(), store_refs_before);
    assert_eq!(shard.recovery_stats().restarts(), 1);
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_reset_cleans_old_generation_temp_files() {
    let (_scheduler, registry) = manual_registry();
    let shard = recovering_shard("index", 0);
    let id = registry
        .start(shard.clone(), primary(), Arc::new(NoopListener), HOUR)
        .unwrap();

    let old_temp = registry
        .get(id)
        .unwrap()
        .write_temp_file_chunk("_1.cfs", b"partial")
        .unwrap();
    registry.reset(id, shard.shard_id()).unwrap();
    assert!(!shard.store().contains(&old_temp));

    let new_temp = registry
        .get(id)
        .unwrap()
        .write_temp_file_chunk("_1.cfs", b"complete")
        .unwrap();
    assert_ne!(old_temp, new_temp);
    assert_eq!(shard.store().read_file(&new_temp).unwrap(), b"complete");
}

#[test]
fn test_cancel_after_reset_reaches_old_holders() {
    let (_scheduler, registry) = manual_registry();
    let shard = recovering_shard("index", 0);
    let (listener, rx) = channel_listener();
    let id = registry.start(shard.clone(), primary(), listener, HOUR).unwrap();

    let old = registry.get(id).unwrap();
    registry.reset(id, shard.shard_id()).unwrap();
    assert!(registry.cancel(id, "closing"));

    assert!(old.cancellation().is_cancelled());
    assert_eq!(rx.try_iter().count(), 1);
    drop(old);
    assert_eq!(shard.store().ref_count(), 1);
    assert_eq!(shard.recovery_stats().current_as_target(), 0);
}

#[test]
fn test_repeated_resets_keep_store_balanced() {
    let (_scheduler, registry) = manual_registry();
    let shard = recovering_shard("index", 0);
    let id = registry
        .start(shard.clone(), primary(), Arc::new(NoopListener), HOUR)
        .unwrap();

    let mut held = Vec::new();
    for round in 1..=5 {
        held.push(registry.get(id).unwrap());
        registry.reset(id, shard.shard_id()).unwrap();
        // one per held generation plus the live one plus the shard's own
        assert_eq!(shard.store().ref_count(), round + 2);
    }
    held.clear();
    assert_eq!(shard.store().ref_count(), 2);
    assert_eq!(shard.recovery_stats().restarts(), 5);

    assert!(registry.mark_as_done(id));
    assert_eq!(shard.store().ref_count(), 1);
}
