//! Shared fixtures for the registry test suite

use shard_recovery::{
    ChannelListener, DiscoveryNode, IndexShard, ManualScheduler, RecoveryListener,
    RecoveryOutcome, RecoveryRegistry, RecoveryType, RegistryConfig, ShardId,
};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Once};
use std::time::Duration;

pub const HOUR: Duration = Duration::from_secs(60 * 60);

static TRACING: Once = Once::new();

/// Route registry logs to the test harness output (`RUST_LOG` filters)
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

pub fn primary() -> DiscoveryNode {
    DiscoveryNode::new("node-a", "primary", "10.0.0.1:9300")
}

pub fn replica_node() -> DiscoveryNode {
    DiscoveryNode::new("node-b", "replica", "10.0.0.2:9300")
}

/// Index shard already marked as recovering from `primary()`
pub fn recovering_shard(index: &str, shard: u32) -> Arc<IndexShard> {
    let index_shard = Arc::new(IndexShard::new(ShardId::new(index, shard), replica_node()));
    index_shard
        .mark_as_recovering("peer recovery", RecoveryType::Replica, Some(primary()))
        .unwrap();
    index_shard
}

/// Registry driven by virtual time
pub fn manual_registry() -> (Arc<ManualScheduler>, RecoveryRegistry) {
    init_tracing();
    let scheduler = Arc::new(ManualScheduler::new());
    let registry = RecoveryRegistry::with_config(
        scheduler.clone(),
        RegistryConfig::default(),
        tracing::info_span!("test-node"),
    )
    .unwrap();
    (scheduler, registry)
}

/// Registry backed by a real timer thread
pub fn thread_registry() -> RecoveryRegistry {
    init_tracing();
    RecoveryRegistry::with_thread_scheduler(RegistryConfig::default(), tracing::info_span!("test-node"))
        .unwrap()
}

pub fn channel_listener() -> (Arc<dyn RecoveryListener>, Receiver<RecoveryOutcome>) {
    let (listener, rx) = ChannelListener::new();
    (Arc::new(listener), rx)
}
