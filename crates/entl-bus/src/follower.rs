//! Follower task keeping a [`TenantCache`] in step with the bus.

use std::sync::Arc;

use tokio::task::JoinHandle;

use entl_core::TenantId;
use entl_eval::TenantSnapshot;
use entl_store::EntitlementStore;

use crate::bus::{BusMessage, EventStream};
use crate::cache::{ApplyOutcome, TenantCache};

/// Where a follower reloads full snapshots from.
pub trait SnapshotSource: Send + Sync + 'static {
    /// Current full view of `tenant`.
    fn snapshot(&self, tenant: TenantId) -> TenantSnapshot;
}

impl SnapshotSource for EntitlementStore {
    fn snapshot(&self, tenant: TenantId) -> TenantSnapshot {
        EntitlementStore::snapshot(self, tenant)
    }
}

/// Drive `cache` from `stream` until the bus goes away.
///
/// The cache is resynchronized from `source` once at start (covering
/// anything committed before the stream was opened), then whenever the
/// stream lags or an event reveals a gap.
pub fn spawn_follower<S: SnapshotSource>(
    cache: Arc<TenantCache>,
    mut stream: EventStream,
    source: Arc<S>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let tenant = cache.tenant_id();
        resync(&cache, source.as_ref());
        while let Some(message) = stream.next().await {
            match message {
                BusMessage::Event(event) => match cache.apply(&event) {
                    ApplyOutcome::Applied(sequence) => {
                        tracing::trace!(tenant_id = %tenant, sequence, "event applied");
                    }
                    ApplyOutcome::Duplicate | ApplyOutcome::Foreign => {}
                    ApplyOutcome::Gap { expected, received } => {
                        tracing::warn!(
                            tenant_id = %tenant,
                            expected,
                            received,
                            "event gap detected, resynchronizing"
                        );
                        resync(&cache, source.as_ref());
                    }
                },
                BusMessage::Resync => resync(&cache, source.as_ref()),
            }
        }
        tracing::debug!(tenant_id = %tenant, "event stream closed, follower stopping");
    })
}

fn resync<S: SnapshotSource>(cache: &TenantCache, source: &S) {
    let snapshot = source.snapshot(cache.tenant_id());
    let (sequence, global_sequence) = (snapshot.sequence, snapshot.global_sequence);
    if cache.replace(snapshot) {
        metrics::counter!("entl_cache_resyncs_total").increment(1);
        tracing::info!(
            tenant_id = %cache.tenant_id(),
            sequence,
            global_sequence,
            "tenant cache resynchronized"
        );
    }
}
