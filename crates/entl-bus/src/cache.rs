//! Application-side snapshot cache.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use entl_core::{FeatureName, TenantId, UserId};
use entl_eval::{evaluate, Decision, TenantSnapshot};
use entl_store::{Change, Partition, Record, RecordKey};

use crate::event::EntitlementEvent;

/// Result of [`TenantCache::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The event was folded in; carries the new partition sequence.
    Applied(u64),
    /// Already reflected in the snapshot; nothing changed.
    Duplicate,
    /// One or more earlier events are missing; the cache needs a resync.
    Gap {
        /// Sequence the cache expected next.
        expected: u64,
        /// Sequence received.
        received: u64,
    },
    /// The event belongs to another tenant.
    Foreign,
}

/// Current entitlement view of one tenant inside an application instance.
///
/// Readers take an `Arc` of the snapshot and evaluate without holding any
/// lock; writers build the next snapshot and swap it in.
#[derive(Debug)]
pub struct TenantCache {
    tenant_id: TenantId,
    current: RwLock<Arc<TenantSnapshot>>,
}

impl TenantCache {
    /// Cache seeded with `snapshot`.
    pub fn new(snapshot: TenantSnapshot) -> Self {
        Self {
            tenant_id: snapshot.tenant_id,
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// The snapshot currently in effect.
    pub fn snapshot(&self) -> Arc<TenantSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Tenant-partition sequence of the current snapshot.
    pub fn sequence(&self) -> u64 {
        self.current.read().sequence
    }

    /// Evaluate `feature` for `user` against the current snapshot.
    pub fn evaluate(&self, user: &UserId, feature: &FeatureName, now: DateTime<Utc>) -> Decision {
        evaluate(&self.snapshot(), user, feature, now)
    }

    /// Replace the snapshot after a full resynchronization.
    ///
    /// The snapshot must be at or past the current one on both partitions;
    /// otherwise it is ignored.
    pub fn replace(&self, snapshot: TenantSnapshot) -> bool {
        if snapshot.tenant_id != self.tenant_id {
            return false;
        }
        let mut current = self.current.write();
        if snapshot.sequence < current.sequence || snapshot.global_sequence < current.global_sequence
        {
            return false;
        }
        *current = Arc::new(snapshot);
        true
    }

    /// Fold `event` into the snapshot.
    ///
    /// Events at or below the last applied sequence of their partition are
    /// discarded, so redelivery is harmless.
    pub fn apply(&self, event: &EntitlementEvent) -> ApplyOutcome {
        let global = match event.partition {
            Partition::Global => true,
            Partition::Tenant(id) if id == self.tenant_id => false,
            Partition::Tenant(_) => return ApplyOutcome::Foreign,
        };

        let mut current = self.current.write();
        let last = if global {
            current.global_sequence
        } else {
            current.sequence
        };
        if event.sequence <= last {
            return ApplyOutcome::Duplicate;
        }
        if event.sequence != last + 1 {
            return ApplyOutcome::Gap {
                expected: last + 1,
                received: event.sequence,
            };
        }

        let mut next = TenantSnapshot::clone(&current);
        for change in &event.changes {
            fold(&mut next, change);
        }
        if global {
            next.global_sequence = event.sequence;
        } else {
            next.sequence = event.sequence;
        }
        *current = Arc::new(next);
        ApplyOutcome::Applied(event.sequence)
    }
}

fn fold(snapshot: &mut TenantSnapshot, change: &Change) {
    match change {
        Change::Put { record, .. } => match record {
            Record::Tenant(t) => snapshot.put_tenant(t.clone()),
            Record::License(l) => snapshot.put_license(l.clone()),
            Record::Subscription(s) => snapshot.put_subscription(s.clone()),
            Record::Flag(f) => snapshot.put_flag(f.clone()),
            // Not part of the evaluation view.
            Record::Activation(_) | Record::Job(_) => {}
        },
        Change::Delete { key } => {
            if let RecordKey::Flag { tenant, name } = key {
                snapshot.remove_flag(*tenant, name);
            }
        }
    }
}
