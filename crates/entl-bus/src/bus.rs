//! Per-partition broadcast channels.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast::{self, error::RecvError};

use entl_core::TenantId;
use entl_store::{CommitObserver, CommitResult, Partition};

use crate::event::EntitlementEvent;

/// Events buffered per partition before a slow subscriber is lagged.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// In-process event bus with one ordered channel per partition.
#[derive(Debug)]
pub struct PropagationBus {
    capacity: usize,
    channels: RwLock<HashMap<Partition, broadcast::Sender<Arc<EntitlementEvent>>>>,
}

impl Default for PropagationBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl PropagationBus {
    /// Bus whose channels buffer `capacity` events each.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Publish `event` to the subscribers of its partition.
    ///
    /// Returns the number of subscribers reached. A partition nobody
    /// listens to drops the event; that is not an error.
    pub fn publish(&self, event: EntitlementEvent) -> usize {
        let partition = event.partition;
        let sequence = event.sequence;
        let sender = self.channels.read().get(&partition).cloned();
        metrics::counter!("entl_events_published_total").increment(1);
        let Some(sender) = sender else {
            return 0;
        };
        match sender.send(Arc::new(event)) {
            Ok(reached) => {
                tracing::trace!(partition = %partition, sequence, reached, "event published");
                reached
            }
            Err(_) => 0,
        }
    }

    /// Stream of events relevant to `tenant`: its own partition merged
    /// with the global one.
    ///
    /// Subscribe before taking the initial snapshot; events already folded
    /// into the snapshot are discarded by sequence.
    pub fn subscribe(&self, tenant: TenantId) -> EventStream {
        EventStream {
            tenant_id: tenant,
            tenant_rx: Some(self.sender(Partition::Tenant(tenant)).subscribe()),
            global_rx: Some(self.sender(Partition::Global).subscribe()),
        }
    }

    /// Live subscribers on `partition`.
    pub fn subscriber_count(&self, partition: Partition) -> usize {
        self.channels
            .read()
            .get(&partition)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    fn sender(&self, partition: Partition) -> broadcast::Sender<Arc<EntitlementEvent>> {
        if let Some(sender) = self.channels.read().get(&partition) {
            return sender.clone();
        }
        self.channels
            .write()
            .entry(partition)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl CommitObserver for PropagationBus {
    fn on_commit(&self, result: &CommitResult) {
        self.publish(EntitlementEvent::from(result));
    }
}

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    /// Next event of the tenant or global partition.
    Event(Arc<EntitlementEvent>),
    /// Events were dropped; the subscriber must reload a full snapshot.
    Resync,
}

#[derive(Clone, Copy)]
enum Source {
    Tenant,
    Global,
}

/// Merged tenant + global event stream.
///
/// Each partition's events arrive in sequence order; the two partitions
/// are not ordered relative to each other.
#[derive(Debug)]
pub struct EventStream {
    tenant_id: TenantId,
    tenant_rx: Option<broadcast::Receiver<Arc<EntitlementEvent>>>,
    global_rx: Option<broadcast::Receiver<Arc<EntitlementEvent>>>,
}

impl EventStream {
    /// Tenant the stream follows.
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Next message, or `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<BusMessage> {
        loop {
            if self.tenant_rx.is_none() && self.global_rx.is_none() {
                return None;
            }
            let (source, received) = tokio::select! {
                biased;
                r = recv(&mut self.tenant_rx) => (Source::Tenant, r),
                r = recv(&mut self.global_rx) => (Source::Global, r),
            };
            match received {
                Ok(event) => return Some(BusMessage::Event(event)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(tenant_id = %self.tenant_id, skipped, "subscriber lagged");
                    metrics::counter!("entl_subscriber_lagged_total").increment(1);
                    return Some(BusMessage::Resync);
                }
                Err(RecvError::Closed) => match source {
                    Source::Tenant => self.tenant_rx = None,
                    Source::Global => self.global_rx = None,
                },
            }
        }
    }
}

async fn recv(
    rx: &mut Option<broadcast::Receiver<Arc<EntitlementEvent>>>,
) -> Result<Arc<EntitlementEvent>, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(partition: Partition, sequence: u64) -> EntitlementEvent {
        EntitlementEvent {
            partition,
            sequence,
            committed_at: Utc::now(),
            changes: Vec::new(),
        }
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let bus = PropagationBus::default();
        let tenant = TenantId::new();
        let mut stream = bus.subscribe(tenant);
        for seq in 1..=3 {
            assert_eq!(bus.publish(event(Partition::Tenant(tenant), seq)), 1);
        }
        for seq in 1..=3 {
            match stream.next().await {
                Some(BusMessage::Event(e)) => assert_eq!(e.sequence, seq),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn global_events_reach_every_tenant() {
        let bus = PropagationBus::default();
        let mut a = bus.subscribe(TenantId::new());
        let mut b = bus.subscribe(TenantId::new());
        assert_eq!(bus.publish(event(Partition::Global, 1)), 2);
        for stream in [&mut a, &mut b] {
            match stream.next().await {
                Some(BusMessage::Event(e)) => assert_eq!(e.partition, Partition::Global),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn other_tenants_are_not_delivered() {
        let bus = PropagationBus::default();
        let tenant = TenantId::new();
        let other = TenantId::new();
        let _other_stream = bus.subscribe(other);
        let mut stream = bus.subscribe(tenant);
        bus.publish(event(Partition::Tenant(other), 1));
        bus.publish(event(Partition::Tenant(tenant), 1));
        match stream.next().await {
            Some(BusMessage::Event(e)) => assert_eq!(e.partition, Partition::Tenant(tenant)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn publishing_without_subscribers_is_silent() {
        let bus = PropagationBus::default();
        assert_eq!(bus.publish(event(Partition::Tenant(TenantId::new()), 1)), 0);
        assert_eq!(bus.publish(event(Partition::Global, 1)), 0);
    }

    #[tokio::test]
    async fn lag_turns_into_resync() {
        let bus = PropagationBus::new(2);
        let tenant = TenantId::new();
        let mut stream = bus.subscribe(tenant);
        for seq in 1..=5 {
            bus.publish(event(Partition::Tenant(tenant), seq));
        }
        assert_eq!(stream.next().await, Some(BusMessage::Resync));
        match stream.next().await {
            Some(BusMessage::Event(e)) => assert_eq!(e.sequence, 4),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_ends_when_bus_dropped() {
        let bus = PropagationBus::default();
        let mut stream = bus.subscribe(TenantId::new());
        drop(bus);
        assert_eq!(stream.next().await, None);
    }
}
