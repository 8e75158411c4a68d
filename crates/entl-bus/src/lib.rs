//! # entl-bus: Propagation Bus
//!
//! Carries committed entitlement changes to every application instance
//! acting for a tenant.
//!
//! - [`PropagationBus`] is a [`CommitObserver`](entl_store::CommitObserver):
//!   the store hands it each commit while the partition lock is still held,
//!   so events of one partition are published in commit order. Publishing
//!   never fails toward the store.
//! - [`PropagationBus::subscribe`] returns an [`EventStream`] merging the
//!   tenant's channel with the global one (global flags).
//! - [`TenantCache`] holds the current [`TenantSnapshot`](entl_eval::TenantSnapshot)
//!   behind an `Arc` and folds events into it idempotently by sequence.
//! - [`spawn_follower`] drives a cache from a stream and falls back to a
//!   full snapshot when the stream lags or a gap is detected.

pub mod bus;
pub mod cache;
pub mod event;
pub mod follower;

pub use bus::{BusMessage, EventStream, PropagationBus, DEFAULT_CHANNEL_CAPACITY};
pub use cache::{ApplyOutcome, TenantCache};
pub use event::EntitlementEvent;
pub use follower::{spawn_follower, SnapshotSource};
