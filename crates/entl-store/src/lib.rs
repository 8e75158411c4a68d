//! # entl-store: Entitlement Store
//!
//! Single write path for every entitlement record.
//!
//! ## Partitions
//!
//! Records live in partitions: one per tenant plus one global partition for
//! global feature flags. Each partition has its own lock and its own commit
//! sequence. A commit touches exactly one partition, so tenants never block
//! each other.
//!
//! ## Commits
//!
//! A [`Commit`] lists writes, each with the version the caller read
//! (`None` = must not exist), plus the audit drafts describing them.
//! [`EntitlementStore::commit`] takes the partition lock only for the
//! conditional write: it checks every expected version, seals the audit
//! entries, applies the writes, assigns the next sequence number, and hands
//! the result to the registered [`CommitObserver`]s before releasing the
//! lock, so observers see commits of a partition in sequence order.
//!
//! A version mismatch fails the whole commit with
//! `EntitlementError::ConcurrentModification` and changes nothing.
//! [`transact`] wraps read-compute-commit in a bounded retry loop.

pub mod commit;
pub mod record;
pub mod store;
pub mod transact;

pub use commit::{Change, Commit, CommitResult, Write, WriteOp};
pub use record::{Partition, Record, RecordKey, RecordKind, StoredRecord, Versioned};
pub use store::{CommitObserver, EntitlementStore, Hydration};
pub use transact::{transact, DEFAULT_MAX_ATTEMPTS};
