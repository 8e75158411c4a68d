//! # entl-state: Entitlement Data Model and Lifecycle State Machines
//!
//! Every mutable entity of the engine is a plain serializable record with a
//! status enum and an append-only transition log.
//!
//! ## State Machines
//!
//! - **License** (`license.rs`): `active → suspended | expired | revoked`,
//!   `suspended → active | expired | revoked`. Also owns the activation
//!   counter and the set of limits currently flagged as exceeded.
//!
//! - **Subscription** (`subscription.rs`): per (tenant, app)
//!   `pending → active → suspended_grace → archived → reactivating → active`,
//!   with `archival_failed` / `restore_failed` failure sub-states.
//!
//! - **Activation** (`activation.rs`): `active → deactivated | revoked`.
//!
//! - **Job** (`job.rs`): durable archive/restore job records,
//!   `pending → completed | failed | superseded`.
//!
//! ## Design
//!
//! State is data here, not type parameters: records are loaded from storage
//! and moved across process boundaries, so transitions are checked at runtime
//! against each status' [`Status::can_transition_to`] table. An illegal move
//! fails with `EntitlementError::InvalidTransition` and leaves the record
//! untouched.

pub mod activation;
pub mod job;
pub mod license;
pub mod subscription;
pub mod tenant;
pub mod transition;

pub use activation::{Activation, ActivationStatus};
pub use job::{JobKind, JobRecord, JobStatus};
pub use license::{
    License, LicenseStatus, NewLicense, SuspensionReason, ACTIVATIONS_LIMIT,
    DEFAULT_PRODUCT,
};
pub use subscription::{Configuration, Subscription, SubscriptionStatus};
pub use tenant::Tenant;
pub use transition::{Status, TransitionRecord};
