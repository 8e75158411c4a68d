//! # API Route Modules
//!
//! - `tenants`: tenant registration, licenses, plan changes.
//! - `subscriptions`: app subscriptions, grace periods, archival jobs.
//! - `activations`: seat activations and heartbeats.
//! - `flags`: global and tenant feature flags.
//! - `evaluate`: entitlement decisions.
//! - `usage`: metered usage, compliance reporting, payment webhook.
//! - `audit`: audit log queries and chain verification.

pub mod activations;
pub mod audit;
pub mod evaluate;
pub mod flags;
pub mod subscriptions;
pub mod tenants;
pub mod usage;
