//! # entl-eval: Evaluation Engine
//!
//! Answers "may this user of this tenant use this feature now?" as a pure
//! function over an immutable [`TenantSnapshot`]:
//!
//! ```text
//! evaluate(snapshot, user, feature, now) -> Decision { allowed, reason, .. }
//! ```
//!
//! ## Order of checks
//!
//! 1. Flag missing or disabled → `FLAG_DISABLED`.
//! 2. Flag expired → `FLAG_EXPIRED`.
//! 3. User in the flag's target list → candidate allow (`TARGETED`).
//! 4. Rollout bucket below the percentage → candidate allow (`ROLLOUT`),
//!    otherwise `NOT_IN_ROLLOUT`.
//! 5. Candidate allows are gated by the license: tier below the feature's
//!    minimum → `PLAN_INSUFFICIENT`; license missing or not effectively
//!    active → `LICENSE_INACTIVE`.
//! 6. Features owned by an app additionally require an active subscription
//!    to that app → `APP_NOT_SUBSCRIBED`.
//!
//! ## Determinism
//!
//! Bucketing hashes the canonical JSON of `(tenant, user, feature)` with
//! SHA-256 (see [`bucket::rollout_bucket`]), so every process computes the
//! same bucket for the same triple. Evaluation performs no I/O and reads no
//! clock.

pub mod bucket;
pub mod catalog;
pub mod engine;
pub mod flag;
pub mod snapshot;

pub use bucket::rollout_bucket;
pub use catalog::{AppDefinition, CatalogError, FeatureCatalog, FeatureDefinition};
pub use engine::{evaluate, Decision, Reason};
pub use flag::{FeatureFlag, RolloutPercentage};
pub use snapshot::TenantSnapshot;
