//! # entl-core: Foundational Types for the Entitlement Engine
//!
//! Every other crate in the workspace depends on `entl-core`; it depends on
//! nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for domain primitives.** `TenantId`, `UserId`,
//!    `AppId`, `FeatureName`, `ActivationToken` are distinct types with
//!    validated constructors. No bare strings for identifiers.
//!
//! 2. **`CanonicalBytes` newtype.** Digest computation (rollout bucketing,
//!    audit hash chain) flows through `CanonicalBytes::new()`, so the same
//!    inputs hash identically in every process.
//!
//! 3. **One error taxonomy.** [`EntitlementError`] is shared by the store,
//!    the lifecycle manager and the API so that a denial or rejection keeps
//!    its structure from the point it is raised to the HTTP response.
//!
//! 4. **Injected time.** Lifecycle code reads time through [`Clock`];
//!    evaluation takes `now` as an argument.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `entl-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod canonical;
pub mod digest;
pub mod error;
pub mod identity;
pub mod plan;
pub mod temporal;

pub use canonical::CanonicalBytes;
pub use digest::{sha256_digest, sha256_hex, ContentDigest};
pub use error::{
    CanonicalizationError, EntitlementError, EntitlementResult, Remediation, ValidationError,
};
pub use identity::{ActivationToken, AppId, FeatureName, JobId, LicenseId, TenantId, UserId};
pub use plan::PlanTier;
pub use temporal::{truncate_to_seconds, Clock, ManualClock, SystemClock};
