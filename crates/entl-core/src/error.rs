//! # Error Hierarchy
//!
//! Structured error types built with `thiserror`. No `Box<dyn Error>`, no
//! `.unwrap()` outside tests.
//!
//! [`EntitlementError`] is the taxonomy every mutating operation reports in.
//! Each variant carries enough context to render an actionable message, and
//! [`EntitlementError::remediation`] classifies it for the caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::plan::PlanTier;

/// Errors raised by the entitlement store, lifecycle manager, and the
/// operations built on them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EntitlementError {
    /// Illegal lifecycle move. Rejected before any write; never retried.
    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        /// Current state name.
        from: String,
        /// Attempted target state name.
        to: String,
        /// Why the move was rejected.
        reason: String,
    },

    /// Version conflict that persisted through the retry budget.
    #[error("concurrent modification of {key} (gave up after {attempts} attempts)")]
    ConcurrentModification {
        /// Record key that kept changing underneath the operation.
        key: String,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// Soft limit. Blocks new allocation, never revokes existing grants.
    #[error("limit '{limit}' exceeded: {current}/{max}")]
    LimitExceeded {
        /// Limit name (`activations`, `customers`, ...).
        limit: String,
        /// Current usage.
        current: u64,
        /// Configured maximum.
        max: u64,
    },

    /// Gated by plan tier. Always carries the tier that would unlock it.
    #[error("plan upgrade required: {required} needed, tenant is on {current}")]
    PlanInsufficient {
        /// Minimum tier required.
        required: PlanTier,
        /// Tenant's current tier.
        current: PlanTier,
    },

    /// Hard denial: the license is not active.
    #[error("license inactive: {status}")]
    LicenseInactive {
        /// Status of the license at the time of the check.
        status: String,
    },

    /// Archival job failed; operator intervention required.
    #[error("archival failed for {app}: {reason}")]
    ArchivalFailed {
        /// App whose data could not be archived.
        app: String,
        /// Collaborator-reported reason.
        reason: String,
    },

    /// Restore job failed; operator intervention required.
    #[error("restore failed for {app}: {reason}")]
    RestoreFailed {
        /// App whose data could not be restored.
        app: String,
        /// Collaborator-reported reason.
        reason: String,
    },

    /// Record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Record already exists where a new one was expected.
    #[error("{entity} already exists: {id}")]
    AlreadyExists {
        /// Entity kind.
        entity: &'static str,
        /// Identifier that collided.
        id: String,
    },

    /// Input failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl EntitlementError {
    /// Machine-readable code, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            Self::LimitExceeded { .. } => "LIMIT_EXCEEDED",
            Self::PlanInsufficient { .. } => "PLAN_UPGRADE_REQUIRED",
            Self::LicenseInactive { .. } => "LICENSE_INACTIVE",
            Self::ArchivalFailed { .. } => "ARCHIVAL_FAILED",
            Self::RestoreFailed { .. } => "RESTORE_FAILED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::Validation(_) => "VALIDATION_ERROR",
        }
    }

    /// What the caller can do about it.
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::PlanInsufficient { .. } | Self::LimitExceeded { .. } => {
                Remediation::UpgradeRequired
            }
            Self::LicenseInactive { .. }
            | Self::ArchivalFailed { .. }
            | Self::RestoreFailed { .. } => Remediation::ContactSupport,
            Self::ConcurrentModification { .. } => Remediation::RetryLater,
            Self::InvalidTransition { .. }
            | Self::NotFound { .. }
            | Self::AlreadyExists { .. }
            | Self::Validation(_) => Remediation::FixRequest,
        }
    }

    /// Shorthand for [`EntitlementError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Actionable classification of a denial or error, for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Remediation {
    /// Nothing to do; the request succeeded.
    None,
    /// A higher plan or larger limit would unlock this.
    UpgradeRequired,
    /// Account state needs operator attention.
    ContactSupport,
    /// Transient; retrying shortly is expected to succeed.
    RetryLater,
    /// The request itself is wrong.
    FixRequest,
}

/// Result alias for entitlement operations.
pub type EntitlementResult<T> = Result<T, EntitlementError>;

/// Errors during canonical serialization.
#[derive(Error, Debug)]
pub enum CanonicalizationError {
    /// Float values are not permitted in canonical representations.
    #[error("float values are not permitted in canonical representations: {0}")]
    FloatRejected(f64),

    /// JSON serialization failed during canonicalization.
    #[error("serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// Validation errors for domain primitives and operator input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Identifier is empty or contains characters outside its alphabet.
    #[error("invalid {kind}: \"{value}\" ({reason})")]
    InvalidIdentifier {
        /// Identifier kind (`app id`, `feature name`, ...).
        kind: &'static str,
        /// Offending input.
        value: String,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// Rollout percentage outside `[0, 100]`.
    #[error("rollout percentage must be within 0..=100, got {0}")]
    RolloutOutOfRange(u32),

    /// Unknown plan tier name.
    #[error("unknown plan tier: \"{0}\" (expected basic, premium or enterprise)")]
    UnknownPlanTier(String),

    /// Any other rule violation.
    #[error("{0}")]
    Rule(String),
}
