//! # License Lifecycle
//!
//! ```text
//! Active ──▶ Suspended ──▶ Active (reinstatement)
//!   │            │
//!   │            ├──▶ Expired (terminal)
//!   │            └──▶ Revoked (terminal)
//!   ├──▶ Expired (terminal)
//!   └──▶ Revoked (terminal)
//! ```
//!
//! The stored status only moves through explicit transitions. Evaluation
//! uses [`License::effective_status`], which additionally treats a license as
//! expired once `expires_at + grace_period_days` has passed, so a missed
//! expiry sweep never grants access.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use entl_core::{EntitlementError, EntitlementResult, LicenseId, PlanTier, TenantId};

use crate::transition::{checked, status_display, Status, TransitionRecord};

/// Name of the implicit activation limit, as reported in `LimitExceeded`.
pub const ACTIVATIONS_LIMIT: &str = "activations";

/// Product assumed when a feature or request names none.
pub const DEFAULT_PRODUCT: &str = "platform";

// ─── License Status ──────────────────────────────────────────────────

/// The lifecycle status of a license.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    /// Valid for use.
    Active,
    /// Temporarily unusable (payment failure or operator action).
    Suspended,
    /// Term ended (terminal).
    Expired,
    /// Withdrawn (terminal).
    Revoked,
}

impl Status for LicenseStatus {
    fn name(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }

    fn can_transition_to(&self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Active, Self::Suspended)
                | (Self::Active, Self::Expired)
                | (Self::Active, Self::Revoked)
                | (Self::Suspended, Self::Active)
                | (Self::Suspended, Self::Expired)
                | (Self::Suspended, Self::Revoked)
        )
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Revoked)
    }
}

status_display!(LicenseStatus);

/// Why a license is suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspensionReason {
    /// Billing reported a failed payment. A later successful payment
    /// reinstates automatically.
    PaymentFailed,
    /// Manual operator action. Only an operator reinstates.
    Operator,
}

// ─── License ─────────────────────────────────────────────────────────

/// Parameters for issuing a license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLicense {
    /// Product the license covers.
    pub product: String,
    /// Plan tier granted.
    pub tier: PlanTier,
    /// Named usage limits, e.g. `customers`, `api_calls`.
    #[serde(default)]
    pub limits: BTreeMap<String, u64>,
    /// Maximum concurrent activations.
    pub max_activations: u32,
    /// End of the license term. `None` never expires.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Days of continued validity after `expires_at`.
    #[serde(default)]
    pub grace_period_days: u32,
}

/// A license held by a tenant for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    /// License identifier.
    pub id: LicenseId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Product the license covers.
    pub product: String,
    /// Plan tier granted.
    pub tier: PlanTier,
    /// Stored lifecycle status.
    pub status: LicenseStatus,
    /// Named usage limits.
    pub limits: BTreeMap<String, u64>,
    /// Maximum concurrent activations.
    pub max_activations: u32,
    /// Activations currently held. Never exceeds `max_activations`.
    pub current_activations: u32,
    /// When the license took effect.
    pub effective_at: DateTime<Utc>,
    /// End of the license term.
    pub expires_at: Option<DateTime<Utc>>,
    /// Days of continued validity after `expires_at`.
    pub grace_period_days: u32,
    /// Set while suspended.
    pub suspension_reason: Option<SuspensionReason>,
    /// Limits flagged as exceeded by the usage reporter.
    #[serde(default)]
    pub exceeded_limits: BTreeSet<String>,
    /// Ordered log of all status transitions.
    #[serde(default)]
    pub transition_log: Vec<TransitionRecord<LicenseStatus>>,
}

impl License {
    /// Issue a new active license effective at `now`.
    pub fn issue(tenant_id: TenantId, request: NewLicense, now: DateTime<Utc>) -> Self {
        Self {
            id: LicenseId::new(),
            tenant_id,
            product: request.product,
            tier: request.tier,
            status: LicenseStatus::Active,
            limits: request.limits,
            max_activations: request.max_activations,
            current_activations: 0,
            effective_at: now,
            expires_at: request.expires_at,
            grace_period_days: request.grace_period_days,
            suspension_reason: None,
            exceeded_limits: BTreeSet::new(),
            transition_log: Vec::new(),
        }
    }

    /// Instant after which the license is no longer usable, if it expires.
    pub fn hard_expiry(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .map(|at| at + Duration::days(i64::from(self.grace_period_days)))
    }

    /// Status as seen by evaluation at `now`: a non-terminal license past
    /// its hard expiry reads as `expired`.
    pub fn effective_status(&self, now: DateTime<Utc>) -> LicenseStatus {
        match (self.status, self.hard_expiry()) {
            (s, Some(hard)) if !s.is_terminal() && now > hard => LicenseStatus::Expired,
            (s, _) => s,
        }
    }

    /// Whether the license grants access at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == LicenseStatus::Active
    }

    /// Past `expires_at` but still inside the grace window.
    pub fn in_grace_period(&self, now: DateTime<Utc>) -> bool {
        match (self.expires_at, self.hard_expiry()) {
            (Some(end), Some(hard)) => now > end && now <= hard,
            _ => false,
        }
    }

    /// Fail with `LicenseInactive` unless active at `now`.
    pub fn require_active(&self, now: DateTime<Utc>) -> EntitlementResult<()> {
        let status = self.effective_status(now);
        if status != LicenseStatus::Active {
            return Err(EntitlementError::LicenseInactive {
                status: status.to_string(),
            });
        }
        Ok(())
    }

    /// Fail with `LimitExceeded` if any limit is currently flagged.
    pub fn require_within_limits(&self) -> EntitlementResult<()> {
        if let Some(limit) = self.exceeded_limits.iter().next() {
            let max = if limit == ACTIVATIONS_LIMIT {
                u64::from(self.max_activations)
            } else {
                self.limits.get(limit).copied().unwrap_or(0)
            };
            return Err(EntitlementError::LimitExceeded {
                limit: limit.clone(),
                current: max.saturating_add(1),
                max,
            });
        }
        Ok(())
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Move to `to`, recording the transition.
    pub fn transition(
        &mut self,
        to: LicenseStatus,
        now: DateTime<Utc>,
        reason: Option<String>,
    ) -> EntitlementResult<()> {
        let record = checked(self.status, to, now, reason)?;
        self.status = to;
        if to != LicenseStatus::Suspended {
            self.suspension_reason = None;
        }
        if to.is_terminal() {
            self.current_activations = 0;
        }
        self.transition_log.push(record);
        Ok(())
    }

    /// ACTIVE → SUSPENDED.
    pub fn suspend(&mut self, reason: SuspensionReason, now: DateTime<Utc>) -> EntitlementResult<()> {
        if self.status != LicenseStatus::Active {
            return Err(EntitlementError::InvalidTransition {
                from: self.status.to_string(),
                to: LicenseStatus::Suspended.to_string(),
                reason: "only an active license can be suspended".to_string(),
            });
        }
        let label = match reason {
            SuspensionReason::PaymentFailed => "payment_failed",
            SuspensionReason::Operator => "operator",
        };
        self.transition(LicenseStatus::Suspended, now, Some(label.to_string()))?;
        self.suspension_reason = Some(reason);
        Ok(())
    }

    /// SUSPENDED → ACTIVE.
    pub fn reinstate(&mut self, now: DateTime<Utc>) -> EntitlementResult<()> {
        if self.status != LicenseStatus::Suspended {
            return Err(EntitlementError::InvalidTransition {
                from: self.status.to_string(),
                to: LicenseStatus::Active.to_string(),
                reason: "only a suspended license can be reinstated".to_string(),
            });
        }
        self.transition(LicenseStatus::Active, now, Some("reinstated".to_string()))
    }

    // ── Activations ──────────────────────────────────────────────────

    /// Take one activation slot. Fails without modifying the license if the
    /// license is not active, a limit is flagged, or all slots are taken.
    pub fn allocate_activation(&mut self, now: DateTime<Utc>) -> EntitlementResult<()> {
        self.require_active(now)?;
        self.require_within_limits()?;
        if self.current_activations >= self.max_activations {
            return Err(EntitlementError::LimitExceeded {
                limit: ACTIVATIONS_LIMIT.to_string(),
                current: u64::from(self.current_activations),
                max: u64::from(self.max_activations),
            });
        }
        self.current_activations += 1;
        Ok(())
    }

    /// Give one activation slot back.
    pub fn release_activation(&mut self) {
        self.current_activations = self.current_activations.saturating_sub(1);
    }

    // ── Compliance flags ─────────────────────────────────────────────

    /// Flag `limit` as exceeded. Returns whether the set changed.
    pub fn flag_limit(&mut self, limit: &str) -> bool {
        self.exceeded_limits.insert(limit.to_string())
    }

    /// Clear the exceeded flag on `limit`. Returns whether the set changed.
    pub fn clear_limit(&mut self, limit: &str) -> bool {
        self.exceeded_limits.remove(limit)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Any interleaving of allocate/release keeps the counter within
        /// `[0, max_activations]`.
        #[test]
        fn activations_never_exceed_max(
            max in 0u32..8,
            ops in prop::collection::vec(any::<bool>(), 0..64),
        ) {
            let now = Utc::now();
            let mut lic = License::issue(
                TenantId::new(),
                NewLicense {
                    product: "platform".into(),
                    tier: PlanTier::Premium,
                    limits: BTreeMap::new(),
                    max_activations: max,
                    expires_at: None,
                    grace_period_days: 0,
                },
                now,
            );
            for allocate in ops {
                if allocate {
                    let before = lic.current_activations;
                    if lic.allocate_activation(now).is_err() {
                        prop_assert_eq!(lic.current_activations, before);
                    }
                } else {
                    lic.release_activation();
                }
                prop_assert!(lic.current_activations <= lic.max_activations);
            }
        }
    }
}
