//! The evaluation function.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use entl_core::{FeatureName, PlanTier, Remediation, TenantId, UserId};
use entl_state::DEFAULT_PRODUCT;

use crate::bucket::rollout_bucket;
use crate::snapshot::TenantSnapshot;

// ---------------------------------------------------------------------------
// Reason
// ---------------------------------------------------------------------------

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    /// Flag missing or disabled.
    FlagDisabled,
    /// Flag past its expiry.
    FlagExpired,
    /// User on the flag's allow-list.
    Targeted,
    /// User's bucket inside the rollout.
    Rollout,
    /// User's bucket outside the rollout.
    NotInRollout,
    /// Tenant's tier is below the feature's minimum.
    PlanInsufficient,
    /// No license, or the license is not active.
    LicenseInactive,
    /// Feature's app is not actively subscribed.
    AppNotSubscribed,
}

impl Reason {
    /// Wire name, e.g. `NOT_IN_ROLLOUT`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FlagDisabled => "FLAG_DISABLED",
            Self::FlagExpired => "FLAG_EXPIRED",
            Self::Targeted => "TARGETED",
            Self::Rollout => "ROLLOUT",
            Self::NotInRollout => "NOT_IN_ROLLOUT",
            Self::PlanInsufficient => "PLAN_INSUFFICIENT",
            Self::LicenseInactive => "LICENSE_INACTIVE",
            Self::AppNotSubscribed => "APP_NOT_SUBSCRIBED",
        }
    }

    /// Whether this reason allows access.
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Targeted | Self::Rollout)
    }

    /// What the caller can do about a denial.
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Targeted | Self::Rollout => Remediation::None,
            Self::FlagDisabled | Self::FlagExpired => Remediation::None,
            Self::NotInRollout => Remediation::RetryLater,
            Self::PlanInsufficient | Self::AppNotSubscribed => Remediation::UpgradeRequired,
            Self::LicenseInactive => Remediation::ContactSupport,
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Tenant evaluated.
    pub tenant_id: TenantId,
    /// User evaluated.
    pub user_id: UserId,
    /// Feature evaluated.
    pub feature: FeatureName,
    /// Whether access is granted.
    pub allowed: bool,
    /// Deciding reason.
    pub reason: Reason,
    /// Tier that would unlock the feature, on `PLAN_INSUFFICIENT`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_hint: Option<PlanTier>,
    /// Rollout bucket, when bucketing ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<u8>,
    /// Tenant sequence of the snapshot evaluated against.
    pub sequence: u64,
}

impl Decision {
    /// Remediation for this decision's reason.
    pub fn remediation(&self) -> Remediation {
        self.reason.remediation()
    }
}

// ---------------------------------------------------------------------------
// evaluate
// ---------------------------------------------------------------------------

/// Decide whether `user` may use `feature` at `now`, given `snapshot`.
///
/// Pure: same inputs, same decision, in any process.
pub fn evaluate(
    snapshot: &TenantSnapshot,
    user: &UserId,
    feature: &FeatureName,
    now: DateTime<Utc>,
) -> Decision {
    let decide = |reason: Reason, bucket: Option<u8>, upgrade_hint: Option<PlanTier>| Decision {
        tenant_id: snapshot.tenant_id,
        user_id: user.clone(),
        feature: feature.clone(),
        allowed: reason.is_allow(),
        reason,
        upgrade_hint,
        bucket,
        sequence: snapshot.sequence,
    };

    let Some(flag) = snapshot.flag(feature).filter(|f| f.enabled) else {
        return decide(Reason::FlagDisabled, None, None);
    };
    if flag.is_expired(now) {
        return decide(Reason::FlagExpired, None, None);
    }

    let (candidate, bucket) = if flag.targets(user) {
        (Reason::Targeted, None)
    } else {
        let bucket = rollout_bucket(&snapshot.tenant_id, user, feature);
        if !flag.rollout_percentage.includes(bucket) {
            return decide(Reason::NotInRollout, Some(bucket), None);
        }
        (Reason::Rollout, Some(bucket))
    };

    let definition = snapshot.catalog.feature(feature);
    let product = definition.map_or(DEFAULT_PRODUCT, |d| d.product.as_str());

    let required = snapshot.catalog.required_tier(feature);
    let current = snapshot.tier_for(product);
    if !current.satisfies(required) {
        return decide(Reason::PlanInsufficient, bucket, Some(required));
    }

    let license_active = snapshot
        .license_for(product)
        .is_some_and(|l| l.is_active_at(now));
    if !license_active {
        return decide(Reason::LicenseInactive, bucket, None);
    }

    if let Some(app) = definition.and_then(|d| d.app.as_ref()) {
        let subscribed = snapshot.subscription(app).is_some_and(|s| s.is_active());
        if !subscribed {
            return decide(Reason::AppNotSubscribed, bucket, None);
        }
    }

    decide(candidate, bucket, None)
}
