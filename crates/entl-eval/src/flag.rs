//! Feature flags.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use entl_core::{FeatureName, TenantId, UserId, ValidationError};

/// Rollout percentage in `0..=100`, validated at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct RolloutPercentage(u8);

impl RolloutPercentage {
    /// Nobody.
    pub const NONE: Self = Self(0);
    /// Everybody.
    pub const ALL: Self = Self(100);

    /// Validate `value`.
    pub fn new(value: u32) -> Result<Self, ValidationError> {
        if value > 100 {
            return Err(ValidationError::RolloutOutOfRange(value));
        }
        Ok(Self(value as u8))
    }

    /// The percentage.
    pub fn get(&self) -> u8 {
        self.0
    }

    /// Whether `bucket` (in `0..100`) falls inside the rollout.
    pub fn includes(&self, bucket: u8) -> bool {
        bucket < self.0
    }
}

impl TryFrom<u32> for RolloutPercentage {
    type Error = ValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RolloutPercentage> for u32 {
    fn from(value: RolloutPercentage) -> Self {
        u32::from(value.0)
    }
}

impl std::fmt::Display for RolloutPercentage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// A feature flag, global (`tenant_id = None`) or tenant-scoped. A tenant
/// flag overrides the global flag with the same name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlag {
    /// Flag name; matches a catalog feature name.
    pub name: FeatureName,
    /// Owning tenant, or `None` for a global flag.
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    /// A disabled flag denies everyone, targets included.
    pub enabled: bool,
    /// Share of users (by bucket) the flag is rolled out to.
    pub rollout_percentage: RolloutPercentage,
    /// Users always included, regardless of rollout.
    #[serde(default)]
    pub target_user_ids: BTreeSet<UserId>,
    /// The flag stops applying after this instant.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl FeatureFlag {
    /// Enabled flag with the given rollout and no targets.
    pub fn new(name: FeatureName, rollout_percentage: RolloutPercentage) -> Self {
        Self {
            name,
            tenant_id: None,
            enabled: true,
            rollout_percentage,
            target_user_ids: BTreeSet::new(),
            expires_at: None,
        }
    }

    /// Scope to `tenant`.
    pub fn for_tenant(mut self, tenant: TenantId) -> Self {
        self.tenant_id = Some(tenant);
        self
    }

    /// Add target users.
    pub fn with_targets(mut self, users: impl IntoIterator<Item = UserId>) -> Self {
        self.target_user_ids.extend(users);
        self
    }

    /// Set an expiry.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the flag has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }

    /// Whether `user` is on the allow-list.
    pub fn targets(&self, user: &UserId) -> bool {
        self.target_user_ids.contains(user)
    }
}
