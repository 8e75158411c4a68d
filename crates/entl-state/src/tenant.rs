//! Tenants: the isolation unit. Every other record is keyed by a tenant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use entl_core::{PlanTier, TenantId};

/// An isolated customer account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Tenant identifier.
    pub id: TenantId,
    /// Display name.
    pub name: String,
    /// Current plan tier. Kept in step with the tier of the active default
    /// license by the lifecycle manager.
    pub plan: PlanTier,
    /// When the tenant signed up.
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    /// New tenant on `plan`.
    pub fn new(name: impl Into<String>, plan: PlanTier, now: DateTime<Utc>) -> Self {
        Self {
            id: TenantId::new(),
            name: name.into(),
            plan,
            created_at: now,
        }
    }
}
