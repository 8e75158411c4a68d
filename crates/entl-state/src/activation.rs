//! Activations: a license bound to one running application instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use entl_core::{ActivationToken, EntitlementResult, LicenseId, TenantId};

use crate::transition::{checked, status_display, Status, TransitionRecord};

/// Status of an activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationStatus {
    /// Holding a slot on the license.
    Active,
    /// Released by the instance (terminal).
    Deactivated,
    /// Ended by an operator or by license expiry/revocation (terminal).
    Revoked,
}

impl Status for ActivationStatus {
    fn name(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deactivated => "deactivated",
            Self::Revoked => "revoked",
        }
    }

    fn can_transition_to(&self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Active, Self::Deactivated) | (Self::Active, Self::Revoked)
        )
    }

    fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

status_display!(ActivationStatus);

/// A running application instance holding an activation slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activation {
    /// Opaque unique token handed to the instance.
    pub token: ActivationToken,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// License whose slot is held.
    pub license_id: LicenseId,
    /// Device or instance identifier reported by the caller.
    pub device_id: String,
    /// Current status.
    pub status: ActivationStatus,
    /// When the slot was taken.
    pub activated_at: DateTime<Utc>,
    /// Last heartbeat received.
    pub last_heartbeat: DateTime<Utc>,
    /// Ordered log of all status transitions.
    #[serde(default)]
    pub transition_log: Vec<TransitionRecord<ActivationStatus>>,
}

impl Activation {
    /// New active activation.
    pub fn new(
        token: ActivationToken,
        tenant_id: TenantId,
        license_id: LicenseId,
        device_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            token,
            tenant_id,
            license_id,
            device_id: device_id.into(),
            status: ActivationStatus::Active,
            activated_at: now,
            last_heartbeat: now,
            transition_log: Vec::new(),
        }
    }

    /// Whether the slot is still held.
    pub fn is_active(&self) -> bool {
        self.status == ActivationStatus::Active
    }

    /// End the activation.
    pub fn end(
        &mut self,
        to: ActivationStatus,
        now: DateTime<Utc>,
        reason: Option<String>,
    ) -> EntitlementResult<()> {
        let record = checked(self.status, to, now, reason)?;
        self.status = to;
        self.transition_log.push(record);
        Ok(())
    }
}
