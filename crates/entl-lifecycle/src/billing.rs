//! Payment and compliance signals from the billing and usage side.

use serde::{Deserialize, Serialize};

use entl_audit::AuditAction;
use entl_core::{EntitlementResult, LicenseId, TenantId};
use entl_state::{License, LicenseStatus, SuspensionReason, DEFAULT_PRODUCT};
use entl_store::{Commit, Partition};
use entl_usage::ComplianceSignal;

use crate::manager::{current_license, draft, license_key, require_license, LifecycleManager};

/// Payment outcome reported by the billing collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResult {
    pub tenant_id: TenantId,
    /// Billing-side subscription reference.
    #[serde(default)]
    pub subscription_id: Option<String>,
    /// Product the payment covers; the default product when absent.
    #[serde(default)]
    pub product: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl LifecycleManager {
    /// Suspend on payment failure; reinstate on a later success, but only
    /// if the suspension was caused by payment. Returns the license when
    /// it changed.
    pub fn payment_status_changed(
        &self,
        payment: &PaymentResult,
        actor: &str,
    ) -> EntitlementResult<Option<License>> {
        let product = payment.product.as_deref().unwrap_or(DEFAULT_PRODUCT);
        let tenant_id = payment.tenant_id;
        let changed = self.run(|store, now| {
            let current = current_license(store, tenant_id, product)?;
            let before = current.value;
            let mut after = before.clone();
            let applies = if payment.success {
                before.status == LicenseStatus::Suspended
                    && before.suspension_reason == Some(SuspensionReason::PaymentFailed)
            } else {
                before.status == LicenseStatus::Active
            };
            if !applies {
                return Ok((Commit::new(Partition::Tenant(tenant_id)), None));
            }
            if payment.success {
                after.reinstate(now)?;
            } else {
                after.suspend(SuspensionReason::PaymentFailed, now)?;
            }
            let commit = Commit::new(Partition::Tenant(tenant_id))
                .put(after.clone(), Some(current.version))
                .audit(draft(
                    Some(tenant_id),
                    AuditAction::LicenseTransition,
                    &license_key(&after),
                    actor,
                    Some(&before),
                    Some(&after),
                ));
            Ok((commit, Some(after)))
        })?;
        match &changed {
            Some(license) => tracing::info!(
                tenant_id = %tenant_id,
                license_id = %license.id,
                status = %license.status,
                billing_ref = ?payment.subscription_id,
                reason = ?payment.failure_reason,
                "payment status applied"
            ),
            None => tracing::debug!(
                tenant_id = %tenant_id,
                success = payment.success,
                "payment status required no change"
            ),
        }
        Ok(changed)
    }

    /// Flag or unflag a license limit. Expiry warnings are logged only.
    /// Returns the license when a flag changed.
    pub fn apply_signal(
        &self,
        signal: &ComplianceSignal,
        actor: &str,
    ) -> EntitlementResult<Option<License>> {
        let (tenant_id, license_id, limit, raise) = match signal {
            ComplianceSignal::LimitExceeded {
                tenant_id,
                license_id,
                limit,
                ..
            } => (*tenant_id, *license_id, limit.as_str(), true),
            ComplianceSignal::LimitCleared {
                tenant_id,
                license_id,
                limit,
                ..
            } => (*tenant_id, *license_id, limit.as_str(), false),
            ComplianceSignal::ExpiryWarning {
                tenant_id,
                license_id,
                expires_at,
                days_remaining,
            } => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    license_id = %license_id,
                    expires_at = %expires_at,
                    days_remaining,
                    "license expires soon"
                );
                return Ok(None);
            }
        };
        self.flag_limit(tenant_id, license_id, limit, raise, actor)
    }

    fn flag_limit(
        &self,
        tenant_id: TenantId,
        license_id: LicenseId,
        limit: &str,
        raise: bool,
        actor: &str,
    ) -> EntitlementResult<Option<License>> {
        let changed = self.run(|store, _| {
            let current = require_license(store, tenant_id, license_id)?;
            let before = current.value;
            let mut after = before.clone();
            let changed = if raise {
                after.flag_limit(limit)
            } else {
                after.clear_limit(limit)
            };
            if !changed {
                return Ok((Commit::new(Partition::Tenant(tenant_id)), None));
            }
            let commit = Commit::new(Partition::Tenant(tenant_id))
                .put(after.clone(), Some(current.version))
                .audit(draft(
                    Some(tenant_id),
                    AuditAction::LicenseLimitFlag,
                    &license_key(&after),
                    actor,
                    Some(&before),
                    Some(&after),
                ));
            Ok((commit, Some(after)))
        })?;
        if changed.is_some() {
            tracing::info!(
                tenant_id = %tenant_id,
                license_id = %license_id,
                limit,
                flagged = raise,
                "license limit flag changed"
            );
        }
        Ok(changed)
    }
}
