//! The lifecycle manager: shared plumbing plus tenant and license
//! administration.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use entl_audit::{AuditAction, AuditDraft};
use entl_core::{
    EntitlementError, EntitlementResult, LicenseId, PlanTier, TenantId, ValidationError,
};
use entl_state::{
    Activation, ActivationStatus, License, LicenseStatus, NewLicense, Status, SuspensionReason,
    Tenant, DEFAULT_PRODUCT,
};
use entl_store::{transact, Commit, EntitlementStore, Partition, RecordKey, Versioned};

use crate::archiver::DataArchiver;
use crate::config::LifecycleConfig;

/// Orchestrates every entitlement mutation over a shared store.
pub struct LifecycleManager {
    pub(crate) store: Arc<EntitlementStore>,
    pub(crate) archiver: Arc<dyn DataArchiver>,
    pub(crate) config: LifecycleConfig,
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy)]
enum TierChange {
    Upgrade,
    Downgrade,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<EntitlementStore>,
        archiver: Arc<dyn DataArchiver>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            archiver,
            config,
        }
    }

    pub fn store(&self) -> &Arc<EntitlementStore> {
        &self.store
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Read-compute-commit with the configured retry budget. `compute`
    /// receives the store and the commit timestamp of the attempt.
    pub(crate) fn run<T>(
        &self,
        mut compute: impl FnMut(&EntitlementStore, DateTime<Utc>) -> EntitlementResult<(Commit, T)>,
    ) -> EntitlementResult<T> {
        let (_, value) = transact(&self.store, self.config.max_commit_attempts, |store| {
            compute(store, store.now())
        })?;
        Ok(value)
    }

    // ── Tenants ─────────────────────────────────────────────────────

    /// Register a tenant on `plan`.
    pub fn create_tenant(
        &self,
        name: &str,
        plan: PlanTier,
        actor: &str,
    ) -> EntitlementResult<Tenant> {
        if name.trim().is_empty() {
            return Err(ValidationError::Rule("tenant name must not be blank".into()).into());
        }
        let tenant = self.run(|_, now| {
            let tenant = Tenant::new(name.trim(), plan, now);
            let commit = Commit::new(Partition::Tenant(tenant.id))
                .create(tenant.clone())
                .audit(draft(
                    Some(tenant.id),
                    AuditAction::TenantCreated,
                    &tenant_key(&tenant),
                    actor,
                    None,
                    Some(&tenant),
                ));
            Ok((commit, tenant))
        })?;
        tracing::info!(tenant_id = %tenant.id, plan = %plan, "tenant created");
        Ok(tenant)
    }

    // ── Licenses ────────────────────────────────────────────────────

    /// Issue a license. A live license for the same product is expired and
    /// its activations revoked in the same commit.
    pub fn issue_license(
        &self,
        tenant_id: TenantId,
        request: NewLicense,
        actor: &str,
    ) -> EntitlementResult<License> {
        if request.product.trim().is_empty() {
            return Err(ValidationError::Rule("license product must not be blank".into()).into());
        }
        let license = self.run(|store, now| {
            let tenant = require_tenant(store, tenant_id)?;
            let issued = License::issue(tenant_id, request.clone(), now);
            let mut commit = Commit::new(Partition::Tenant(tenant_id));

            for prior in store
                .list_licenses(tenant_id)
                .into_iter()
                .filter(|l| l.value.product == request.product && !l.value.status.is_terminal())
            {
                let before = prior.value;
                let mut after = before.clone();
                after.transition(
                    LicenseStatus::Expired,
                    now,
                    Some(format!("superseded by license {}", issued.id)),
                )?;
                commit = end_activations(
                    store,
                    commit,
                    &before,
                    ActivationStatus::Revoked,
                    "license superseded",
                    now,
                    actor,
                )?;
                commit = commit
                    .put(after.clone(), Some(prior.version))
                    .audit(draft(
                        Some(tenant_id),
                        AuditAction::LicenseTransition,
                        &license_key(&after),
                        actor,
                        Some(&before),
                        Some(&after),
                    ));
            }

            if issued.product == DEFAULT_PRODUCT && tenant.value.plan != issued.tier {
                let mut updated = tenant.value;
                updated.plan = issued.tier;
                commit = commit.put(updated, Some(tenant.version));
            }

            commit = commit.create(issued.clone()).audit(draft(
                Some(tenant_id),
                AuditAction::LicenseIssued,
                &license_key(&issued),
                actor,
                None,
                Some(&issued),
            ));
            Ok((commit, issued))
        })?;
        tracing::info!(
            tenant_id = %tenant_id,
            license_id = %license.id,
            product = %license.product,
            tier = %license.tier,
            "license issued"
        );
        Ok(license)
    }

    /// Suspend an active license.
    pub fn suspend_license(
        &self,
        tenant_id: TenantId,
        license_id: LicenseId,
        reason: SuspensionReason,
        actor: &str,
    ) -> EntitlementResult<License> {
        self.mutate_license(tenant_id, license_id, actor, None, |license, now| {
            license.suspend(reason, now)
        })
    }

    /// Reinstate a suspended license.
    pub fn reinstate_license(
        &self,
        tenant_id: TenantId,
        license_id: LicenseId,
        actor: &str,
    ) -> EntitlementResult<License> {
        self.mutate_license(tenant_id, license_id, actor, None, |license, now| {
            license.reinstate(now)
        })
    }

    /// Revoke a license and every activation bound to it.
    pub fn revoke_license(
        &self,
        tenant_id: TenantId,
        license_id: LicenseId,
        actor: &str,
    ) -> EntitlementResult<License> {
        self.mutate_license(
            tenant_id,
            license_id,
            actor,
            Some(ActivationStatus::Revoked),
            |license, now| license.transition(LicenseStatus::Revoked, now, Some("revoked".into())),
        )
    }

    fn mutate_license(
        &self,
        tenant_id: TenantId,
        license_id: LicenseId,
        actor: &str,
        end_with: Option<ActivationStatus>,
        mut change: impl FnMut(&mut License, DateTime<Utc>) -> EntitlementResult<()>,
    ) -> EntitlementResult<License> {
        let license = self.run(|store, now| {
            let current = require_license(store, tenant_id, license_id)?;
            let before = current.value;
            let mut after = before.clone();
            change(&mut after, now)?;
            let mut commit = Commit::new(Partition::Tenant(tenant_id));
            if let Some(to) = end_with {
                commit = end_activations(store, commit, &before, to, "license ended", now, actor)?;
            }
            commit = commit
                .put(after.clone(), Some(current.version))
                .audit(draft(
                    Some(tenant_id),
                    AuditAction::LicenseTransition,
                    &license_key(&after),
                    actor,
                    Some(&before),
                    Some(&after),
                ));
            Ok((commit, after))
        })?;
        tracing::info!(
            tenant_id = %tenant_id,
            license_id = %license_id,
            status = %license.status,
            "license status changed"
        );
        Ok(license)
    }

    /// Expire every live license whose term, grace period included, has
    /// ended at `now`, ending its activations.
    pub fn expire_licenses(
        &self,
        now: DateTime<Utc>,
        actor: &str,
    ) -> EntitlementResult<Vec<License>> {
        let mut expired = Vec::new();
        for tenant in self.store.list_tenants() {
            let due: Vec<LicenseId> = self
                .store
                .list_licenses(tenant.id)
                .into_iter()
                .filter(|l| is_past_term(&l.value, now))
                .map(|l| l.value.id)
                .collect();
            for license_id in due {
                let outcome = self.run(|store, _| {
                    let current = require_license(store, tenant.id, license_id)?;
                    if !is_past_term(&current.value, now) {
                        return Ok((Commit::new(Partition::Tenant(tenant.id)), None));
                    }
                    let before = current.value;
                    let mut after = before.clone();
                    after.transition(LicenseStatus::Expired, now, Some("term ended".into()))?;
                    let commit = end_activations(
                        store,
                        Commit::new(Partition::Tenant(tenant.id)),
                        &before,
                        ActivationStatus::Revoked,
                        "license expired",
                        now,
                        actor,
                    )?
                    .put(after.clone(), Some(current.version))
                    .audit(draft(
                        Some(tenant.id),
                        AuditAction::LicenseTransition,
                        &license_key(&after),
                        actor,
                        Some(&before),
                        Some(&after),
                    ));
                    Ok((commit, Some(after)))
                })?;
                if let Some(license) = outcome {
                    tracing::info!(
                        tenant_id = %tenant.id,
                        license_id = %license.id,
                        "license expired"
                    );
                    expired.push(license);
                }
            }
        }
        Ok(expired)
    }

    /// Move the tenant's live default-product license (and the tenant
    /// plan) up to `tier`.
    pub fn upgrade_plan(
        &self,
        tenant_id: TenantId,
        tier: PlanTier,
        actor: &str,
    ) -> EntitlementResult<License> {
        self.change_tier(tenant_id, tier, TierChange::Upgrade, actor)
    }

    /// Move the tenant's live default-product license (and the tenant
    /// plan) down to `tier`.
    pub fn downgrade_plan(
        &self,
        tenant_id: TenantId,
        tier: PlanTier,
        actor: &str,
    ) -> EntitlementResult<License> {
        self.change_tier(tenant_id, tier, TierChange::Downgrade, actor)
    }

    fn change_tier(
        &self,
        tenant_id: TenantId,
        tier: PlanTier,
        direction: TierChange,
        actor: &str,
    ) -> EntitlementResult<License> {
        let license = self.run(|store, _| {
            let tenant = require_tenant(store, tenant_id)?;
            let current = current_license(store, tenant_id, DEFAULT_PRODUCT)?;
            let valid = match direction {
                TierChange::Upgrade => tier > current.value.tier,
                TierChange::Downgrade => tier < current.value.tier,
            };
            if !valid {
                let verb = match direction {
                    TierChange::Upgrade => "upgrade",
                    TierChange::Downgrade => "downgrade",
                };
                return Err(ValidationError::Rule(format!(
                    "cannot {verb} from {} to {tier}",
                    current.value.tier
                ))
                .into());
            }
            let before = current.value;
            let mut after = before.clone();
            after.tier = tier;
            let mut commit = Commit::new(Partition::Tenant(tenant_id))
                .put(after.clone(), Some(current.version))
                .audit(draft(
                    Some(tenant_id),
                    AuditAction::LicenseTierChanged,
                    &license_key(&after),
                    actor,
                    Some(&before),
                    Some(&after),
                ));
            if tenant.value.plan != tier {
                let mut updated = tenant.value;
                updated.plan = tier;
                commit = commit.put(updated, Some(tenant.version));
            }
            Ok((commit, after))
        })?;
        tracing::info!(tenant_id = %tenant_id, tier = %tier, "plan changed");
        Ok(license)
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

pub(crate) fn draft<T: Serialize>(
    tenant: Option<TenantId>,
    action: AuditAction,
    key: &RecordKey,
    actor: &str,
    before: Option<&T>,
    after: Option<&T>,
) -> AuditDraft {
    AuditDraft::new(tenant, action, key.to_string(), actor).with_change(before, after)
}

pub(crate) fn tenant_key(tenant: &Tenant) -> RecordKey {
    RecordKey::Tenant { tenant: tenant.id }
}

pub(crate) fn license_key(license: &License) -> RecordKey {
    RecordKey::License {
        tenant: license.tenant_id,
        id: license.id,
    }
}

pub(crate) fn activation_key(activation: &Activation) -> RecordKey {
    RecordKey::Activation {
        tenant: activation.tenant_id,
        token: activation.token.clone(),
    }
}

pub(crate) fn require_tenant(
    store: &EntitlementStore,
    tenant: TenantId,
) -> EntitlementResult<Versioned<Tenant>> {
    store
        .get_tenant(tenant)
        .ok_or_else(|| EntitlementError::not_found("tenant", tenant))
}

pub(crate) fn require_license(
    store: &EntitlementStore,
    tenant: TenantId,
    id: LicenseId,
) -> EntitlementResult<Versioned<License>> {
    store
        .get_license_by_id(id)
        .filter(|l| l.value.tenant_id == tenant)
        .ok_or_else(|| EntitlementError::not_found("license", id))
}

/// The live (active or suspended) license of `tenant` for `product`,
/// newest first if several exist.
pub(crate) fn current_license(
    store: &EntitlementStore,
    tenant: TenantId,
    product: &str,
) -> EntitlementResult<Versioned<License>> {
    store
        .list_licenses(tenant)
        .into_iter()
        .filter(|l| l.value.product == product && !l.value.status.is_terminal())
        .max_by_key(|l| l.value.effective_at)
        .ok_or_else(|| EntitlementError::not_found("license", format!("{tenant}/{product}")))
}

fn is_past_term(license: &License, now: DateTime<Utc>) -> bool {
    !license.status.is_terminal() && license.effective_status(now) == LicenseStatus::Expired
}

/// Add writes ending every active activation of `license` to `commit`.
pub(crate) fn end_activations(
    store: &EntitlementStore,
    mut commit: Commit,
    license: &License,
    to: ActivationStatus,
    reason: &str,
    now: DateTime<Utc>,
    actor: &str,
) -> EntitlementResult<Commit> {
    for activation in store
        .list_activations(license.tenant_id)
        .into_iter()
        .filter(|a| a.value.license_id == license.id && a.value.is_active())
    {
        let before = activation.value;
        let mut after = before.clone();
        after.end(to, now, Some(reason.to_string()))?;
        commit = commit
            .put(after.clone(), Some(activation.version))
            .audit(draft(
                Some(license.tenant_id),
                AuditAction::ActivationEnded,
                &activation_key(&after),
                actor,
                Some(&before),
                Some(&after),
            ));
    }
    Ok(commit)
}
