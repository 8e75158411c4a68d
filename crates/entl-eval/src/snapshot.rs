//! # Tenant Snapshots
//!
//! Immutable per-tenant view that evaluation runs against. Caches hold one
//! behind an `Arc` and replace it wholesale when an event arrives; a
//! snapshot is never mutated once published.
//!
//! Two sequence numbers tag a snapshot: the tenant partition's and the
//! global partition's (global flags), each the number of the last commit
//! folded in.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use entl_core::{AppId, FeatureName, PlanTier, TenantId};
use entl_state::{License, LicenseStatus, Subscription, Tenant};

use crate::catalog::FeatureCatalog;
use crate::flag::FeatureFlag;

/// Everything evaluation needs to know about one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantSnapshot {
    /// Tenant the snapshot describes.
    pub tenant_id: TenantId,
    /// Last tenant-partition commit folded in.
    pub sequence: u64,
    /// Last global-partition commit folded in.
    #[serde(default)]
    pub global_sequence: u64,
    /// The tenant record, once created.
    #[serde(default)]
    pub tenant: Option<Tenant>,
    /// Licenses, current and historical.
    #[serde(default)]
    pub licenses: Vec<License>,
    /// Subscriptions by app.
    #[serde(default)]
    pub subscriptions: BTreeMap<AppId, Subscription>,
    /// Global flags.
    #[serde(default)]
    pub global_flags: BTreeMap<FeatureName, FeatureFlag>,
    /// Tenant-scoped flags, overriding globals of the same name.
    #[serde(default)]
    pub tenant_flags: BTreeMap<FeatureName, FeatureFlag>,
    /// Feature catalog in effect.
    #[serde(default)]
    pub catalog: FeatureCatalog,
}

impl TenantSnapshot {
    /// Empty snapshot at sequence 0.
    pub fn empty(tenant_id: TenantId, catalog: FeatureCatalog) -> Self {
        Self {
            tenant_id,
            sequence: 0,
            global_sequence: 0,
            tenant: None,
            licenses: Vec::new(),
            subscriptions: BTreeMap::new(),
            global_flags: BTreeMap::new(),
            tenant_flags: BTreeMap::new(),
            catalog,
        }
    }

    /// Effective flag: tenant override first, then global.
    pub fn flag(&self, name: &FeatureName) -> Option<&FeatureFlag> {
        self.tenant_flags
            .get(name)
            .or_else(|| self.global_flags.get(name))
    }

    /// All effective flags, tenant overrides applied.
    pub fn effective_flags(&self) -> BTreeMap<FeatureName, FeatureFlag> {
        let mut flags = self.global_flags.clone();
        flags.extend(
            self.tenant_flags
                .iter()
                .map(|(name, flag)| (name.clone(), flag.clone())),
        );
        flags
    }

    /// The license that gates `product`: the stored-active one if present,
    /// otherwise the most recently issued non-active one, so a denial can
    /// report its status.
    pub fn license_for(&self, product: &str) -> Option<&License> {
        let mut latest: Option<&License> = None;
        for license in self.licenses.iter().filter(|l| l.product == product) {
            if license.status == LicenseStatus::Active {
                return Some(license);
            }
            if latest.map_or(true, |l| license.effective_at >= l.effective_at) {
                latest = Some(license);
            }
        }
        latest
    }

    /// Tier to compare feature minimums against.
    pub fn tier_for(&self, product: &str) -> PlanTier {
        self.license_for(product)
            .map(|l| l.tier)
            .or_else(|| self.tenant.as_ref().map(|t| t.plan))
            .unwrap_or_default()
    }

    /// Subscription to `app`, if any.
    pub fn subscription(&self, app: &AppId) -> Option<&Subscription> {
        self.subscriptions.get(app)
    }

    // ── Builders used when folding events in ────────────────────────

    /// Replace or insert the tenant record.
    pub fn put_tenant(&mut self, tenant: Tenant) {
        self.tenant = Some(tenant);
    }

    /// Replace or insert a license by id.
    pub fn put_license(&mut self, license: License) {
        match self.licenses.iter_mut().find(|l| l.id == license.id) {
            Some(existing) => *existing = license,
            None => self.licenses.push(license),
        }
    }

    /// Replace or insert a subscription.
    pub fn put_subscription(&mut self, subscription: Subscription) {
        self.subscriptions
            .insert(subscription.app_id.clone(), subscription);
    }

    /// Replace or insert a flag, global or tenant-scoped.
    pub fn put_flag(&mut self, flag: FeatureFlag) {
        match flag.tenant_id {
            Some(_) => self.tenant_flags.insert(flag.name.clone(), flag),
            None => self.global_flags.insert(flag.name.clone(), flag),
        };
    }

    /// Remove a flag.
    pub fn remove_flag(&mut self, tenant: Option<TenantId>, name: &FeatureName) {
        match tenant {
            Some(_) => self.tenant_flags.remove(name),
            None => self.global_flags.remove(name),
        };
    }

    /// Next instant after `now` at which an active license stops granting
    /// access. Callers that cache decisions must drop them by then.
    pub fn next_license_deadline(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.licenses
            .iter()
            .filter(|l| l.status == LicenseStatus::Active)
            .filter_map(License::hard_expiry)
            .filter(|at| *at > now)
            .min()
    }
}
