//! Feature flag administration.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use entl_audit::AuditAction;
use entl_core::{EntitlementError, EntitlementResult, FeatureName, TenantId, UserId};
use entl_eval::{FeatureFlag, RolloutPercentage};
use entl_store::{Commit, Partition, RecordKey};

use crate::manager::{draft, require_tenant, LifecycleManager};

fn default_enabled() -> bool {
    true
}

/// Operator input for a new flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFlag {
    /// Owning tenant; `None` creates a global flag.
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    pub name: FeatureName,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub rollout_percentage: RolloutPercentage,
    #[serde(default)]
    pub target_user_ids: BTreeSet<UserId>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<NewFlag> for FeatureFlag {
    fn from(new: NewFlag) -> Self {
        FeatureFlag {
            name: new.name,
            tenant_id: new.tenant_id,
            enabled: new.enabled,
            rollout_percentage: new.rollout_percentage,
            target_user_ids: new.target_user_ids,
            expires_at: new.expires_at,
        }
    }
}

fn flag_key(tenant: Option<TenantId>, name: &FeatureName) -> RecordKey {
    RecordKey::Flag {
        tenant,
        name: name.clone(),
    }
}

impl LifecycleManager {
    /// Create a global or tenant flag. Names are unique per scope.
    pub fn create_flag(&self, new: NewFlag, actor: &str) -> EntitlementResult<FeatureFlag> {
        let flag: FeatureFlag = new.into();
        let created = self.run(|store, _| {
            if let Some(tenant) = flag.tenant_id {
                require_tenant(store, tenant)?;
            }
            let key = flag_key(flag.tenant_id, &flag.name);
            if store.get(&key).is_some() {
                return Err(EntitlementError::AlreadyExists {
                    entity: "flag",
                    id: key.to_string(),
                });
            }
            let commit = Commit::new(Partition::from(flag.tenant_id))
                .create(flag.clone())
                .audit(draft(
                    flag.tenant_id,
                    AuditAction::FlagCreated,
                    &key,
                    actor,
                    None,
                    Some(&flag),
                ));
            Ok((commit, flag.clone()))
        })?;
        tracing::info!(
            tenant_id = ?created.tenant_id,
            flag = %created.name,
            rollout = %created.rollout_percentage,
            "flag created"
        );
        Ok(created)
    }

    /// Change the rollout share of a flag.
    pub fn edit_rollout_percentage(
        &self,
        tenant: Option<TenantId>,
        name: &FeatureName,
        percentage: RolloutPercentage,
        actor: &str,
    ) -> EntitlementResult<FeatureFlag> {
        self.update_flag(tenant, name, actor, |flag| {
            flag.rollout_percentage = percentage;
        })
    }

    /// Turn a flag on or off.
    pub fn set_flag_enabled(
        &self,
        tenant: Option<TenantId>,
        name: &FeatureName,
        enabled: bool,
        actor: &str,
    ) -> EntitlementResult<FeatureFlag> {
        self.update_flag(tenant, name, actor, |flag| flag.enabled = enabled)
    }

    /// Replace the allow-list of a flag.
    pub fn set_flag_targets(
        &self,
        tenant: Option<TenantId>,
        name: &FeatureName,
        targets: BTreeSet<UserId>,
        actor: &str,
    ) -> EntitlementResult<FeatureFlag> {
        self.update_flag(tenant, name, actor, |flag| {
            flag.target_user_ids = targets.clone();
        })
    }

    /// Remove a flag. Deleting a tenant flag re-exposes the global flag of
    /// the same name.
    pub fn delete_flag(
        &self,
        tenant: Option<TenantId>,
        name: &FeatureName,
        actor: &str,
    ) -> EntitlementResult<FeatureFlag> {
        let key = flag_key(tenant, name);
        let deleted = self.run(|store, _| {
            let current = store
                .get_flag(tenant, name)
                .ok_or_else(|| EntitlementError::not_found("flag", &key))?;
            let commit = Commit::new(Partition::from(tenant))
                .delete(key.clone(), current.version)
                .audit(draft(
                    tenant,
                    AuditAction::FlagDeleted,
                    &key,
                    actor,
                    Some(&current.value),
                    None,
                ));
            Ok((commit, current.value))
        })?;
        tracing::info!(tenant_id = ?tenant, flag = %name, "flag deleted");
        Ok(deleted)
    }

    fn update_flag(
        &self,
        tenant: Option<TenantId>,
        name: &FeatureName,
        actor: &str,
        mut edit: impl FnMut(&mut FeatureFlag),
    ) -> EntitlementResult<FeatureFlag> {
        let key = flag_key(tenant, name);
        let updated = self.run(|store, _| {
            let current = store
                .get_flag(tenant, name)
                .ok_or_else(|| EntitlementError::not_found("flag", &key))?;
            let before = current.value;
            let mut after = before.clone();
            edit(&mut after);
            if after == before {
                return Ok((Commit::new(Partition::from(tenant)), after));
            }
            let commit = Commit::new(Partition::from(tenant))
                .put(after.clone(), Some(current.version))
                .audit(draft(
                    tenant,
                    AuditAction::FlagUpdated,
                    &key,
                    actor,
                    Some(&before),
                    Some(&after),
                ));
            Ok((commit, after))
        })?;
        tracing::info!(
            tenant_id = ?tenant,
            flag = %name,
            enabled = updated.enabled,
            rollout = %updated.rollout_percentage,
            "flag updated"
        );
        Ok(updated)
    }
}
