//! Activations: binding a license seat to a running application instance.

use rand::RngCore;

use entl_audit::AuditAction;
use entl_core::{ActivationToken, EntitlementError, EntitlementResult, TenantId, ValidationError};
use entl_state::{Activation, ActivationStatus, License};
use entl_store::{Commit, EntitlementStore, Partition, Versioned};

use crate::manager::{activation_key, current_license, draft, LifecycleManager};

fn new_token() -> ActivationToken {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    ActivationToken::from_random_bytes(&bytes)
}

fn require_activation(
    store: &EntitlementStore,
    token: &ActivationToken,
) -> EntitlementResult<Versioned<Activation>> {
    store
        .get_activation(token)
        .ok_or_else(|| EntitlementError::not_found("activation", token))
}

impl LifecycleManager {
    /// Activate `device` on the tenant's live license for `product`.
    ///
    /// The seat check and the `current_activations` increment land in the
    /// same conditional commit, so concurrent activations can never exceed
    /// `max_activations`. A device that already holds an active seat gets
    /// its existing activation back.
    pub fn activate(
        &self,
        tenant_id: TenantId,
        product: &str,
        device_id: &str,
        actor: &str,
    ) -> EntitlementResult<Activation> {
        if device_id.trim().is_empty() {
            return Err(ValidationError::Rule("device id must not be blank".into()).into());
        }
        let activation = self.run(|store, now| {
            let license = current_license(store, tenant_id, product).map_err(|_| {
                EntitlementError::LicenseInactive {
                    status: "missing".into(),
                }
            })?;
            if let Some(existing) = store.list_activations(tenant_id).into_iter().find(|a| {
                a.value.license_id == license.value.id
                    && a.value.device_id == device_id
                    && a.value.is_active()
            }) {
                return Ok((Commit::new(Partition::Tenant(tenant_id)), existing.value));
            }

            let before = license.value;
            let mut after = before.clone();
            after.allocate_activation(now)?;
            let activation = Activation::new(new_token(), tenant_id, after.id, device_id, now);
            let commit = Commit::new(Partition::Tenant(tenant_id))
                .put(after, Some(license.version))
                .create(activation.clone())
                .audit(draft(
                    Some(tenant_id),
                    AuditAction::ActivationCreated,
                    &activation_key(&activation),
                    actor,
                    None,
                    Some(&activation),
                ));
            Ok((commit, activation))
        })?;
        tracing::info!(
            tenant_id = %tenant_id,
            license_id = %activation.license_id,
            device_id = %activation.device_id,
            "device activated"
        );
        Ok(activation)
    }

    /// Release a seat at the device's request.
    pub fn deactivate(
        &self,
        token: &ActivationToken,
        actor: &str,
    ) -> EntitlementResult<Activation> {
        self.end_activation(token, ActivationStatus::Deactivated, "deactivated", actor)
    }

    /// Release a seat at an operator's request.
    pub fn revoke_activation(
        &self,
        token: &ActivationToken,
        actor: &str,
    ) -> EntitlementResult<Activation> {
        self.end_activation(token, ActivationStatus::Revoked, "revoked", actor)
    }

    fn end_activation(
        &self,
        token: &ActivationToken,
        to: ActivationStatus,
        reason: &str,
        actor: &str,
    ) -> EntitlementResult<Activation> {
        let activation = self.run(|store, now| {
            let current = require_activation(store, token)?;
            let tenant_id = current.value.tenant_id;
            let before = current.value;
            let mut after = before.clone();
            after.end(to, now, Some(reason.to_string()))?;
            let mut commit = Commit::new(Partition::Tenant(tenant_id))
                .put(after.clone(), Some(current.version))
                .audit(draft(
                    Some(tenant_id),
                    AuditAction::ActivationEnded,
                    &activation_key(&after),
                    actor,
                    Some(&before),
                    Some(&after),
                ));
            if let Some(license) = store.get_license_by_id(after.license_id) {
                if license.value.current_activations > 0 {
                    let mut released: License = license.value;
                    released.release_activation();
                    commit = commit.put(released, Some(license.version));
                }
            }
            Ok((commit, after))
        })?;
        tracing::info!(
            tenant_id = %activation.tenant_id,
            status = %activation.status,
            "activation ended"
        );
        Ok(activation)
    }

    /// Record a heartbeat from an active device. Fails once the license is
    /// no longer active so the instance knows to stop.
    pub fn heartbeat(
        &self,
        token: &ActivationToken,
        actor: &str,
    ) -> EntitlementResult<Activation> {
        self.run(|store, now| {
            let current = require_activation(store, token)?;
            if !current.value.is_active() {
                return Err(EntitlementError::InvalidTransition {
                    from: current.value.status.to_string(),
                    to: ActivationStatus::Active.to_string(),
                    reason: "activation has ended".into(),
                });
            }
            let license = store
                .get_license_by_id(current.value.license_id)
                .ok_or_else(|| EntitlementError::not_found("license", current.value.license_id))?;
            license.value.require_active(now)?;

            let tenant_id = current.value.tenant_id;
            let before = current.value;
            let mut after = before.clone();
            after.last_heartbeat = now;
            let commit = Commit::new(Partition::Tenant(tenant_id))
                .put(after.clone(), Some(current.version))
                .audit(draft(
                    Some(tenant_id),
                    AuditAction::ActivationHeartbeat,
                    &activation_key(&after),
                    actor,
                    Some(&before),
                    Some(&after),
                ));
            Ok((commit, after))
        })
    }
}
