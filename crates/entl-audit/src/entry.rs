//! Audit entries and the drafts they are built from.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use entl_core::{sha256_hex, CanonicalBytes, CanonicalizationError, TenantId, ValidationError};

/// Previous-hash value of the first entry in a chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

// ---------------------------------------------------------------------------
// AuditAction
// ---------------------------------------------------------------------------

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Tenant signed up.
    TenantCreated,
    /// License issued.
    LicenseIssued,
    /// License status moved (suspend, reinstate, expire, revoke).
    LicenseTransition,
    /// License tier changed (upgrade or downgrade).
    LicenseTierChanged,
    /// Compliance flag raised or cleared on a license limit.
    LicenseLimitFlag,
    /// Subscription status moved.
    SubscriptionTransition,
    /// Subscription configuration changed.
    SubscriptionConfigured,
    /// Archive or restore job created or finished.
    JobUpdated,
    /// Activation created.
    ActivationCreated,
    /// Activation ended (deactivated or revoked).
    ActivationEnded,
    /// Activation heartbeat.
    ActivationHeartbeat,
    /// Feature flag created.
    FlagCreated,
    /// Feature flag edited.
    FlagUpdated,
    /// Feature flag deleted.
    FlagDeleted,
    /// Sampled evaluation decision.
    DecisionSampled,
}

impl AuditAction {
    const ALL: [AuditAction; 15] = [
        Self::TenantCreated,
        Self::LicenseIssued,
        Self::LicenseTransition,
        Self::LicenseTierChanged,
        Self::LicenseLimitFlag,
        Self::SubscriptionTransition,
        Self::SubscriptionConfigured,
        Self::JobUpdated,
        Self::ActivationCreated,
        Self::ActivationEnded,
        Self::ActivationHeartbeat,
        Self::FlagCreated,
        Self::FlagUpdated,
        Self::FlagDeleted,
        Self::DecisionSampled,
    ];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TenantCreated => "tenant_created",
            Self::LicenseIssued => "license_issued",
            Self::LicenseTransition => "license_transition",
            Self::LicenseTierChanged => "license_tier_changed",
            Self::LicenseLimitFlag => "license_limit_flag",
            Self::SubscriptionTransition => "subscription_transition",
            Self::SubscriptionConfigured => "subscription_configured",
            Self::JobUpdated => "job_updated",
            Self::ActivationCreated => "activation_created",
            Self::ActivationEnded => "activation_ended",
            Self::ActivationHeartbeat => "activation_heartbeat",
            Self::FlagCreated => "flag_created",
            Self::FlagUpdated => "flag_updated",
            Self::FlagDeleted => "flag_deleted",
            Self::DecisionSampled => "decision_sampled",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ValidationError::Rule(format!("unknown audit action: {s}")))
    }
}

// ---------------------------------------------------------------------------
// AuditDraft
// ---------------------------------------------------------------------------

/// An entry before it is placed in the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditDraft {
    /// Tenant concerned; `None` for global changes.
    pub tenant_id: Option<TenantId>,
    /// End user concerned, if any.
    pub user_id: Option<String>,
    /// What happened.
    pub action: AuditAction,
    /// Key of the record that changed, e.g. `subscription/<tenant>/crm`.
    pub subject: String,
    /// Record state before the change.
    pub before: Option<serde_json::Value>,
    /// Record state after the change.
    pub after: Option<serde_json::Value>,
    /// Who caused the change (operator, `system`, `billing`, ...).
    pub actor: String,
}

impl AuditDraft {
    /// Draft for `action` on `subject`, attributed to `actor`.
    pub fn new(
        tenant_id: Option<TenantId>,
        action: AuditAction,
        subject: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            user_id: None,
            action,
            subject: subject.into(),
            before: None,
            after: None,
            actor: actor.into(),
        }
    }

    /// Attach before/after states. Values that fail to serialize are
    /// recorded as `null`.
    pub fn with_change<T: Serialize>(mut self, before: Option<&T>, after: Option<&T>) -> Self {
        self.before = before.map(to_value);
        self.after = after.map(to_value);
        self
    }

    /// Attach the end user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user_id = Some(user.into());
        self
    }
}

fn to_value<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "audit state serialization failed");
        serde_json::Value::Null
    })
}

// ---------------------------------------------------------------------------
// AuditEntry
// ---------------------------------------------------------------------------

/// One immutable, chained log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Entry identifier.
    pub id: Uuid,
    /// Zero-based position in the chain.
    pub position: u64,
    /// Tenant concerned.
    pub tenant_id: Option<TenantId>,
    /// End user concerned.
    pub user_id: Option<String>,
    /// What happened.
    pub action: AuditAction,
    /// Key of the record that changed.
    pub subject: String,
    /// Record state before the change.
    pub before: Option<serde_json::Value>,
    /// Record state after the change.
    pub after: Option<serde_json::Value>,
    /// Who caused the change.
    pub actor: String,
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
    /// Hash of the preceding entry, [`GENESIS_HASH`] for the first.
    pub previous_hash: String,
    /// Hash of this entry.
    pub entry_hash: String,
}

#[derive(Serialize)]
struct HashedContent<'a> {
    position: u64,
    tenant_id: &'a Option<TenantId>,
    user_id: &'a Option<String>,
    action: AuditAction,
    subject: &'a str,
    before: &'a Option<serde_json::Value>,
    after: &'a Option<serde_json::Value>,
    actor: &'a str,
    timestamp: &'a DateTime<Utc>,
    previous_hash: &'a str,
}

impl AuditEntry {
    /// Place `draft` in the chain after `previous_hash`.
    pub fn seal(
        draft: AuditDraft,
        position: u64,
        previous_hash: String,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, CanonicalizationError> {
        let mut entry = Self {
            id: Uuid::new_v4(),
            position,
            tenant_id: draft.tenant_id,
            user_id: draft.user_id,
            action: draft.action,
            subject: draft.subject,
            before: draft.before,
            after: draft.after,
            actor: draft.actor,
            timestamp,
            previous_hash,
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.compute_hash()?;
        Ok(entry)
    }

    /// Recompute this entry's hash from its content.
    pub fn compute_hash(&self) -> Result<String, CanonicalizationError> {
        let content = HashedContent {
            position: self.position,
            tenant_id: &self.tenant_id,
            user_id: &self.user_id,
            action: self.action,
            subject: &self.subject,
            before: &self.before,
            after: &self.after,
            actor: &self.actor,
            timestamp: &self.timestamp,
            previous_hash: &self.previous_hash,
        };
        Ok(sha256_hex(&CanonicalBytes::new(&content)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft() -> AuditDraft {
        AuditDraft::new(
            Some(TenantId::new()),
            AuditAction::LicenseTransition,
            "license/x",
            "operator",
        )
        .with_change(Some(&json!({"status": "active"})), Some(&json!({"status": "suspended"})))
    }

    #[test]
    fn seal_produces_verifiable_hash() {
        let entry = AuditEntry::seal(draft(), 0, GENESIS_HASH.into(), Utc::now()).unwrap();
        assert_eq!(entry.entry_hash.len(), 64);
        assert_eq!(entry.compute_hash().unwrap(), entry.entry_hash);
    }

    #[test]
    fn tampering_changes_hash() {
        let mut entry = AuditEntry::seal(draft(), 0, GENESIS_HASH.into(), Utc::now()).unwrap();
        entry.after = Some(json!({"status": "active"}));
        assert_ne!(entry.compute_hash().unwrap(), entry.entry_hash);
    }

    #[test]
    fn float_payloads_are_rejected() {
        let d = AuditDraft::new(None, AuditAction::FlagUpdated, "flag/x", "op")
            .with_change(None, Some(&json!({"ratio": 0.5})));
        assert!(AuditEntry::seal(d, 0, GENESIS_HASH.into(), Utc::now()).is_err());
    }

    #[test]
    fn action_names_parse_back() {
        for action in AuditAction::ALL {
            assert_eq!(action.as_str().parse::<AuditAction>().unwrap(), action);
            assert_eq!(
                serde_json::to_string(&action).unwrap(),
                format!("\"{}\"", action.as_str())
            );
        }
        assert!("nope".parse::<AuditAction>().is_err());
    }
}
