//! Decision sampling.
//!
//! Logging every evaluation would dwarf the mutation log, so decisions are
//! sampled per reason. Denials that point at account state are always kept.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use entl_eval::{Decision, Reason};

use crate::entry::{AuditAction, AuditDraft};

/// Sampling rates per decision reason, each in `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Rate for reasons without an explicit entry.
    #[serde(default)]
    pub default_rate: f64,
    /// Per-reason rates.
    #[serde(default)]
    pub rates: BTreeMap<String, f64>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        let rates = [
            (Reason::LicenseInactive, 1.0),
            (Reason::PlanInsufficient, 1.0),
            (Reason::NotInRollout, 0.01),
        ]
        .into_iter()
        .map(|(reason, rate)| (reason.as_str().to_string(), rate))
        .collect();
        Self {
            default_rate: 0.0,
            rates,
        }
    }
}

impl SamplingConfig {
    /// Rate applied to `reason`, clamped to `[0.0, 1.0]`.
    pub fn rate_for(&self, reason: Reason) -> f64 {
        self.rates
            .get(reason.as_str())
            .copied()
            .unwrap_or(self.default_rate)
            .clamp(0.0, 1.0)
    }
}

/// Decides which decisions are written to the audit log.
#[derive(Debug, Clone, Default)]
pub struct DecisionSampler {
    config: SamplingConfig,
}

impl DecisionSampler {
    /// Sampler with the given rates.
    pub fn new(config: SamplingConfig) -> Self {
        Self { config }
    }

    /// Rates in effect.
    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    /// Whether to keep `decision`.
    pub fn should_sample(&self, decision: &Decision) -> bool {
        let rate = self.config.rate_for(decision.reason);
        if rate >= 1.0 {
            return true;
        }
        if rate <= 0.0 {
            return false;
        }
        rand::thread_rng().gen_bool(rate)
    }

    /// Draft for `decision` if it is sampled.
    pub fn sample(&self, decision: &Decision, actor: &str) -> Option<AuditDraft> {
        if !self.should_sample(decision) {
            return None;
        }
        let subject = format!("decision/{}/{}", decision.tenant_id, decision.feature);
        Some(
            AuditDraft::new(
                Some(decision.tenant_id),
                AuditAction::DecisionSampled,
                subject,
                actor,
            )
            .with_user(decision.user_id.as_str())
            .with_change(None, Some(decision)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entl_core::{FeatureName, TenantId, UserId};

    fn decision(reason: Reason) -> Decision {
        Decision {
            tenant_id: TenantId::new(),
            user_id: UserId::new("alice").unwrap(),
            feature: FeatureName::new("reports").unwrap(),
            allowed: reason.is_allow(),
            reason,
            upgrade_hint: None,
            bucket: Some(12),
            sequence: 3,
        }
    }

    #[test]
    fn account_state_denials_are_always_sampled() {
        let sampler = DecisionSampler::default();
        for _ in 0..100 {
            assert!(sampler.should_sample(&decision(Reason::LicenseInactive)));
            assert!(sampler.should_sample(&decision(Reason::PlanInsufficient)));
        }
    }

    #[test]
    fn unlisted_reasons_use_default_rate() {
        let sampler = DecisionSampler::default();
        for _ in 0..100 {
            assert!(!sampler.should_sample(&decision(Reason::Rollout)));
        }
        let all = DecisionSampler::new(SamplingConfig {
            default_rate: 1.0,
            rates: BTreeMap::new(),
        });
        assert!(all.should_sample(&decision(Reason::Rollout)));
    }

    #[test]
    fn not_in_rollout_is_sampled_rarely() {
        let sampler = DecisionSampler::default();
        let hits = (0..20_000)
            .filter(|_| sampler.should_sample(&decision(Reason::NotInRollout)))
            .count();
        assert!(hits > 50 && hits < 500, "hits = {hits}");
    }

    #[test]
    fn sampled_draft_carries_user_and_decision() {
        let sampler = DecisionSampler::default();
        let d = decision(Reason::LicenseInactive);
        let draft = sampler.sample(&d, "api").unwrap();
        assert_eq!(draft.action, AuditAction::DecisionSampled);
        assert_eq!(draft.user_id.as_deref(), Some("alice"));
        assert_eq!(draft.after.as_ref().unwrap()["reason"], "LICENSE_INACTIVE");
    }
}
