//! Periodic lifecycle sweep.
//!
//! Time-driven transitions have no caller of their own: license expiry,
//! grace-period lapse, and usage reporting. The sweeper runs them on a
//! fixed interval. Each step logs and continues on failure so one bad
//! tenant cannot stall the rest.

use std::time::Duration;

use tokio::task::JoinHandle;

use entl_core::{EntitlementResult, TenantId};
use entl_usage::UsageReport;

use crate::state::AppState;

/// Actor recorded on sweep-driven audit entries.
pub const SWEEP_ACTOR: &str = "system";

/// Counts from one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    pub licenses_expired: usize,
    pub grace_periods_lapsed: usize,
    pub signals: usize,
    pub failures: usize,
}

/// Report usage for one tenant and act on the resulting compliance signals.
///
/// Every signal is attempted; the first failure is returned afterwards.
/// A signal that failed to apply is raised again on the next report.
pub fn report_tenant(
    state: &AppState,
    tenant_id: TenantId,
    actor: &str,
) -> EntitlementResult<UsageReport> {
    let view = state.store.snapshot(tenant_id);
    let report = state.reporter.report(&view, state.store.now());
    let mut first_error = None;
    for signal in &report.signals {
        if let Err(e) = state.manager.apply_signal(signal, actor) {
            tracing::warn!(
                tenant_id = %tenant_id,
                signal = signal.kind(),
                error = %e,
                "compliance signal not applied"
            );
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(report),
    }
}

/// Run every time-driven transition once.
pub fn sweep_once(state: &AppState) -> SweepSummary {
    let mut summary = SweepSummary::default();
    let now = state.store.now();

    match state.manager.expire_licenses(now, SWEEP_ACTOR) {
        Ok(expired) => summary.licenses_expired = expired.len(),
        Err(e) => {
            summary.failures += 1;
            tracing::error!(error = %e, "license expiry sweep failed");
        }
    }
    match state.manager.expire_grace_periods(now, SWEEP_ACTOR) {
        Ok(lapsed) => summary.grace_periods_lapsed = lapsed.len(),
        Err(e) => {
            summary.failures += 1;
            tracing::error!(error = %e, "grace period sweep failed");
        }
    }
    for tenant in state.store.list_tenants() {
        match report_tenant(state, tenant.id, SWEEP_ACTOR) {
            Ok(report) => summary.signals += report.signals.len(),
            Err(e) => {
                summary.failures += 1;
                tracing::warn!(tenant_id = %tenant.id, error = %e, "usage report failed");
            }
        }
    }

    if summary != SweepSummary::default() {
        tracing::info!(
            licenses_expired = summary.licenses_expired,
            grace_periods_lapsed = summary.grace_periods_lapsed,
            signals = summary.signals,
            failures = summary.failures,
            "sweep finished"
        );
    }
    summary
}

/// Sweep every `interval` until the runtime shuts down.
pub fn spawn_sweeper(state: AppState, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let state = state.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || sweep_once(&state)).await {
                tracing::error!(error = %e, "sweep task panicked");
            }
        }
    })
}
