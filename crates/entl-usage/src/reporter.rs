//! Usage snapshots and compliance signals.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use entl_core::{LicenseId, TenantId};
use entl_eval::TenantSnapshot;
use entl_state::{License, LicenseStatus, ACTIVATIONS_LIMIT};

use crate::ledger::UsageLedger;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Reporter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    /// Warn when a license expires within this many days.
    pub expiry_warning_days: u32,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            expiry_warning_days: 14,
        }
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// One limit's usage at report time, as handed to billing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub tenant_id: TenantId,
    pub license_id: LicenseId,
    pub product: String,
    pub limit_name: String,
    pub current: u64,
    pub max: u64,
    pub reported_at: DateTime<Utc>,
}

impl UsageSnapshot {
    pub fn is_exceeded(&self) -> bool {
        self.current > self.max
    }
}

/// A compliance condition for the lifecycle manager to act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum ComplianceSignal {
    /// A limit went over its maximum.
    LimitExceeded {
        tenant_id: TenantId,
        license_id: LicenseId,
        limit: String,
        current: u64,
        max: u64,
    },
    /// A previously exceeded limit is back within its maximum.
    LimitCleared {
        tenant_id: TenantId,
        license_id: LicenseId,
        limit: String,
        current: u64,
        max: u64,
    },
    /// The license term ends soon.
    ExpiryWarning {
        tenant_id: TenantId,
        license_id: LicenseId,
        expires_at: DateTime<Utc>,
        days_remaining: i64,
    },
}

impl ComplianceSignal {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            Self::LimitExceeded { tenant_id, .. }
            | Self::LimitCleared { tenant_id, .. }
            | Self::ExpiryWarning { tenant_id, .. } => *tenant_id,
        }
    }

    pub fn license_id(&self) -> LicenseId {
        match self {
            Self::LimitExceeded { license_id, .. }
            | Self::LimitCleared { license_id, .. }
            | Self::ExpiryWarning { license_id, .. } => *license_id,
        }
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LimitExceeded { .. } => "limit_exceeded",
            Self::LimitCleared { .. } => "limit_cleared",
            Self::ExpiryWarning { .. } => "expiry_warning",
        }
    }
}

/// Result of one [`UsageReporter::report`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    pub snapshots: Vec<UsageSnapshot>,
    pub signals: Vec<ComplianceSignal>,
}

// ---------------------------------------------------------------------------
// Billing sink
// ---------------------------------------------------------------------------

/// Billing collaborator. Receives usage; must not block.
pub trait BillingSink: Send + Sync {
    fn record_usage(&self, snapshot: &UsageSnapshot);
}

/// Sink that emits each snapshot as a structured `billing` log event and a
/// usage gauge, for a log shipper or scraper to forward.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingBillingSink;

impl BillingSink for TracingBillingSink {
    fn record_usage(&self, snapshot: &UsageSnapshot) {
        metrics::gauge!("entl_usage_current", "limit" => snapshot.limit_name.clone())
            .set(snapshot.current as f64);
        tracing::info!(
            target: "billing",
            tenant_id = %snapshot.tenant_id,
            license_id = %snapshot.license_id,
            product = %snapshot.product,
            limit = %snapshot.limit_name,
            current = snapshot.current,
            max = snapshot.max,
            reported_at = %snapshot.reported_at,
            "usage reported"
        );
    }
}

/// Sink that keeps every snapshot in memory. Used by tests.
#[derive(Debug, Default)]
pub struct MemoryBillingSink {
    received: RwLock<Vec<UsageSnapshot>>,
}

impl MemoryBillingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything received so far.
    pub fn snapshots(&self) -> Vec<UsageSnapshot> {
        self.received.read().clone()
    }

    /// Latest snapshot per (tenant, license, limit).
    pub fn latest(&self, tenant: TenantId) -> Vec<UsageSnapshot> {
        let mut latest: HashMap<(LicenseId, String), UsageSnapshot> = HashMap::new();
        for snapshot in self.received.read().iter().filter(|s| s.tenant_id == tenant) {
            latest.insert(
                (snapshot.license_id, snapshot.limit_name.clone()),
                snapshot.clone(),
            );
        }
        let mut out: Vec<_> = latest.into_values().collect();
        out.sort_by(|a, b| (&a.product, &a.limit_name).cmp(&(&b.product, &b.limit_name)));
        out
    }
}

impl BillingSink for MemoryBillingSink {
    fn record_usage(&self, snapshot: &UsageSnapshot) {
        self.received.write().push(snapshot.clone());
    }
}

// ---------------------------------------------------------------------------
// Reporter
// ---------------------------------------------------------------------------

/// Computes usage against license limits and raises compliance signals.
///
/// Limit signals are edge-triggered against the license's persisted
/// `exceeded_limits`: a limit keeps signalling on every run until the
/// lifecycle manager has recorded the flag (or cleared it).
pub struct UsageReporter {
    ledger: Arc<UsageLedger>,
    sink: Arc<dyn BillingSink>,
    config: UsageConfig,
    warned: Mutex<HashSet<LicenseId>>,
}

impl std::fmt::Debug for UsageReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageReporter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl UsageReporter {
    pub fn new(ledger: Arc<UsageLedger>, sink: Arc<dyn BillingSink>, config: UsageConfig) -> Self {
        Self {
            ledger,
            sink,
            config,
            warned: Mutex::new(HashSet::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<UsageLedger> {
        &self.ledger
    }

    pub fn config(&self) -> &UsageConfig {
        &self.config
    }

    /// Report on every live (active or suspended) license in `view`.
    pub fn report(&self, view: &TenantSnapshot, now: DateTime<Utc>) -> UsageReport {
        let mut report = UsageReport::default();
        for license in view.licenses.iter().filter(|l| {
            matches!(
                l.effective_status(now),
                LicenseStatus::Active | LicenseStatus::Suspended
            )
        }) {
            self.report_license(license, now, &mut report);
        }

        for snapshot in &report.snapshots {
            self.sink.record_usage(snapshot);
        }
        for signal in &report.signals {
            metrics::counter!("entl_compliance_signals_total", "signal" => signal.kind())
                .increment(1);
            tracing::info!(
                tenant_id = %signal.tenant_id(),
                license_id = %signal.license_id(),
                signal = signal.kind(),
                "compliance signal raised"
            );
        }
        report
    }

    fn report_license(&self, license: &License, now: DateTime<Utc>, report: &mut UsageReport) {
        let mut readings: Vec<(String, u64, u64)> = license
            .limits
            .iter()
            .map(|(name, max)| (name.clone(), self.ledger.get(license.tenant_id, name), *max))
            .collect();
        readings.push((
            ACTIVATIONS_LIMIT.to_string(),
            u64::from(license.current_activations),
            u64::from(license.max_activations),
        ));

        for (limit, current, max) in readings {
            let over = current > max;
            let was_over = license.exceeded_limits.contains(&limit);
            if over != was_over {
                let signal = if over {
                    ComplianceSignal::LimitExceeded {
                        tenant_id: license.tenant_id,
                        license_id: license.id,
                        limit: limit.clone(),
                        current,
                        max,
                    }
                } else {
                    ComplianceSignal::LimitCleared {
                        tenant_id: license.tenant_id,
                        license_id: license.id,
                        limit: limit.clone(),
                        current,
                        max,
                    }
                };
                report.signals.push(signal);
            }
            report.snapshots.push(UsageSnapshot {
                tenant_id: license.tenant_id,
                license_id: license.id,
                product: license.product.clone(),
                limit_name: limit,
                current,
                max,
                reported_at: now,
            });
        }

        if license.status == LicenseStatus::Active {
            if let Some(expires_at) = license.expires_at {
                let window = Duration::days(i64::from(self.config.expiry_warning_days));
                if expires_at > now
                    && expires_at <= now + window
                    && self.warned.lock().insert(license.id)
                {
                    report.signals.push(ComplianceSignal::ExpiryWarning {
                        tenant_id: license.tenant_id,
                        license_id: license.id,
                        expires_at,
                        days_remaining: (expires_at - now).num_days(),
                    });
                }
            }
        }
    }
}
