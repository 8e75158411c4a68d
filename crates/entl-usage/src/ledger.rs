//! Metered usage counters.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use entl_core::TenantId;

/// Per-tenant named counters (`customers`, `api_calls`, ...).
#[derive(Debug, Default)]
pub struct UsageLedger {
    counters: RwLock<HashMap<TenantId, BTreeMap<String, u64>>>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount` to a counter and return the new value.
    pub fn record(&self, tenant: TenantId, limit: &str, amount: u64) -> u64 {
        let mut counters = self.counters.write();
        let value = counters
            .entry(tenant)
            .or_default()
            .entry(limit.to_string())
            .or_insert(0);
        *value = value.saturating_add(amount);
        tracing::trace!(tenant_id = %tenant, limit, amount, total = *value, "usage recorded");
        *value
    }

    /// Overwrite a counter with an absolute reading.
    pub fn set(&self, tenant: TenantId, limit: &str, value: u64) {
        self.counters
            .write()
            .entry(tenant)
            .or_default()
            .insert(limit.to_string(), value);
    }

    /// Current value of a counter (0 if never recorded).
    pub fn get(&self, tenant: TenantId, limit: &str) -> u64 {
        self.counters
            .read()
            .get(&tenant)
            .and_then(|c| c.get(limit).copied())
            .unwrap_or(0)
    }

    /// All counters of `tenant`.
    pub fn counters(&self, tenant: TenantId) -> BTreeMap<String, u64> {
        self.counters.read().get(&tenant).cloned().unwrap_or_default()
    }

    /// Drop every counter of `tenant`.
    pub fn reset(&self, tenant: TenantId) {
        self.counters.write().remove(&tenant);
    }
}
