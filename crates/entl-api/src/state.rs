//! # Application State
//!
//! Shared state for the Axum application, passed to every handler via the
//! `State` extractor. Cloning is cheap: everything sits behind an `Arc`.
//!
//! The in-memory [`EntitlementStore`] is authoritative at runtime. When a
//! database is configured, commits are persisted write-behind by
//! [`crate::db::writer`] and the store is hydrated on startup.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::RwLock;
use sqlx::PgPool;

use entl_audit::{DecisionSampler, SamplingConfig};
use entl_bus::{spawn_follower, PropagationBus, TenantCache, DEFAULT_CHANNEL_CAPACITY};
use entl_core::{Clock, TenantId};
use entl_eval::FeatureCatalog;
use entl_lifecycle::{AnnouncingArchiver, DataArchiver, LifecycleConfig, LifecycleManager};
use entl_store::{EntitlementStore, Partition};
use entl_usage::{BillingSink, TracingBillingSink, UsageConfig, UsageLedger, UsageReporter};

use crate::db::writer::PersistenceHandle;

// -- Configuration ------------------------------------------------------------

/// Runtime configuration, read from the environment by the binary.
#[derive(Clone)]
pub struct AppConfig {
    /// Listen port (`PORT`, default 8080).
    pub port: u16,
    /// Bearer token (`AUTH_TOKEN`). `None` disables authentication.
    pub auth_token: Option<String>,
    /// Postgres URL (`DATABASE_URL`). `None` runs in memory only.
    pub database_url: Option<String>,
    /// Catalog YAML path (`ENTL_CATALOG`).
    pub catalog_path: Option<PathBuf>,
    /// Lifecycle settings; `GRACE_DAYS` overrides the grace period.
    pub lifecycle: LifecycleConfig,
    /// Usage reporting settings.
    pub usage: UsageConfig,
    /// Decision sampling rates.
    pub sampling: SamplingConfig,
    /// Seconds between sweeps (`SWEEP_INTERVAL_SECS`, default 60).
    pub sweep_interval_secs: u64,
    /// Emit JSON logs (`LOG_FORMAT=json`).
    pub json_logs: bool,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("catalog_path", &self.catalog_path)
            .field("lifecycle", &self.lifecycle)
            .field("usage", &self.usage)
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .field("json_logs", &self.json_logs)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            auth_token: None,
            database_url: None,
            catalog_path: None,
            lifecycle: LifecycleConfig::default(),
            usage: UsageConfig::default(),
            sampling: SamplingConfig::default(),
            sweep_interval_secs: 60,
            json_logs: false,
        }
    }
}

/// A malformed environment variable.
#[derive(Debug, thiserror::Error)]
#[error("invalid value for {name}: {value:?}")]
pub struct ConfigError {
    pub name: &'static str,
    pub value: String,
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, defaulting anything unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            name: &'static str,
        ) -> Result<Option<T>, ConfigError> {
            match lookup(name) {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| ConfigError { name, value }),
            }
        }
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let defaults = Self::default();
        let mut lifecycle = defaults.lifecycle.clone();
        if let Some(days) = parsed(&lookup, "GRACE_DAYS")? {
            lifecycle.grace_days = days;
        }
        Ok(Self {
            port: parsed(&lookup, "PORT")?.unwrap_or(defaults.port),
            auth_token: non_empty("AUTH_TOKEN"),
            database_url: non_empty("DATABASE_URL"),
            catalog_path: non_empty("ENTL_CATALOG").map(PathBuf::from),
            lifecycle,
            usage: defaults.usage,
            sampling: defaults.sampling,
            sweep_interval_secs: parsed(&lookup, "SWEEP_INTERVAL_SECS")?
                .unwrap_or(defaults.sweep_interval_secs),
            json_logs: lookup("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
        })
    }
}

// -- Tenant caches ------------------------------------------------------------

/// One [`TenantCache`] per tenant evaluated through this instance, each
/// kept current by a follower task on the propagation bus.
#[derive(Default)]
pub struct CacheRegistry {
    caches: RwLock<HashMap<TenantId, Arc<TenantCache>>>,
}

impl CacheRegistry {
    /// The tenant's cache, created and subscribed on first use. Must be
    /// called from within a Tokio runtime.
    pub fn get_or_follow(
        &self,
        tenant: TenantId,
        store: &Arc<EntitlementStore>,
        bus: &PropagationBus,
    ) -> Arc<TenantCache> {
        if let Some(cache) = self.caches.read().get(&tenant) {
            return Arc::clone(cache);
        }
        let mut caches = self.caches.write();
        Arc::clone(caches.entry(tenant).or_insert_with(|| {
            let cache = Arc::new(TenantCache::new(store.snapshot(tenant)));
            spawn_follower(Arc::clone(&cache), bus.subscribe(tenant), Arc::clone(store));
            tracing::debug!(tenant_id = %tenant, "tenant cache created");
            cache
        }))
    }

    /// Tenants with a live cache.
    pub fn len(&self) -> usize {
        self.caches.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.read().is_empty()
    }
}

// -- AppState -----------------------------------------------------------------

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<EntitlementStore>,
    pub manager: Arc<LifecycleManager>,
    pub bus: Arc<PropagationBus>,
    pub caches: Arc<CacheRegistry>,
    pub reporter: Arc<UsageReporter>,
    pub sampler: Arc<DecisionSampler>,
    /// Present when a Prometheus recorder is installed.
    pub prometheus: Option<PrometheusHandle>,
    pub db_pool: Option<PgPool>,
    /// Present when commits are persisted.
    pub persistence: Option<PersistenceHandle>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("caches", &self.caches.len())
            .field("db", &self.db_pool.is_some())
            .finish()
    }
}

/// Collaborators wired into [`AppState::build`].
///
/// The defaults hold nothing in memory: jobs are announced and left as
/// pending records for a worker polling `GET /v1/jobs`, and usage goes to
/// the `billing` log target.
pub struct Collaborators {
    pub clock: Option<Arc<dyn Clock>>,
    pub archiver: Arc<dyn DataArchiver>,
    pub billing: Arc<dyn BillingSink>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            clock: None,
            archiver: Arc::new(AnnouncingArchiver),
            billing: Arc::new(TracingBillingSink),
        }
    }
}

impl AppState {
    /// In-memory state with default configuration and an empty catalog.
    pub fn new() -> Self {
        Self::build(AppConfig::default(), FeatureCatalog::default(), Collaborators::default())
    }

    /// Wire the store, bus, lifecycle manager and reporter together.
    pub fn build(config: AppConfig, catalog: FeatureCatalog, collaborators: Collaborators) -> Self {
        let store = Arc::new(match collaborators.clock {
            Some(clock) => EntitlementStore::with_clock(catalog, clock),
            None => EntitlementStore::new(catalog),
        });
        let bus = Arc::new(PropagationBus::new(DEFAULT_CHANNEL_CAPACITY));
        store.register_observer(bus.clone());

        let manager = Arc::new(LifecycleManager::new(
            Arc::clone(&store),
            collaborators.archiver,
            config.lifecycle.clone(),
        ));
        let reporter = Arc::new(UsageReporter::new(
            Arc::new(UsageLedger::new()),
            collaborators.billing,
            config.usage.clone(),
        ));
        let sampler = Arc::new(DecisionSampler::new(config.sampling.clone()));

        Self {
            config,
            store,
            manager,
            bus,
            caches: Arc::new(CacheRegistry::default()),
            reporter,
            sampler,
            prometheus: None,
            db_pool: None,
            persistence: None,
        }
    }

    /// Attach a Prometheus handle for `/metrics`.
    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    /// Tenant partition and global sequences, the store's write position.
    pub fn sequences(&self, tenant: TenantId) -> (u64, u64) {
        (
            self.store.sequence(Partition::Tenant(tenant)),
            self.store.sequence(Partition::Global),
        )
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_reads_environment() {
        let env: HashMap<&str, &str> = [
            ("PORT", "9090"),
            ("AUTH_TOKEN", "tok"),
            ("GRACE_DAYS", "14"),
            ("SWEEP_INTERVAL_SECS", "5"),
            ("LOG_FORMAT", "JSON"),
            ("ENTL_CATALOG", "/etc/entl/catalog.yaml"),
        ]
        .into_iter()
        .collect();
        let config = AppConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.auth_token.as_deref(), Some("tok"));
        assert_eq!(config.lifecycle.grace_days, 14);
        assert_eq!(config.sweep_interval_secs, 5);
        assert!(config.json_logs);
        assert_eq!(
            config.catalog_path,
            Some(PathBuf::from("/etc/entl/catalog.yaml"))
        );
        assert!(config.database_url.is_none());
    }

    #[test]
    fn config_rejects_malformed_numbers() {
        let err = AppConfig::from_lookup(|k| (k == "GRACE_DAYS").then(|| "soon".to_string()))
            .unwrap_err();
        assert_eq!(err.name, "GRACE_DAYS");
    }

    #[test]
    fn blank_token_disables_auth() {
        let config =
            AppConfig::from_lookup(|k| (k == "AUTH_TOKEN").then(|| "  ".to_string())).unwrap();
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = AppConfig {
            auth_token: Some("tok-123".into()),
            database_url: Some("postgres://user:pw@db/entl".into()),
            ..AppConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("tok-123"));
        assert!(!rendered.contains("pw@db"));
    }
}
