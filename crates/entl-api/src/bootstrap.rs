//! # Startup Bootstrap
//!
//! Loads the feature catalog and restores persisted state before the
//! server starts accepting requests.
//!
//! ## Sequence
//!
//! 1. **Load catalog** from `ENTL_CATALOG`, or start with an empty one.
//! 2. **Build state** with the default collaborators.
//! 3. **Hydrate** the store from Postgres when a pool is available, then
//!    start the write-behind persister.
//!
//! Without `ENTL_CATALOG` every feature is ungated and no app can be
//! subscribed to.

use std::path::Path;

use sqlx::PgPool;

use entl_eval::{CatalogError, FeatureCatalog};

use crate::db;
use crate::state::{AppConfig, AppState, Collaborators};

/// Errors during startup.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// The catalog file could not be read.
    #[error("cannot read catalog {path}: {source}")]
    CatalogRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The catalog file did not validate.
    #[error("invalid catalog {path}: {source}")]
    CatalogInvalid {
        path: String,
        #[source]
        source: CatalogError,
    },

    /// Persisted state could not be loaded.
    #[error("database hydration failed: {0}")]
    Hydration(#[from] sqlx::Error),
}

/// Read and validate a catalog file.
pub fn load_catalog(path: &Path) -> Result<FeatureCatalog, BootstrapError> {
    let display = path.display().to_string();
    let yaml = std::fs::read_to_string(path).map_err(|source| BootstrapError::CatalogRead {
        path: display.clone(),
        source,
    })?;
    FeatureCatalog::from_yaml_str(&yaml).map_err(|source| BootstrapError::CatalogInvalid {
        path: display,
        source,
    })
}

/// Build application state from configuration.
pub fn bootstrap(config: AppConfig) -> Result<AppState, BootstrapError> {
    let catalog = match &config.catalog_path {
        Some(path) => {
            let catalog = load_catalog(path)?;
            tracing::info!(
                path = %path.display(),
                apps = catalog.apps().count(),
                features = catalog.features().count(),
                "feature catalog loaded"
            );
            catalog
        }
        None => {
            tracing::warn!("ENTL_CATALOG not set; starting with an empty feature catalog");
            FeatureCatalog::default()
        }
    };
    Ok(AppState::build(config, catalog, Collaborators::default()))
}

/// Restore the store from `pool` and persist every later commit to it.
///
/// Must run before the first request so hydrated versions are never
/// overwritten by fresh commits.
pub async fn attach_database(mut state: AppState, pool: PgPool) -> Result<AppState, BootstrapError> {
    let hydration = db::load_hydration(&pool).await?;
    let records = hydration.records.len();
    state.store.hydrate(hydration);

    let verification = state.store.audit_log().verify_chain();
    if !verification.chain_valid {
        tracing::error!(
            first_broken = ?verification.first_broken,
            broken_links = verification.broken_links,
            "persisted audit chain failed verification"
        );
    }

    let (handle, _writer) = db::writer::spawn_writer(pool.clone());
    state.store.register_observer(std::sync::Arc::new(handle.clone()));
    state.persistence = Some(handle);
    state.db_pool = Some(pool);
    tracing::info!(records, "store hydrated from database");
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_catalog_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "apps:\n  - id: crm\n    min_tier: premium\nfeatures:\n  - name: crm.forecast\n    app: crm\n    min_tier: enterprise"
        )
        .unwrap();
        let catalog = load_catalog(file.path()).unwrap();
        assert_eq!(catalog.apps().count(), 1);
        assert_eq!(catalog.features().count(), 1);
    }

    #[test]
    fn missing_catalog_is_a_read_error() {
        let err = load_catalog(Path::new("/nonexistent/catalog.yaml")).unwrap_err();
        assert!(matches!(err, BootstrapError::CatalogRead { .. }));
    }

    #[test]
    fn invalid_catalog_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "features:\n  - name: x\n    app: nowhere").unwrap();
        let err = load_catalog(file.path()).unwrap_err();
        assert!(matches!(err, BootstrapError::CatalogInvalid { .. }));
    }

    #[test]
    fn bootstrap_without_catalog_uses_empty_catalog() {
        let state = bootstrap(AppConfig::default()).unwrap();
        assert_eq!(state.store.catalog().apps().count(), 0);
    }
}
