//! # Feature Catalog
//!
//! Operator configuration mapping each feature to its minimum plan tier and
//! owning app, and each app to its minimum plan tier. Loaded at bootstrap
//! from YAML:
//!
//! ```yaml
//! apps:
//!   - id: crm
//!     min_tier: basic
//! features:
//!   - name: advanced_analytics
//!     min_tier: premium
//!   - name: crm.pipeline_forecast
//!     app: crm
//!     min_tier: enterprise
//! ```
//!
//! Features absent from the catalog are ungated: tier `basic`, no app.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use entl_core::{AppId, FeatureName, PlanTier};
use entl_state::DEFAULT_PRODUCT;

/// Catalog loading errors.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The YAML document did not parse.
    #[error("invalid catalog YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The same app id appears twice.
    #[error("duplicate app in catalog: {0}")]
    DuplicateApp(AppId),

    /// The same feature name appears twice.
    #[error("duplicate feature in catalog: {0}")]
    DuplicateFeature(FeatureName),

    /// A feature names an app that is not defined.
    #[error("feature {feature} references undefined app {app}")]
    UnknownApp {
        /// Offending feature.
        feature: FeatureName,
        /// App it references.
        app: AppId,
    },
}

/// An application that tenants subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDefinition {
    /// App id.
    pub id: AppId,
    /// Lowest plan tier allowed to subscribe.
    #[serde(default)]
    pub min_tier: PlanTier,
}

/// A gated feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDefinition {
    /// Feature name, shared with its flag.
    pub name: FeatureName,
    /// Owning app; the tenant needs an active subscription to it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<AppId>,
    /// Lowest plan tier allowed to use the feature.
    #[serde(default)]
    pub min_tier: PlanTier,
    /// Product whose license gates the feature.
    #[serde(default = "default_product")]
    pub product: String,
}

fn default_product() -> String {
    DEFAULT_PRODUCT.to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    apps: Vec<AppDefinition>,
    #[serde(default)]
    features: Vec<FeatureDefinition>,
}

/// Validated catalog, indexed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CatalogFile", into = "CatalogFile")]
pub struct FeatureCatalog {
    apps: BTreeMap<AppId, AppDefinition>,
    features: BTreeMap<FeatureName, FeatureDefinition>,
}

impl TryFrom<CatalogFile> for FeatureCatalog {
    type Error = CatalogError;

    fn try_from(file: CatalogFile) -> Result<Self, Self::Error> {
        let mut catalog = FeatureCatalog::default();
        for app in file.apps {
            if catalog.apps.contains_key(&app.id) {
                return Err(CatalogError::DuplicateApp(app.id));
            }
            catalog.apps.insert(app.id.clone(), app);
        }
        for feature in file.features {
            if let Some(app) = &feature.app {
                if !catalog.apps.contains_key(app) {
                    return Err(CatalogError::UnknownApp {
                        feature: feature.name,
                        app: app.clone(),
                    });
                }
            }
            if catalog.features.contains_key(&feature.name) {
                return Err(CatalogError::DuplicateFeature(feature.name));
            }
            catalog.features.insert(feature.name.clone(), feature);
        }
        Ok(catalog)
    }
}

impl From<FeatureCatalog> for CatalogFile {
    fn from(catalog: FeatureCatalog) -> Self {
        CatalogFile {
            apps: catalog.apps.into_values().collect(),
            features: catalog.features.into_values().collect(),
        }
    }
}

impl FeatureCatalog {
    /// Parse and validate a YAML catalog.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_yaml::from_str(yaml)?;
        Self::try_from(file)
    }

    /// Build from definitions, validating as the YAML loader does.
    pub fn from_definitions(
        apps: Vec<AppDefinition>,
        features: Vec<FeatureDefinition>,
    ) -> Result<Self, CatalogError> {
        Self::try_from(CatalogFile { apps, features })
    }

    /// Look up a feature.
    pub fn feature(&self, name: &FeatureName) -> Option<&FeatureDefinition> {
        self.features.get(name)
    }

    /// Look up an app.
    pub fn app(&self, id: &AppId) -> Option<&AppDefinition> {
        self.apps.get(id)
    }

    /// All apps, by id.
    pub fn apps(&self) -> impl Iterator<Item = &AppDefinition> {
        self.apps.values()
    }

    /// All features, by name.
    pub fn features(&self) -> impl Iterator<Item = &FeatureDefinition> {
        self.features.values()
    }

    /// Effective minimum tier for a feature: the stricter of the feature's
    /// own minimum and its app's minimum.
    pub fn required_tier(&self, name: &FeatureName) -> PlanTier {
        let Some(feature) = self.features.get(name) else {
            return PlanTier::Basic;
        };
        let app_tier = feature
            .app
            .as_ref()
            .and_then(|app| self.apps.get(app))
            .map(|app| app.min_tier)
            .unwrap_or_default();
        feature.min_tier.max(app_tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
apps:
  - id: crm
    min_tier: premium
  - id: field-ops
features:
  - name: advanced_analytics
    min_tier: premium
  - name: crm.bulk_export
    app: crm
  - name: crm.forecast
    app: crm
    min_tier: enterprise
"#;

    fn name(s: &str) -> FeatureName {
        FeatureName::new(s).unwrap()
    }

    #[test]
    fn loads_yaml() {
        let catalog = FeatureCatalog::from_yaml_str(CATALOG).unwrap();
        assert_eq!(catalog.apps().count(), 2);
        assert_eq!(catalog.features().count(), 3);
        let field_ops = catalog.app(&AppId::new("field-ops").unwrap()).unwrap();
        assert_eq!(field_ops.min_tier, PlanTier::Basic);
        assert_eq!(
            catalog.feature(&name("advanced_analytics")).unwrap().product,
            "platform"
        );
    }

    #[test]
    fn required_tier_takes_the_stricter_minimum() {
        let catalog = FeatureCatalog::from_yaml_str(CATALOG).unwrap();
        assert_eq!(catalog.required_tier(&name("advanced_analytics")), PlanTier::Premium);
        assert_eq!(catalog.required_tier(&name("crm.bulk_export")), PlanTier::Premium);
        assert_eq!(catalog.required_tier(&name("crm.forecast")), PlanTier::Enterprise);
        assert_eq!(catalog.required_tier(&name("unlisted")), PlanTier::Basic);
    }

    #[test]
    fn rejects_unknown_app() {
        let err = FeatureCatalog::from_yaml_str(
            "features:\n  - name: x\n    app: billing\n",
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownApp { .. }));
    }

    #[test]
    fn rejects_duplicates() {
        let err = FeatureCatalog::from_yaml_str("apps:\n  - id: crm\n  - id: crm\n").unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateApp(_)));
    }

    #[test]
    fn rejects_bad_tier() {
        assert!(FeatureCatalog::from_yaml_str("apps:\n  - id: crm\n    min_tier: gold\n").is_err());
    }

    #[test]
    fn json_round_trip_keeps_definitions() {
        let catalog = FeatureCatalog::from_yaml_str(CATALOG).unwrap();
        let json = serde_json::to_string(&catalog).unwrap();
        let back: FeatureCatalog = serde_json::from_str(&json).unwrap();
        assert_eq!(back, catalog);
    }
}
