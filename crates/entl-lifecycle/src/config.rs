//! Lifecycle settings.

use serde::{Deserialize, Serialize};

use entl_store::DEFAULT_MAX_ATTEMPTS;

/// Tunables of the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Days between `unsubscribe` and eligibility for archival.
    pub grace_days: u32,
    /// Commit attempts per operation before `ConcurrentModification`.
    pub max_commit_attempts: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            grace_days: 30,
            max_commit_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: LifecycleConfig = serde_json::from_str(r#"{"grace_days": 7}"#).unwrap();
        assert_eq!(config.grace_days, 7);
        assert_eq!(config.max_commit_attempts, 5);
    }
}
