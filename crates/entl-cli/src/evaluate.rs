//! # Evaluate Subcommand
//!
//! Runs the evaluation engine against a snapshot exported from
//! `GET /v1/tenants/{tenant_id}/snapshot`, so a support engineer can
//! replay a decision without access to the live service.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;

use entl_core::{FeatureName, UserId};
use entl_eval::{evaluate, Decision, TenantSnapshot};

/// Arguments for `entl evaluate`.
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Snapshot file (JSON, or YAML by extension).
    #[arg(long)]
    pub snapshot: PathBuf,

    /// User ID.
    #[arg(long)]
    pub user: String,

    /// Feature name.
    #[arg(long)]
    pub feature: String,

    /// Evaluation instant (RFC 3339); defaults to now.
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,
}

/// Execute the evaluate subcommand. Prints the decision as JSON.
pub fn run_evaluate(args: &EvaluateArgs) -> Result<u8> {
    let decision = decide(args)?;
    let rendered = serde_json::json!({
        "decision": decision,
        "remediation": decision.remediation(),
    });
    println!("{}", serde_json::to_string_pretty(&rendered)?);
    Ok(0)
}

fn decide(args: &EvaluateArgs) -> Result<Decision> {
    let snapshot: TenantSnapshot = crate::read_document(&args.snapshot)?;
    let user = UserId::new(args.user.as_str())?;
    let feature = FeatureName::new(args.feature.as_str())?;
    let at = args.at.unwrap_or_else(Utc::now);
    tracing::debug!(
        tenant_id = %snapshot.tenant_id,
        sequence = snapshot.sequence,
        %at,
        "evaluating against snapshot"
    );
    Ok(evaluate(&snapshot, &user, &feature, at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use entl_core::TenantId;
    use entl_eval::{FeatureCatalog, Reason};

    fn write_snapshot(dir: &tempfile::TempDir, name: &str, snapshot: &TenantSnapshot) -> PathBuf {
        let path = dir.path().join(name);
        let text = if name.ends_with(".yaml") {
            serde_yaml::to_string(snapshot).unwrap()
        } else {
            serde_json::to_string(snapshot).unwrap()
        };
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn missing_flag_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = TenantSnapshot::empty(TenantId::new(), FeatureCatalog::default());
        for name in ["snap.json", "snap.yaml"] {
            let args = EvaluateArgs {
                snapshot: write_snapshot(&dir, name, &snapshot),
                user: "alice".into(),
                feature: "advanced_analytics".into(),
                at: None,
            };
            let decision = decide(&args).unwrap();
            assert!(!decision.allowed);
            assert_eq!(decision.reason, Reason::FlagDisabled);
        }
    }

    #[test]
    fn unreadable_snapshot_is_an_error() {
        let args = EvaluateArgs {
            snapshot: PathBuf::from("/nonexistent/snapshot.json"),
            user: "alice".into(),
            feature: "advanced_analytics".into(),
            at: None,
        };
        assert!(decide(&args).is_err());
    }
}
