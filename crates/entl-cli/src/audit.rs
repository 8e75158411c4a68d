//! # Audit Subcommand
//!
//! Verifies an exported audit chain: one JSON entry per line, in position
//! order. Blank lines are skipped.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use entl_audit::{verify_entries, AuditEntry, ChainVerification};

/// Arguments for `entl audit`.
#[derive(Args, Debug)]
pub struct AuditArgs {
    #[command(subcommand)]
    pub command: AuditCommand,
}

#[derive(Subcommand, Debug)]
pub enum AuditCommand {
    /// Verify positions, links, and hashes of an exported chain.
    Verify {
        /// JSON Lines file of audit entries.
        path: PathBuf,
    },
}

/// Execute the audit subcommand.
pub fn run_audit(args: &AuditArgs) -> Result<u8> {
    match &args.command {
        AuditCommand::Verify { path } => cmd_verify(path),
    }
}

fn cmd_verify(path: &Path) -> Result<u8> {
    let verification = verify_file(path)?;
    println!("{}", serde_json::to_string_pretty(&verification)?);
    if verification.chain_valid {
        Ok(0)
    } else {
        tracing::warn!(
            first_broken = ?verification.first_broken,
            broken_links = verification.broken_links,
            "audit chain is broken"
        );
        Ok(crate::EXIT_CHECK_FAILED)
    }
}

fn verify_file(path: &Path) -> Result<ChainVerification> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut entries = Vec::new();
    for (index, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: AuditEntry = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid audit entry", path.display(), index + 1))?;
        entries.push(entry);
    }
    Ok(verify_entries(&entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use entl_audit::{AuditAction, AuditDraft, AuditLog};

    fn export(entries: &[AuditEntry]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let lines: Vec<String> = entries
            .iter()
            .map(|e| serde_json::to_string(e).unwrap())
            .collect();
        std::fs::write(&path, lines.join("\n")).unwrap();
        (dir, path)
    }

    fn chain() -> Vec<AuditEntry> {
        let log = AuditLog::new();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        for subject in ["tenant/a", "tenant/b", "tenant/c"] {
            log.record(
                AuditDraft::new(None, AuditAction::TenantCreated, subject, "ops"),
                at,
            )
            .unwrap();
        }
        log.query(&Default::default())
    }

    #[test]
    fn intact_chain_verifies() {
        let (_dir, path) = export(&chain());
        assert_eq!(cmd_verify(&path).unwrap(), 0);
    }

    #[test]
    fn edited_entry_fails_verification() {
        let mut entries = chain();
        entries[1].actor = "mallory".into();
        let (_dir, path) = export(&entries);
        let verification = verify_file(&path).unwrap();
        assert!(!verification.chain_valid);
        assert_eq!(verification.first_broken, Some(1));
        assert_eq!(cmd_verify(&path).unwrap(), crate::EXIT_CHECK_FAILED);
    }

    #[test]
    fn malformed_line_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        std::fs::write(&path, "{not json}\n").unwrap();
        assert!(verify_file(&path).is_err());
    }
}
