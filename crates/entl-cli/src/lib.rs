//! # entl-cli: Offline Tooling for the Entitlement Engine
//!
//! Provides the `entl` command-line interface for operators and CI. Every
//! subcommand works on files; none of them talks to a running server.
//!
//! ## Subcommands
//!
//! - `entl bucket`: rollout bucket for a (tenant, user, feature) triple.
//! - `entl evaluate`: evaluate a feature against an exported snapshot.
//! - `entl audit verify`: verify an exported audit chain.
//! - `entl catalog check`: validate a feature catalog.
//!
//! ## Exit codes
//!
//! `0` on success, `1` on an operational error (unreadable file, bad
//! arguments), `2` when a verification or validation fails.

pub mod audit;
pub mod bucket;
pub mod catalog;
pub mod evaluate;

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

/// Exit code for a failed check.
pub const EXIT_CHECK_FAILED: u8 = 2;

/// Read a JSON or YAML document, chosen by file extension. Anything not
/// ending in `.yaml`/`.yml` is parsed as JSON.
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
    if is_yaml {
        serde_yaml::from_str(&text).with_context(|| format!("invalid YAML in {}", path.display()))
    } else {
        serde_json::from_str(&text).with_context(|| format!("invalid JSON in {}", path.display()))
    }
}
