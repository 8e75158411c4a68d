//! # Catalog Subcommand
//!
//! Validates a feature catalog the way the server does at startup:
//! well-formed YAML, no duplicate apps or features, and every feature's
//! app defined.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use entl_eval::FeatureCatalog;

/// Arguments for `entl catalog`.
#[derive(Args, Debug)]
pub struct CatalogArgs {
    #[command(subcommand)]
    pub command: CatalogCommand,
}

#[derive(Subcommand, Debug)]
pub enum CatalogCommand {
    /// Validate a catalog file.
    Check {
        /// Catalog YAML file.
        path: PathBuf,
    },
}

/// Execute the catalog subcommand.
pub fn run_catalog(args: &CatalogArgs) -> Result<u8> {
    match &args.command {
        CatalogCommand::Check { path } => cmd_check(path),
    }
}

fn cmd_check(path: &Path) -> Result<u8> {
    let yaml = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    match FeatureCatalog::from_yaml_str(&yaml) {
        Ok(catalog) => {
            println!(
                "OK: {} ({} apps, {} features)",
                path.display(),
                catalog.apps().count(),
                catalog.features().count()
            );
            Ok(0)
        }
        Err(e) => {
            println!("FAIL: {}: {e}", path.display());
            Ok(crate::EXIT_CHECK_FAILED)
        }
    }
}
