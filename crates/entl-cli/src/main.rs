//! # entl CLI entry point
//!
//! Parses command-line arguments and dispatches to subcommand handlers.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use entl_cli::audit::{run_audit, AuditArgs};
use entl_cli::bucket::{run_bucket, BucketArgs};
use entl_cli::catalog::{run_catalog, CatalogArgs};
use entl_cli::evaluate::{run_evaluate, EvaluateArgs};

/// Entitlement engine toolchain.
///
/// Computes rollout buckets, replays decisions against exported snapshots,
/// verifies audit chains, and validates feature catalogs.
#[derive(Parser, Debug)]
#[command(name = "entl", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the rollout bucket of a user for a feature.
    Bucket(BucketArgs),

    /// Evaluate a feature against an exported tenant snapshot.
    Evaluate(EvaluateArgs),

    /// Audit log operations.
    Audit(AuditArgs),

    /// Feature catalog operations.
    Catalog(CatalogArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing based on verbosity level.
    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Bucket(args) => run_bucket(&args),
        Commands::Evaluate(args) => run_evaluate(&args),
        Commands::Audit(args) => run_audit(&args),
        Commands::Catalog(args) => run_catalog(&args),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}
