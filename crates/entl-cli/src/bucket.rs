//! # Bucket Subcommand
//!
//! Prints the deterministic rollout bucket (0-99) for a user. A user is in
//! a flag's rollout when their bucket is below the rollout percentage.

use anyhow::Result;
use clap::Args;

use entl_core::{FeatureName, TenantId, UserId};
use entl_eval::rollout_bucket;

/// Arguments for `entl bucket`.
#[derive(Args, Debug)]
pub struct BucketArgs {
    /// Tenant ID (UUID).
    #[arg(long)]
    pub tenant: TenantId,

    /// User ID.
    #[arg(long)]
    pub user: String,

    /// Feature name.
    #[arg(long)]
    pub feature: String,
}

/// Execute the bucket subcommand.
pub fn run_bucket(args: &BucketArgs) -> Result<u8> {
    println!("{}", compute(args)?);
    Ok(0)
}

fn compute(args: &BucketArgs) -> Result<u8> {
    let user = UserId::new(args.user.as_str())?;
    let feature = FeatureName::new(args.feature.as_str())?;
    Ok(rollout_bucket(&args.tenant, &user, &feature))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(user: &str) -> BucketArgs {
        BucketArgs {
            tenant: "6f1c2e0a-0000-4000-8000-000000000001".parse().unwrap(),
            user: user.into(),
            feature: "advanced_analytics".into(),
        }
    }

    #[test]
    fn bucket_is_stable_and_in_range() {
        let first = compute(&args("alice")).unwrap();
        assert_eq!(first, compute(&args("alice")).unwrap());
        assert!(first < 100);
    }

    #[test]
    fn blank_user_is_an_error() {
        assert!(compute(&args("")).is_err());
    }
}
