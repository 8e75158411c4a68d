//! # entl-lifecycle: Subscription Lifecycle Manager
//!
//! Every entitlement mutation goes through [`LifecycleManager`]. Each
//! operation is a read-compute-commit against the store, retried on
//! version conflicts up to [`LifecycleConfig::max_commit_attempts`], with
//! one audit entry per state transition written in the same commit.
//! Illegal moves fail with `InvalidTransition` before anything is written.
//!
//! ## Operations
//!
//! - Tenants and licenses: `create_tenant`, `issue_license`,
//!   `suspend_license`, `reinstate_license`, `revoke_license`,
//!   `expire_licenses`, `upgrade_plan`, `downgrade_plan`.
//! - Subscriptions: `subscribe`, `configure`, `unsubscribe`,
//!   `retry_archival`, `expire_grace_periods`, `reactivate`,
//!   `job_completed`, `purge`.
//! - Activations: `activate`, `deactivate`, `revoke_activation`,
//!   `heartbeat`.
//! - Billing and compliance: `payment_status_changed`, `apply_signal`.
//! - Flags: `create_flag`, `edit_rollout_percentage`, `set_flag_enabled`,
//!   `set_flag_targets`, `delete_flag`.
//!
//! Archive and restore calls go to a [`DataArchiver`] after the commit that
//! records the durable job; the collaborator answers through
//! `job_completed`.

pub mod activations;
pub mod archiver;
pub mod billing;
pub mod config;
pub mod flags;
pub mod manager;
pub mod subscriptions;

pub use archiver::{
    AnnouncingArchiver, ArchiverError, DataArchiver, JobOutcome, JobRequest, RecordingArchiver,
};
pub use billing::PaymentResult;
pub use config::LifecycleConfig;
pub use flags::NewFlag;
pub use manager::LifecycleManager;
