//! # Subscription Lifecycle
//!
//! One subscription exists per (tenant, app).
//!
//! ```text
//! Pending ──▶ Active ──▶ SuspendedGrace ──▶ Archived ──▶ Reactivating ──▶ Active
//!               │            │    │             │              │
//!               │            │    └──▶ ArchivalFailed          └──▶ RestoreFailed
//!               │            └──▶ Reactivating
//!               └──▶ Archived (purge)          Archived ──▶ Pending (re-subscribe)
//! ```
//!
//! Recovery from the failure sub-states: `archival_failed → suspended_grace`
//! (retry archival) or `archival_failed | restore_failed → reactivating`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use entl_core::{AppId, EntitlementError, EntitlementResult, JobId, TenantId};

use crate::transition::{checked, status_display, Status, TransitionRecord};

/// Custom per-subscription configuration fields.
pub type Configuration = serde_json::Map<String, serde_json::Value>;

/// Lifecycle status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Created, not yet usable.
    Pending,
    /// In use.
    Active,
    /// Unsubscribed; data retained until the grace period ends.
    SuspendedGrace,
    /// Data archived.
    Archived,
    /// Restore in progress.
    Reactivating,
    /// Archival job failed.
    ArchivalFailed,
    /// Restore job failed.
    RestoreFailed,
}

impl Status for SubscriptionStatus {
    fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::SuspendedGrace => "suspended_grace",
            Self::Archived => "archived",
            Self::Reactivating => "reactivating",
            Self::ArchivalFailed => "archival_failed",
            Self::RestoreFailed => "restore_failed",
        }
    }

    fn can_transition_to(&self, to: Self) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, to),
            (Pending, Active)
                | (Active, SuspendedGrace)
                | (Active, Archived)
                | (SuspendedGrace, Archived)
                | (SuspendedGrace, Reactivating)
                | (SuspendedGrace, ArchivalFailed)
                | (Archived, Reactivating)
                | (Archived, Pending)
                | (Reactivating, Active)
                | (Reactivating, RestoreFailed)
                | (ArchivalFailed, SuspendedGrace)
                | (ArchivalFailed, Reactivating)
                | (RestoreFailed, Reactivating)
        )
    }

    fn is_terminal(&self) -> bool {
        false
    }
}

status_display!(SubscriptionStatus);

/// A tenant's subscription to one application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Subscribed application.
    pub app_id: AppId,
    /// Current status.
    pub status: SubscriptionStatus,
    /// Lifecycle run, starting at 1. Re-subscribing after archival starts a
    /// new run.
    pub run: u32,
    /// When the current run was subscribed.
    pub subscribed_at: DateTime<Utc>,
    /// End of the grace period while `suspended_grace`.
    pub grace_period_end: Option<DateTime<Utc>>,
    /// Opaque handle to archived data, kept across runs for restore.
    pub archived_data_ref: Option<String>,
    /// Whether the archival job for this run has completed.
    pub archival_completed: bool,
    /// Custom configuration fields.
    #[serde(default)]
    pub configuration: Configuration,
    /// Configuration captured when the data was archived.
    pub archived_configuration: Option<Configuration>,
    /// Run whose archive `archived_data_ref` and `archived_configuration`
    /// hold.
    #[serde(default)]
    pub archived_run: Option<u32>,
    /// The archive or restore job currently in flight.
    pub pending_job: Option<JobId>,
    /// Ordered log of all status transitions.
    #[serde(default)]
    pub transition_log: Vec<TransitionRecord<SubscriptionStatus>>,
}

impl Subscription {
    /// New pending subscription, run 1.
    pub fn new(tenant_id: TenantId, app_id: AppId, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id,
            app_id,
            status: SubscriptionStatus::Pending,
            run: 1,
            subscribed_at: now,
            grace_period_end: None,
            archived_data_ref: None,
            archival_completed: false,
            configuration: Configuration::new(),
            archived_configuration: None,
            archived_run: None,
            pending_job: None,
            transition_log: Vec::new(),
        }
    }

    /// Whether features of this app are usable.
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    /// Move to `to`, recording the transition.
    pub fn transition(
        &mut self,
        to: SubscriptionStatus,
        now: DateTime<Utc>,
        reason: Option<String>,
    ) -> EntitlementResult<()> {
        let record = checked(self.status, to, now, reason)?;
        self.status = to;
        self.transition_log.push(record);
        Ok(())
    }

    /// ARCHIVED → PENDING, starting a new lifecycle run with an empty
    /// configuration. The previous run's archive is kept but never
    /// restored into the new run.
    pub fn restart(&mut self, now: DateTime<Utc>) -> EntitlementResult<()> {
        self.transition(SubscriptionStatus::Pending, now, Some("resubscribe".into()))?;
        self.run += 1;
        self.subscribed_at = now;
        self.grace_period_end = None;
        self.archival_completed = false;
        self.pending_job = None;
        self.configuration.clear();
        Ok(())
    }

    /// ACTIVE → SUSPENDED_GRACE with the grace window starting at `now`.
    pub fn begin_grace(&mut self, now: DateTime<Utc>, grace_days: u32) -> EntitlementResult<()> {
        self.transition(SubscriptionStatus::SuspendedGrace, now, Some("unsubscribe".into()))?;
        self.grace_period_end = Some(now + Duration::days(i64::from(grace_days)));
        self.archival_completed = false;
        Ok(())
    }

    /// Whether `now` is past the end of the grace window.
    pub fn grace_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.grace_period_end.is_some_and(|end| now > end)
    }

    /// Archived data handle, if it was produced by the current run.
    pub fn current_archive_ref(&self) -> Option<&str> {
        if self.archived_run == Some(self.run) {
            self.archived_data_ref.as_deref()
        } else {
            None
        }
    }

    /// Whether reactivation is possible from the current status.
    pub fn can_reactivate(&self) -> bool {
        match self.status {
            SubscriptionStatus::SuspendedGrace
            | SubscriptionStatus::ArchivalFailed
            | SubscriptionStatus::RestoreFailed => true,
            SubscriptionStatus::Archived => self.current_archive_ref().is_some(),
            _ => false,
        }
    }

    /// Merge `fields` into the configuration. Only while active.
    pub fn configure(&mut self, fields: Configuration) -> EntitlementResult<()> {
        if !self.is_active() {
            return Err(EntitlementError::InvalidTransition {
                from: self.status.to_string(),
                to: self.status.to_string(),
                reason: "configuration can only change while active".to_string(),
            });
        }
        self.configuration.extend(fields);
        Ok(())
    }

    /// Record a completed archive: data handle plus a copy of the
    /// configuration at archival time.
    pub fn record_archive(&mut self, data_ref: String) {
        self.archived_data_ref = Some(data_ref);
        self.archived_configuration = Some(self.configuration.clone());
        self.archived_run = Some(self.run);
        self.archival_completed = true;
        self.pending_job = None;
    }

    /// Restore configuration from the archived copy of the current run.
    /// An archive left over from an earlier run leaves the live
    /// configuration untouched.
    pub fn restore_configuration(&mut self) {
        if self.archived_run != Some(self.run) {
            return;
        }
        if let Some(archived) = &self.archived_configuration {
            self.configuration = archived.clone();
        }
    }

    /// Drop archived data together with the live configuration;
    /// reactivation is no longer offered afterwards.
    pub fn purge_data(&mut self) {
        self.archived_data_ref = None;
        self.archived_configuration = None;
        self.archived_run = None;
        self.configuration.clear();
    }
}
