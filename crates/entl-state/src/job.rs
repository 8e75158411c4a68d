//! # Archival / Restore Jobs
//!
//! Calls to the archival collaborator are fire-and-forget. The durable
//! record of the call is a [`JobRecord`], written in the same commit as the
//! subscription transition that caused it, so a crash between commit and
//! trigger leaves a visible `pending` job rather than a silent gap.
//!
//! ```text
//! Pending ──▶ Completed
//!    ├──────▶ Failed
//!    └──────▶ Superseded   (a newer job for the same subscription replaced it)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use entl_core::{AppId, EntitlementResult, JobId, TenantId};

use crate::transition::{checked, status_display, Status, TransitionRecord};

/// What the job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Export tenant data for the app to cold storage.
    Archive,
    /// Bring archived data back.
    Restore,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Archive => f.write_str("archive"),
            Self::Restore => f.write_str("restore"),
        }
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Triggered, awaiting the completion callback.
    Pending,
    /// Collaborator reported success.
    Completed,
    /// Collaborator reported failure, or the trigger itself failed.
    Failed,
    /// Replaced by a newer job for the same subscription.
    Superseded,
}

impl Status for JobStatus {
    fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Superseded => "superseded",
        }
    }

    fn can_transition_to(&self, to: Self) -> bool {
        matches!(self, Self::Pending) && !matches!(to, Self::Pending)
    }

    fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

status_display!(JobStatus);

/// Durable record of one archive or restore call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job identifier, echoed back by the collaborator.
    pub id: JobId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// App whose data is moved.
    pub app_id: AppId,
    /// Archive or restore.
    pub kind: JobKind,
    /// Current status.
    pub status: JobStatus,
    /// Subscription run the job belongs to.
    pub run: u32,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Data reference (input for restore, output for archive).
    pub data_ref: Option<String>,
    /// Failure reason when `failed`.
    pub failure_reason: Option<String>,
    /// Ordered log of all status transitions.
    #[serde(default)]
    pub transition_log: Vec<TransitionRecord<JobStatus>>,
}

impl JobRecord {
    /// New pending job.
    pub fn new(
        tenant_id: TenantId,
        app_id: AppId,
        kind: JobKind,
        run: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            tenant_id,
            app_id,
            kind,
            status: JobStatus::Pending,
            run,
            created_at: now,
            completed_at: None,
            data_ref: None,
            failure_reason: None,
            transition_log: Vec::new(),
        }
    }

    /// Attach a data reference (restore input).
    pub fn with_data_ref(mut self, data_ref: impl Into<String>) -> Self {
        self.data_ref = Some(data_ref.into());
        self
    }

    /// Whether the job still awaits its callback.
    pub fn is_pending(&self) -> bool {
        self.status == JobStatus::Pending
    }

    /// PENDING → COMPLETED.
    pub fn complete(
        &mut self,
        data_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> EntitlementResult<()> {
        self.finish(JobStatus::Completed, now, None)?;
        if data_ref.is_some() {
            self.data_ref = data_ref;
        }
        Ok(())
    }

    /// PENDING → FAILED.
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> EntitlementResult<()> {
        let reason = reason.into();
        self.finish(JobStatus::Failed, now, Some(reason.clone()))?;
        self.failure_reason = Some(reason);
        Ok(())
    }

    /// PENDING → SUPERSEDED.
    pub fn supersede(&mut self, now: DateTime<Utc>) -> EntitlementResult<()> {
        self.finish(JobStatus::Superseded, now, None)
    }

    fn finish(
        &mut self,
        to: JobStatus,
        now: DateTime<Utc>,
        reason: Option<String>,
    ) -> EntitlementResult<()> {
        let record = checked(self.status, to, now, reason)?;
        self.status = to;
        self.completed_at = Some(now);
        self.transition_log.push(record);
        Ok(())
    }
}
