//! Archival/restore collaborator interface.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use entl_core::{AppId, JobId, TenantId};
use entl_state::JobKind;

/// Work handed to the archival collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub app_id: AppId,
    pub job_type: JobKind,
    /// Archived data to restore from (restore jobs only).
    pub data_ref: Option<String>,
}

/// How the collaborator reports a finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed {
        /// Handle of the archived data (archive jobs).
        #[serde(default)]
        data_ref: Option<String>,
    },
    Failed {
        reason: String,
    },
}

/// Trigger failures. The job is recorded as failed when one is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArchiverError {
    #[error("archiver unavailable: {0}")]
    Unavailable(String),
    #[error("archiver rejected job: {0}")]
    Rejected(String),
}

/// Archival/restore collaborator. `trigger` starts the work and returns;
/// the result arrives later through `LifecycleManager::job_completed`.
pub trait DataArchiver: Send + Sync {
    fn trigger(&self, request: &JobRequest) -> Result<(), ArchiverError>;
}

/// Archiver for deployments where an external worker polls pending job
/// records and reports back through `job_completed`. Triggering only
/// announces the job; nothing is held in memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnnouncingArchiver;

impl DataArchiver for AnnouncingArchiver {
    fn trigger(&self, request: &JobRequest) -> Result<(), ArchiverError> {
        tracing::info!(
            job_id = %request.job_id,
            tenant_id = %request.tenant_id,
            app = %request.app_id,
            job_type = %request.job_type,
            data_ref = ?request.data_ref,
            "job awaiting worker"
        );
        Ok(())
    }
}

/// Archiver that keeps requests in memory until taken. Used by tests.
#[derive(Debug, Default)]
pub struct RecordingArchiver {
    requests: Mutex<Vec<JobRequest>>,
    failure: Mutex<Option<String>>,
}

impl RecordingArchiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests received and not yet taken.
    pub fn pending(&self) -> Vec<JobRequest> {
        self.requests.lock().clone()
    }

    /// Remove and return queued requests.
    pub fn take(&self) -> Vec<JobRequest> {
        std::mem::take(&mut *self.requests.lock())
    }

    /// Make subsequent triggers fail with `reason` (`None` restores
    /// normal behaviour).
    pub fn fail_triggers(&self, reason: Option<String>) {
        *self.failure.lock() = reason;
    }
}

impl DataArchiver for RecordingArchiver {
    fn trigger(&self, request: &JobRequest) -> Result<(), ArchiverError> {
        if let Some(reason) = self.failure.lock().clone() {
            return Err(ArchiverError::Unavailable(reason));
        }
        tracing::debug!(
            job_id = %request.job_id,
            tenant_id = %request.tenant_id,
            app = %request.app_id,
            job_type = %request.job_type,
            "job queued"
        );
        self.requests.lock().push(request.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> JobRequest {
        JobRequest {
            job_id: JobId::new(),
            tenant_id: TenantId::new(),
            app_id: AppId::new("crm").unwrap(),
            job_type: JobKind::Archive,
            data_ref: None,
        }
    }

    #[test]
    fn announcing_archiver_accepts_every_job() {
        assert_eq!(AnnouncingArchiver.trigger(&request()), Ok(()));
    }

    #[test]
    fn recording_archiver_queues_until_taken() {
        let archiver = RecordingArchiver::new();
        archiver.trigger(&request()).unwrap();
        assert_eq!(archiver.pending().len(), 1);
        assert_eq!(archiver.take().len(), 1);
        assert!(archiver.pending().is_empty());

        archiver.fail_triggers(Some("offline".into()));
        assert!(matches!(
            archiver.trigger(&request()),
            Err(ArchiverError::Unavailable(reason)) if reason == "offline"
        ));
    }
}
