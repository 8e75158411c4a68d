//! Subscription lifecycle: subscribe, configure, unsubscribe with grace,
//! archival and restore jobs, reactivation, purge.

use chrono::{DateTime, Utc};

use entl_audit::AuditAction;
use entl_core::{
    AppId, CanonicalBytes, EntitlementError, EntitlementResult, JobId, PlanTier, TenantId,
    ValidationError,
};
use entl_state::{
    Configuration, JobKind, JobRecord, JobStatus, Subscription, SubscriptionStatus, Tenant,
    DEFAULT_PRODUCT,
};
use entl_store::{Commit, EntitlementStore, Partition, RecordKey, Versioned};

use crate::archiver::{JobOutcome, JobRequest};
use crate::manager::{current_license, draft, require_tenant, LifecycleManager};

fn subscription_key(sub: &Subscription) -> RecordKey {
    RecordKey::Subscription {
        tenant: sub.tenant_id,
        app: sub.app_id.clone(),
    }
}

fn job_key(job: &JobRecord) -> RecordKey {
    RecordKey::Job {
        tenant: job.tenant_id,
        id: job.id,
    }
}

fn require_subscription(
    store: &EntitlementStore,
    tenant: TenantId,
    app: &AppId,
) -> EntitlementResult<Versioned<Subscription>> {
    store
        .get_subscription(tenant, app)
        .ok_or_else(|| EntitlementError::not_found("subscription", format!("{tenant}/{app}")))
}

/// Tier, license status and flagged limits must all allow a new
/// subscription to `app`.
fn check_subscribe_gates(
    store: &EntitlementStore,
    tenant: &Tenant,
    app: &AppId,
    now: DateTime<Utc>,
) -> EntitlementResult<()> {
    let required = store
        .catalog()
        .app(app)
        .map_or(PlanTier::Basic, |a| a.min_tier);
    let license = current_license(store, tenant.id, DEFAULT_PRODUCT).ok();
    let current = license.as_ref().map_or(tenant.plan, |l| l.value.tier);
    if !current.satisfies(required) {
        return Err(EntitlementError::PlanInsufficient { required, current });
    }
    let license = license.ok_or_else(|| EntitlementError::LicenseInactive {
        status: "missing".into(),
    })?;
    license.value.require_active(now)?;
    license.value.require_within_limits()
}

/// Subscription transition plus its audit entry.
struct Step<'a> {
    tenant: TenantId,
    actor: &'a str,
    commit: Commit,
}

impl<'a> Step<'a> {
    fn new(tenant: TenantId, actor: &'a str) -> Self {
        Self {
            tenant,
            actor,
            commit: Commit::new(Partition::Tenant(tenant)),
        }
    }

    fn audit_subscription(
        mut self,
        action: AuditAction,
        before: Option<&Subscription>,
        after: &Subscription,
    ) -> Self {
        self.commit = self.commit.audit(draft(
            Some(self.tenant),
            action,
            &subscription_key(after),
            self.actor,
            before,
            Some(after),
        ));
        self
    }

    fn audit_job(mut self, before: Option<&JobRecord>, after: &JobRecord) -> Self {
        self.commit = self.commit.audit(draft(
            Some(self.tenant),
            AuditAction::JobUpdated,
            &job_key(after),
            self.actor,
            before,
            Some(after),
        ));
        self
    }

    fn put_subscription(mut self, sub: Subscription, expected: Option<u64>) -> Self {
        self.commit = self.commit.put(sub, expected);
        self
    }

    fn put_job(mut self, job: JobRecord, expected: Option<u64>) -> Self {
        self.commit = self.commit.put(job, expected);
        self
    }

    /// Supersede the job the subscription is waiting on, if any.
    fn supersede_pending(
        self,
        store: &EntitlementStore,
        sub: &mut Subscription,
        now: DateTime<Utc>,
    ) -> EntitlementResult<Self> {
        let Some(job_id) = sub.pending_job.take() else {
            return Ok(self);
        };
        let Some(current) = store.get_job(job_id).filter(|j| j.value.is_pending()) else {
            return Ok(self);
        };
        let before = current.value;
        let mut after = before.clone();
        after.supersede(now)?;
        Ok(self
            .audit_job(Some(&before), &after)
            .put_job(after, Some(current.version)))
    }
}

impl LifecycleManager {
    /// Subscribe `tenant` to `app`: `pending → active`, starting a new run
    /// when the previous one was archived.
    pub fn subscribe(
        &self,
        tenant_id: TenantId,
        app: &AppId,
        actor: &str,
    ) -> EntitlementResult<Subscription> {
        let sub = self.run(|store, now| {
            let tenant = require_tenant(store, tenant_id)?;
            let existing = store.get_subscription(tenant_id, app);
            if let Some(current) = &existing {
                match current.value.status {
                    SubscriptionStatus::Active => {
                        return Err(EntitlementError::AlreadyExists {
                            entity: "subscription",
                            id: format!("{tenant_id}/{app}"),
                        })
                    }
                    SubscriptionStatus::Archived | SubscriptionStatus::Pending => {}
                    other => {
                        return Err(EntitlementError::InvalidTransition {
                            from: other.to_string(),
                            to: SubscriptionStatus::Active.to_string(),
                            reason: "subscription is winding down or restoring; use reactivate"
                                .into(),
                        })
                    }
                }
            }
            check_subscribe_gates(store, &tenant.value, app, now)?;

            let mut step = Step::new(tenant_id, actor);
            let (mut sub, expected) = match existing {
                None => {
                    let sub = Subscription::new(tenant_id, app.clone(), now);
                    step = step.audit_subscription(AuditAction::SubscriptionTransition, None, &sub);
                    (sub, None)
                }
                Some(current) => {
                    let mut sub = current.value.clone();
                    if sub.status == SubscriptionStatus::Archived {
                        sub.restart(now)?;
                        step = step.audit_subscription(
                            AuditAction::SubscriptionTransition,
                            Some(&current.value),
                            &sub,
                        );
                    }
                    (sub, Some(current.version))
                }
            };
            let pending = sub.clone();
            sub.transition(SubscriptionStatus::Active, now, Some("subscribe".into()))?;
            let step = step
                .audit_subscription(AuditAction::SubscriptionTransition, Some(&pending), &sub)
                .put_subscription(sub.clone(), expected);
            Ok((step.commit, sub))
        })?;
        tracing::info!(tenant_id = %tenant_id, app = %app, run = sub.run, "subscribed");
        Ok(sub)
    }

    /// Merge custom configuration fields into an active subscription.
    pub fn configure(
        &self,
        tenant_id: TenantId,
        app: &AppId,
        fields: Configuration,
        actor: &str,
    ) -> EntitlementResult<Subscription> {
        CanonicalBytes::new(&fields).map_err(|e| {
            ValidationError::Rule(format!("configuration is not canonicalizable: {e}"))
        })?;
        let sub = self.run(|store, _| {
            let current = require_subscription(store, tenant_id, app)?;
            let mut sub = current.value.clone();
            sub.configure(fields.clone())?;
            let step = Step::new(tenant_id, actor)
                .audit_subscription(
                    AuditAction::SubscriptionConfigured,
                    Some(&current.value),
                    &sub,
                )
                .put_subscription(sub.clone(), Some(current.version));
            Ok((step.commit, sub))
        })?;
        tracing::info!(tenant_id = %tenant_id, app = %app, "subscription configured");
        Ok(sub)
    }

    /// `active → suspended_grace`. Access ends now; data is archived in
    /// the background and kept until the grace period ends.
    pub fn unsubscribe(
        &self,
        tenant_id: TenantId,
        app: &AppId,
        actor: &str,
    ) -> EntitlementResult<Subscription> {
        let grace_days = self.config.grace_days;
        let (sub, job) = self.run(|store, now| {
            let current = require_subscription(store, tenant_id, app)?;
            let mut sub = current.value.clone();
            sub.begin_grace(now, grace_days)?;
            let job = JobRecord::new(tenant_id, app.clone(), JobKind::Archive, sub.run, now);
            sub.pending_job = Some(job.id);
            let step = Step::new(tenant_id, actor)
                .audit_subscription(
                    AuditAction::SubscriptionTransition,
                    Some(&current.value),
                    &sub,
                )
                .audit_job(None, &job)
                .put_subscription(sub.clone(), Some(current.version))
                .put_job(job.clone(), None);
            Ok((step.commit, (sub, job)))
        })?;
        tracing::info!(
            tenant_id = %tenant_id,
            app = %app,
            grace_period_end = ?sub.grace_period_end,
            "unsubscribed, grace period started"
        );
        self.dispatch(&job, actor)?;
        Ok(self.current_subscription(tenant_id, app, sub))
    }

    /// `archival_failed → suspended_grace` with a fresh archive job.
    pub fn retry_archival(
        &self,
        tenant_id: TenantId,
        app: &AppId,
        actor: &str,
    ) -> EntitlementResult<Subscription> {
        let (sub, job) = self.run(|store, now| {
            let current = require_subscription(store, tenant_id, app)?;
            if current.value.status != SubscriptionStatus::ArchivalFailed {
                return Err(EntitlementError::InvalidTransition {
                    from: current.value.status.to_string(),
                    to: SubscriptionStatus::SuspendedGrace.to_string(),
                    reason: "only a failed archival can be retried".into(),
                });
            }
            let mut sub = current.value.clone();
            sub.transition(
                SubscriptionStatus::SuspendedGrace,
                now,
                Some("retry archival".into()),
            )?;
            let job = JobRecord::new(tenant_id, app.clone(), JobKind::Archive, sub.run, now);
            sub.pending_job = Some(job.id);
            let step = Step::new(tenant_id, actor)
                .audit_subscription(
                    AuditAction::SubscriptionTransition,
                    Some(&current.value),
                    &sub,
                )
                .audit_job(None, &job)
                .put_subscription(sub.clone(), Some(current.version))
                .put_job(job.clone(), None);
            Ok((step.commit, (sub, job)))
        })?;
        tracing::info!(tenant_id = %tenant_id, app = %app, job_id = %job.id, "archival retried");
        self.dispatch(&job, actor)?;
        Ok(self.current_subscription(tenant_id, app, sub))
    }

    /// Archive every subscription whose grace period has elapsed at `now`
    /// and whose archival has completed.
    pub fn expire_grace_periods(
        &self,
        now: DateTime<Utc>,
        actor: &str,
    ) -> EntitlementResult<Vec<Subscription>> {
        let mut archived = Vec::new();
        for tenant in self.store.list_tenants() {
            let due: Vec<AppId> = self
                .store
                .list_subscriptions(tenant.id)
                .into_iter()
                .filter(|s| ready_to_archive(&s.value, now))
                .map(|s| s.value.app_id)
                .collect();
            for app in due {
                let outcome = self.run(|store, _| {
                    let current = require_subscription(store, tenant.id, &app)?;
                    if !ready_to_archive(&current.value, now) {
                        return Ok((Commit::new(Partition::Tenant(tenant.id)), None));
                    }
                    let mut sub = current.value.clone();
                    sub.transition(
                        SubscriptionStatus::Archived,
                        now,
                        Some("grace period elapsed".into()),
                    )?;
                    let step = Step::new(tenant.id, actor)
                        .audit_subscription(
                            AuditAction::SubscriptionTransition,
                            Some(&current.value),
                            &sub,
                        )
                        .put_subscription(sub.clone(), Some(current.version));
                    Ok((step.commit, Some(sub)))
                })?;
                if let Some(sub) = outcome {
                    tracing::info!(tenant_id = %tenant.id, app = %sub.app_id, "subscription archived");
                    archived.push(sub);
                }
            }
        }
        Ok(archived)
    }

    /// Start restoring a subscription: `→ reactivating` with a restore job.
    /// Any archive job still in flight is superseded.
    pub fn reactivate(
        &self,
        tenant_id: TenantId,
        app: &AppId,
        actor: &str,
    ) -> EntitlementResult<Subscription> {
        let (sub, job) = self.run(|store, now| {
            let current = require_subscription(store, tenant_id, app)?;
            if !current.value.can_reactivate() {
                let reason = if current.value.status == SubscriptionStatus::Archived {
                    "archived data was purged"
                } else {
                    "subscription is not suspended or archived"
                };
                return Err(EntitlementError::InvalidTransition {
                    from: current.value.status.to_string(),
                    to: SubscriptionStatus::Reactivating.to_string(),
                    reason: reason.into(),
                });
            }
            let mut sub = current.value.clone();
            let step = Step::new(tenant_id, actor).supersede_pending(store, &mut sub, now)?;
            sub.transition(SubscriptionStatus::Reactivating, now, Some("reactivate".into()))?;
            sub.grace_period_end = None;
            let mut job = JobRecord::new(tenant_id, app.clone(), JobKind::Restore, sub.run, now);
            if let Some(data_ref) = sub.current_archive_ref() {
                job = job.with_data_ref(data_ref.to_string());
            }
            sub.pending_job = Some(job.id);
            let step = step
                .audit_subscription(
                    AuditAction::SubscriptionTransition,
                    Some(&current.value),
                    &sub,
                )
                .audit_job(None, &job)
                .put_subscription(sub.clone(), Some(current.version))
                .put_job(job.clone(), None);
            Ok((step.commit, (sub, job)))
        })?;
        tracing::info!(tenant_id = %tenant_id, app = %app, job_id = %job.id, "reactivation started");
        self.dispatch(&job, actor)?;
        Ok(self.current_subscription(tenant_id, app, sub))
    }

    /// Apply the collaborator's answer for `job_id`.
    ///
    /// A repeated callback with the same outcome is accepted and changes
    /// nothing. Outcomes for superseded jobs only close the job record.
    pub fn job_completed(
        &self,
        job_id: JobId,
        outcome: JobOutcome,
        actor: &str,
    ) -> EntitlementResult<JobRecord> {
        let job = self.run(|store, now| {
            let current = store
                .get_job(job_id)
                .ok_or_else(|| EntitlementError::not_found("job", job_id))?;
            let tenant_id = current.value.tenant_id;
            if !current.value.is_pending() {
                let same = matches!(
                    (&outcome, current.value.status),
                    (JobOutcome::Completed { .. }, JobStatus::Completed)
                        | (JobOutcome::Failed { .. }, JobStatus::Failed)
                );
                if same {
                    return Ok((Commit::new(Partition::Tenant(tenant_id)), current.value));
                }
                return Err(EntitlementError::InvalidTransition {
                    from: current.value.status.to_string(),
                    to: match outcome {
                        JobOutcome::Completed { .. } => "completed".into(),
                        JobOutcome::Failed { .. } => "failed".into(),
                    },
                    reason: "job already finished".into(),
                });
            }

            let before_job = current.value;
            let mut job = before_job.clone();
            match &outcome {
                JobOutcome::Completed { data_ref } => job.complete(data_ref.clone(), now)?,
                JobOutcome::Failed { reason } => job.fail(reason.clone(), now)?,
            }
            let mut step = Step::new(tenant_id, actor)
                .audit_job(Some(&before_job), &job)
                .put_job(job.clone(), Some(current.version));

            let sub_current = require_subscription(store, tenant_id, &job.app_id)?;
            if sub_current.value.pending_job != Some(job.id) {
                tracing::debug!(job_id = %job.id, "outcome for a job no longer awaited");
                return Ok((step.commit, job));
            }
            let mut sub = sub_current.value.clone();
            match (job.kind, &outcome) {
                (JobKind::Archive, JobOutcome::Completed { .. }) => {
                    let data_ref = job.data_ref.clone().unwrap_or_else(|| job.id.to_string());
                    sub.record_archive(data_ref);
                    if sub.status == SubscriptionStatus::SuspendedGrace && sub.grace_elapsed(now) {
                        sub.transition(
                            SubscriptionStatus::Archived,
                            now,
                            Some("archived after grace period".into()),
                        )?;
                    }
                }
                (JobKind::Archive, JobOutcome::Failed { reason }) => {
                    sub.pending_job = None;
                    sub.transition(SubscriptionStatus::ArchivalFailed, now, Some(reason.clone()))?;
                }
                (JobKind::Restore, JobOutcome::Completed { .. }) => {
                    sub.pending_job = None;
                    sub.transition(SubscriptionStatus::Active, now, Some("restored".into()))?;
                    sub.restore_configuration();
                    sub.archival_completed = false;
                }
                (JobKind::Restore, JobOutcome::Failed { reason }) => {
                    sub.pending_job = None;
                    sub.transition(SubscriptionStatus::RestoreFailed, now, Some(reason.clone()))?;
                }
            }
            step = step
                .audit_subscription(
                    AuditAction::SubscriptionTransition,
                    Some(&sub_current.value),
                    &sub,
                )
                .put_subscription(sub, Some(sub_current.version));
            Ok((step.commit, job))
        })?;
        match &outcome {
            JobOutcome::Completed { .. } => {
                tracing::info!(job_id = %job_id, kind = %job.kind, app = %job.app_id, "job completed");
            }
            JobOutcome::Failed { reason } => {
                let error = match job.kind {
                    JobKind::Archive => EntitlementError::ArchivalFailed {
                        app: job.app_id.to_string(),
                        reason: reason.clone(),
                    },
                    JobKind::Restore => EntitlementError::RestoreFailed {
                        app: job.app_id.to_string(),
                        reason: reason.clone(),
                    },
                };
                tracing::warn!(job_id = %job_id, error = %error, "job failed");
            }
        }
        Ok(job)
    }

    /// Archive without grace, dropping archived data. On an archived
    /// subscription only the archived data is dropped.
    pub fn purge(
        &self,
        tenant_id: TenantId,
        app: &AppId,
        actor: &str,
    ) -> EntitlementResult<Subscription> {
        let sub = self.run(|store, now| {
            let current = require_subscription(store, tenant_id, app)?;
            let mut sub = current.value.clone();
            let mut step = Step::new(tenant_id, actor);
            match sub.status {
                SubscriptionStatus::Active | SubscriptionStatus::SuspendedGrace => {
                    step = step.supersede_pending(store, &mut sub, now)?;
                    sub.transition(SubscriptionStatus::Archived, now, Some("purge".into()))?;
                    sub.grace_period_end = None;
                }
                SubscriptionStatus::Archived => {}
                other => {
                    return Err(EntitlementError::InvalidTransition {
                        from: other.to_string(),
                        to: SubscriptionStatus::Archived.to_string(),
                        reason: "purge is only possible from active, suspended_grace or archived"
                            .into(),
                    })
                }
            }
            sub.purge_data();
            sub.archival_completed = false;
            let step = step
                .audit_subscription(
                    AuditAction::SubscriptionTransition,
                    Some(&current.value),
                    &sub,
                )
                .put_subscription(sub.clone(), Some(current.version));
            Ok((step.commit, sub))
        })?;
        tracing::info!(tenant_id = %tenant_id, app = %app, "subscription purged");
        Ok(sub)
    }

    /// Hand a freshly committed job to the archiver. A trigger failure is
    /// recorded as a job failure.
    fn dispatch(&self, job: &JobRecord, actor: &str) -> EntitlementResult<()> {
        let request = JobRequest {
            job_id: job.id,
            tenant_id: job.tenant_id,
            app_id: job.app_id.clone(),
            job_type: job.kind,
            data_ref: job.data_ref.clone(),
        };
        if let Err(e) = self.archiver.trigger(&request) {
            tracing::warn!(job_id = %job.id, error = %e, "archiver trigger failed");
            self.job_completed(
                job.id,
                JobOutcome::Failed {
                    reason: e.to_string(),
                },
                actor,
            )?;
        }
        Ok(())
    }

    /// Latest stored state, falling back to `committed` if it vanished.
    fn current_subscription(
        &self,
        tenant_id: TenantId,
        app: &AppId,
        committed: Subscription,
    ) -> Subscription {
        self.store
            .get_subscription(tenant_id, app)
            .map_or(committed, |v| v.value)
    }
}

fn ready_to_archive(sub: &Subscription, now: DateTime<Utc>) -> bool {
    sub.status == SubscriptionStatus::SuspendedGrace && sub.archival_completed && sub.grace_elapsed(now)
}
