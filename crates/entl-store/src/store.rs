//! The in-memory entitlement store.
//!
//! All locks are `parking_lot` and none is held across an `.await`; the
//! store is synchronous and shared behind an `Arc`. Durability is provided
//! by a commit observer that persists results write-behind, and by
//! [`EntitlementStore::hydrate`] on startup.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use entl_audit::{AuditEntry, AuditLog};
use entl_core::{
    ActivationToken, AppId, Clock, EntitlementError, EntitlementResult, FeatureName, JobId,
    LicenseId, SystemClock, TenantId, ValidationError,
};
use entl_eval::{FeatureCatalog, FeatureFlag, TenantSnapshot};
use entl_state::{
    Activation, JobRecord, License, LicenseStatus, Subscription, Tenant, DEFAULT_PRODUCT,
};

use crate::commit::{Change, Commit, CommitResult, WriteOp};
use crate::record::{Partition, Record, RecordKey, RecordKind, StoredRecord, Versioned};

/// Receives every successful commit, in partition sequence order.
///
/// Called while the partition lock is held: implementations must hand the
/// result off (channel send, broadcast) and return without blocking.
pub trait CommitObserver: Send + Sync {
    /// A commit was applied.
    fn on_commit(&self, result: &CommitResult);
}

#[derive(Debug, Default)]
struct PartitionState {
    sequence: u64,
    records: BTreeMap<RecordKey, Versioned<Record>>,
}

impl PartitionState {
    fn values<'a, T: 'a>(
        &'a self,
        kind: RecordKind,
        pick: impl Fn(&'a Record) -> Option<&'a T> + 'a,
    ) -> impl Iterator<Item = Versioned<T>> + 'a
    where
        T: Clone,
    {
        self.records
            .iter()
            .filter(move |(k, _)| k.kind() == kind)
            .filter_map(move |(_, v)| {
                pick(&v.value).map(|inner| Versioned {
                    version: v.version,
                    value: inner.clone(),
                })
            })
    }
}

/// Persisted state loaded on startup.
#[derive(Debug, Clone, Default)]
pub struct Hydration {
    /// Every stored record with its version.
    pub records: Vec<StoredRecord>,
    /// Last commit sequence of each partition.
    pub sequences: Vec<(Partition, u64)>,
    /// The audit chain.
    pub audit: Vec<AuditEntry>,
}

/// Partitioned, versioned record store with transactional commits.
pub struct EntitlementStore {
    partitions: RwLock<HashMap<Partition, Arc<RwLock<PartitionState>>>>,
    activation_index: RwLock<HashMap<ActivationToken, TenantId>>,
    job_index: RwLock<HashMap<JobId, TenantId>>,
    license_index: RwLock<HashMap<LicenseId, TenantId>>,
    observers: RwLock<Vec<Arc<dyn CommitObserver>>>,
    catalog: RwLock<Arc<FeatureCatalog>>,
    audit: AuditLog,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for EntitlementStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitlementStore")
            .field("partitions", &self.partitions.read().len())
            .field("observers", &self.observers.read().len())
            .field("audit_entries", &self.audit.len())
            .finish()
    }
}

impl Default for EntitlementStore {
    fn default() -> Self {
        Self::new(FeatureCatalog::default())
    }
}

impl EntitlementStore {
    /// Empty store with the wall clock.
    pub fn new(catalog: FeatureCatalog) -> Self {
        Self::with_clock(catalog, Arc::new(SystemClock))
    }

    /// Empty store reading time from `clock`.
    pub fn with_clock(catalog: FeatureCatalog, clock: Arc<dyn Clock>) -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            activation_index: RwLock::new(HashMap::new()),
            job_index: RwLock::new(HashMap::new()),
            license_index: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            catalog: RwLock::new(Arc::new(catalog)),
            audit: AuditLog::new(),
            clock,
        }
    }

    /// Register an observer for all future commits.
    pub fn register_observer(&self, observer: Arc<dyn CommitObserver>) {
        self.observers.write().push(observer);
    }

    /// The audit log written by commits.
    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Feature catalog in effect.
    pub fn catalog(&self) -> Arc<FeatureCatalog> {
        Arc::clone(&self.catalog.read())
    }

    /// Replace the feature catalog. Takes effect on the next snapshot.
    pub fn set_catalog(&self, catalog: FeatureCatalog) {
        *self.catalog.write() = Arc::new(catalog);
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ── Partitions ──────────────────────────────────────────────────

    fn partition(&self, partition: Partition) -> Arc<RwLock<PartitionState>> {
        if let Some(existing) = self.partitions.read().get(&partition) {
            return Arc::clone(existing);
        }
        let mut partitions = self.partitions.write();
        Arc::clone(partitions.entry(partition).or_default())
    }

    fn existing_partition(&self, partition: Partition) -> Option<Arc<RwLock<PartitionState>>> {
        self.partitions.read().get(&partition).cloned()
    }

    fn read<R>(&self, partition: Partition, f: impl FnOnce(&PartitionState) -> R) -> Option<R> {
        self.existing_partition(partition)
            .map(|p| f(&p.read()))
    }

    /// Last commit sequence of `partition` (0 if none).
    pub fn sequence(&self, partition: Partition) -> u64 {
        self.read(partition, |p| p.sequence).unwrap_or(0)
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Any record by key.
    pub fn get(&self, key: &RecordKey) -> Option<Versioned<Record>> {
        self.read(key.partition(), |p| p.records.get(key).cloned())
            .flatten()
    }

    /// A tenant.
    pub fn get_tenant(&self, tenant: TenantId) -> Option<Versioned<Tenant>> {
        self.get(&RecordKey::Tenant { tenant })
            .and_then(|v| v.value.as_tenant().cloned().map(|t| Versioned { version: v.version, value: t }))
    }

    /// All tenants.
    pub fn list_tenants(&self) -> Vec<Tenant> {
        let partitions: Vec<Arc<RwLock<PartitionState>>> =
            self.partitions.read().values().cloned().collect();
        let mut tenants: Vec<Tenant> = partitions
            .iter()
            .flat_map(|p| {
                p.read()
                    .values(RecordKind::Tenant, Record::as_tenant)
                    .map(|v| v.value)
                    .collect::<Vec<_>>()
            })
            .collect();
        tenants.sort_by_key(|t| t.created_at);
        tenants
    }

    /// The active license of `tenant` for `product`.
    pub fn get_license(
        &self,
        tenant: TenantId,
        product: &str,
    ) -> EntitlementResult<Versioned<License>> {
        self.list_licenses(tenant)
            .into_iter()
            .find(|l| l.value.product == product && l.value.status == LicenseStatus::Active)
            .ok_or_else(|| EntitlementError::not_found("license", format!("{tenant}/{product}")))
    }

    /// The active license of `tenant` for the default product.
    pub fn get_active_license(&self, tenant: TenantId) -> EntitlementResult<Versioned<License>> {
        self.get_license(tenant, DEFAULT_PRODUCT)
    }

    /// A license by id.
    pub fn get_license_by_id(&self, id: LicenseId) -> Option<Versioned<License>> {
        let tenant = *self.license_index.read().get(&id)?;
        self.get(&RecordKey::License { tenant, id })
            .and_then(|v| v.value.as_license().cloned().map(|l| Versioned { version: v.version, value: l }))
    }

    /// Every license of `tenant`, current and historical.
    pub fn list_licenses(&self, tenant: TenantId) -> Vec<Versioned<License>> {
        self.read(Partition::Tenant(tenant), |p| {
            p.values(RecordKind::License, Record::as_license).collect()
        })
        .unwrap_or_default()
    }

    /// Effective flags for `tenant`: globals with tenant overrides applied.
    pub fn get_flags(&self, tenant: TenantId) -> Vec<FeatureFlag> {
        let mut merged: BTreeMap<FeatureName, FeatureFlag> = self
            .read(Partition::Global, |p| {
                p.values(RecordKind::Flag, Record::as_flag)
                    .map(|v| (v.value.name.clone(), v.value))
                    .collect()
            })
            .unwrap_or_default();
        if let Some(scoped) = self.read(Partition::Tenant(tenant), |p| {
            p.values(RecordKind::Flag, Record::as_flag)
                .map(|v| v.value)
                .collect::<Vec<_>>()
        }) {
            for flag in scoped {
                merged.insert(flag.name.clone(), flag);
            }
        }
        merged.into_values().collect()
    }

    /// One flag, global or tenant-scoped, exactly as stored.
    pub fn get_flag(
        &self,
        tenant: Option<TenantId>,
        name: &FeatureName,
    ) -> Option<Versioned<FeatureFlag>> {
        self.get(&RecordKey::Flag {
            tenant,
            name: name.clone(),
        })
        .and_then(|v| v.value.as_flag().cloned().map(|f| Versioned { version: v.version, value: f }))
    }

    /// Flags stored in exactly one scope.
    pub fn list_flags(&self, tenant: Option<TenantId>) -> Vec<Versioned<FeatureFlag>> {
        self.read(Partition::from(tenant), |p| {
            p.values(RecordKind::Flag, Record::as_flag).collect()
        })
        .unwrap_or_default()
    }

    /// The subscription of `tenant` to `app`.
    pub fn get_subscription(&self, tenant: TenantId, app: &AppId) -> Option<Versioned<Subscription>> {
        self.get(&RecordKey::Subscription {
            tenant,
            app: app.clone(),
        })
        .and_then(|v| {
            v.value
                .as_subscription()
                .cloned()
                .map(|s| Versioned { version: v.version, value: s })
        })
    }

    /// All subscriptions of `tenant`.
    pub fn list_subscriptions(&self, tenant: TenantId) -> Vec<Versioned<Subscription>> {
        self.read(Partition::Tenant(tenant), |p| {
            p.values(RecordKind::Subscription, Record::as_subscription)
                .collect()
        })
        .unwrap_or_default()
    }

    /// An activation by token.
    pub fn get_activation(&self, token: &ActivationToken) -> Option<Versioned<Activation>> {
        let tenant = *self.activation_index.read().get(token)?;
        self.get(&RecordKey::Activation {
            tenant,
            token: token.clone(),
        })
        .and_then(|v| {
            v.value
                .as_activation()
                .cloned()
                .map(|a| Versioned { version: v.version, value: a })
        })
    }

    /// All activations of `tenant`.
    pub fn list_activations(&self, tenant: TenantId) -> Vec<Versioned<Activation>> {
        self.read(Partition::Tenant(tenant), |p| {
            p.values(RecordKind::Activation, Record::as_activation)
                .collect()
        })
        .unwrap_or_default()
    }

    /// A job by id.
    pub fn get_job(&self, id: JobId) -> Option<Versioned<JobRecord>> {
        let tenant = *self.job_index.read().get(&id)?;
        self.get(&RecordKey::Job { tenant, id })
            .and_then(|v| v.value.as_job().cloned().map(|j| Versioned { version: v.version, value: j }))
    }

    /// All jobs of `tenant`.
    pub fn list_jobs(&self, tenant: TenantId) -> Vec<Versioned<JobRecord>> {
        self.read(Partition::Tenant(tenant), |p| {
            p.values(RecordKind::Job, Record::as_job).collect()
        })
        .unwrap_or_default()
    }

    /// Full evaluation view of `tenant`, for cache (re)synchronization.
    ///
    /// Each partition is read under its own lock; the snapshot is tagged
    /// with both sequence numbers it reflects.
    pub fn snapshot(&self, tenant: TenantId) -> TenantSnapshot {
        let mut snapshot = TenantSnapshot::empty(tenant, (*self.catalog()).clone());
        if let Some(global) = self.existing_partition(Partition::Global) {
            let global = global.read();
            snapshot.global_sequence = global.sequence;
            for flag in global.values(RecordKind::Flag, Record::as_flag) {
                snapshot.put_flag(flag.value);
            }
        }
        if let Some(part) = self.existing_partition(Partition::Tenant(tenant)) {
            let part = part.read();
            snapshot.sequence = part.sequence;
            for versioned in part.records.values() {
                match &versioned.value {
                    Record::Tenant(t) => snapshot.put_tenant(t.clone()),
                    Record::License(l) => snapshot.put_license(l.clone()),
                    Record::Subscription(s) => snapshot.put_subscription(s.clone()),
                    Record::Flag(f) => snapshot.put_flag(f.clone()),
                    Record::Activation(_) | Record::Job(_) => {}
                }
            }
        }
        snapshot
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Apply `commit` atomically. See the crate docs for semantics.
    pub fn commit(&self, commit: Commit) -> EntitlementResult<CommitResult> {
        let partition = commit.partition;
        let handle = self.partition(partition);

        if commit.is_empty() {
            return Ok(CommitResult {
                partition,
                sequence: handle.read().sequence,
                committed_at: self.clock.now(),
                changes: Vec::new(),
                audit: Vec::new(),
            });
        }

        let mut seen = BTreeSet::new();
        for write in &commit.writes {
            let key = write.op.key();
            if key.partition() != partition {
                return Err(ValidationError::Rule(format!(
                    "write to {key} does not belong to partition {partition}"
                ))
                .into());
            }
            if !seen.insert(key.clone()) {
                return Err(
                    ValidationError::Rule(format!("duplicate write to {key} in one commit")).into(),
                );
            }
        }

        let mut state = handle.write();

        for write in &commit.writes {
            let key = write.op.key();
            let current = state.records.get(&key).map(|v| v.version);
            if current != write.expected {
                metrics::counter!("entl_commit_conflicts_total").increment(1);
                tracing::debug!(
                    key = %key,
                    expected = ?write.expected,
                    current = ?current,
                    "commit rejected: version mismatch"
                );
                return Err(EntitlementError::ConcurrentModification {
                    key: key.to_string(),
                    attempts: 1,
                });
            }
        }

        let now = self.clock.now();
        let audit = self
            .audit
            .record_all(commit.audit, now)
            .map_err(|e| ValidationError::Rule(format!("audit entry rejected: {e}")))?;

        let mut changes = Vec::with_capacity(commit.writes.len());
        for write in commit.writes {
            match write.op {
                WriteOp::Put(record) => {
                    let version = write.expected.unwrap_or(0) + 1;
                    self.index(&record);
                    state.records.insert(
                        record.key(),
                        Versioned {
                            version,
                            value: record.clone(),
                        },
                    );
                    changes.push(Change::Put { record, version });
                }
                WriteOp::Delete(key) => {
                    state.records.remove(&key);
                    changes.push(Change::Delete { key });
                }
            }
        }
        state.sequence += 1;

        let result = CommitResult {
            partition,
            sequence: state.sequence,
            committed_at: now,
            changes,
            audit,
        };

        metrics::counter!("entl_commits_total").increment(1);
        tracing::debug!(
            partition = %partition,
            sequence = result.sequence,
            changes = result.changes.len(),
            "commit applied"
        );

        for observer in self.observers.read().iter() {
            observer.on_commit(&result);
        }
        drop(state);

        Ok(result)
    }

    fn index(&self, record: &Record) {
        match record {
            Record::Activation(a) => {
                self.activation_index
                    .write()
                    .insert(a.token.clone(), a.tenant_id);
            }
            Record::Job(j) => {
                self.job_index.write().insert(j.id, j.tenant_id);
            }
            Record::License(l) => {
                self.license_index.write().insert(l.id, l.tenant_id);
            }
            Record::Tenant(_) | Record::Subscription(_) | Record::Flag(_) => {}
        }
    }

    // ── Hydration / export ──────────────────────────────────────────

    /// Load persisted state. Meant for startup, before any commit.
    pub fn hydrate(&self, hydration: Hydration) {
        let record_count = hydration.records.len();
        for stored in hydration.records {
            let key = stored.record.key();
            self.index(&stored.record);
            let handle = self.partition(key.partition());
            handle.write().records.insert(
                key,
                Versioned {
                    version: stored.version,
                    value: stored.record,
                },
            );
        }
        for (partition, sequence) in hydration.sequences {
            let handle = self.partition(partition);
            let mut state = handle.write();
            state.sequence = state.sequence.max(sequence);
        }
        let audit_count = hydration.audit.len();
        self.audit.restore(hydration.audit);
        tracing::info!(
            records = record_count,
            audit_entries = audit_count,
            "store hydrated"
        );
    }

    /// Every record with its version, plus partition sequences.
    pub fn export(&self) -> Hydration {
        let partitions: Vec<(Partition, Arc<RwLock<PartitionState>>)> = self
            .partitions
            .read()
            .iter()
            .map(|(p, s)| (*p, Arc::clone(s)))
            .collect();
        let mut records = Vec::new();
        let mut sequences = Vec::new();
        for (partition, handle) in partitions {
            let state = handle.read();
            sequences.push((partition, state.sequence));
            records.extend(state.records.values().map(|v| StoredRecord {
                record: v.value.clone(),
                version: v.version,
            }));
        }
        Hydration {
            records,
            sequences,
            audit: self.audit.entries_since(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entl_audit::{AuditAction, AuditDraft};
    use entl_core::PlanTier;
    use entl_eval::RolloutPercentage;
    use parking_lot::Mutex;

    fn tenant_commit(tenant: &Tenant) -> Commit {
        Commit::new(Partition::Tenant(tenant.id))
            .create(tenant.clone())
            .audit(AuditDraft::new(
                Some(tenant.id),
                AuditAction::TenantCreated,
                format!("tenant/{}", tenant.id),
                "test",
            ))
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(Partition, u64)>>);

    impl CommitObserver for Recorder {
        fn on_commit(&self, result: &CommitResult) {
            self.0.lock().push((result.partition, result.sequence));
        }
    }

    #[test]
    fn create_then_read_back() {
        let store = EntitlementStore::default();
        let tenant = Tenant::new("acme", PlanTier::Basic, store.now());
        let result = store.commit(tenant_commit(&tenant)).unwrap();
        assert_eq!(result.sequence, 1);
        assert_eq!(result.audit.len(), 1);
        let read = store.get_tenant(tenant.id).unwrap();
        assert_eq!(read.version, 1);
        assert_eq!(read.value, tenant);
        assert_eq!(store.audit_log().len(), 1);
    }

    #[test]
    fn create_twice_conflicts() {
        let store = EntitlementStore::default();
        let tenant = Tenant::new("acme", PlanTier::Basic, store.now());
        store.commit(tenant_commit(&tenant)).unwrap();
        let err = store.commit(tenant_commit(&tenant)).unwrap_err();
        assert_eq!(err.code(), "CONCURRENT_MODIFICATION");
        assert_eq!(store.audit_log().len(), 1);
        assert_eq!(store.sequence(Partition::Tenant(tenant.id)), 1);
    }

    #[test]
    fn stale_version_fails_whole_commit() {
        let store = EntitlementStore::default();
        let mut tenant = Tenant::new("acme", PlanTier::Basic, store.now());
        store.commit(tenant_commit(&tenant)).unwrap();
        tenant.plan = PlanTier::Premium;
        let flag = FeatureFlag::new(FeatureName::new("x").unwrap(), RolloutPercentage::ALL)
            .for_tenant(tenant.id);
        let stale = Commit::new(Partition::Tenant(tenant.id))
            .create(flag.clone())
            .put(tenant.clone(), Some(7));
        assert!(store.commit(stale).is_err());
        assert!(store.get_flag(Some(tenant.id), &flag.name).is_none());
        assert_eq!(store.get_tenant(tenant.id).unwrap().value.plan, PlanTier::Basic);
    }

    #[test]
    fn writes_must_match_partition() {
        let store = EntitlementStore::default();
        let tenant = Tenant::new("acme", PlanTier::Basic, store.now());
        let wrong = Commit::new(Partition::Global).create(tenant);
        assert_eq!(store.commit(wrong).unwrap_err().code(), "VALIDATION_ERROR");
    }

    #[test]
    fn observers_see_sequence_order() {
        let store = EntitlementStore::default();
        let recorder = Arc::new(Recorder::default());
        store.register_observer(recorder.clone());
        let mut tenant = Tenant::new("acme", PlanTier::Basic, store.now());
        store.commit(tenant_commit(&tenant)).unwrap();
        for version in 1..4 {
            tenant.name = format!("acme-{version}");
            store
                .commit(Commit::new(Partition::Tenant(tenant.id)).put(tenant.clone(), Some(version)))
                .unwrap();
        }
        let seen = recorder.0.lock().clone();
        let sequences: Vec<u64> = seen.iter().map(|(_, s)| *s).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
    }

    #[test]
    fn flags_merge_global_and_tenant() {
        let store = EntitlementStore::default();
        let tenant = TenantId::new();
        let name = FeatureName::new("reports").unwrap();
        store
            .commit(
                Commit::new(Partition::Global)
                    .create(FeatureFlag::new(name.clone(), RolloutPercentage::ALL))
                    .create(FeatureFlag::new(
                        FeatureName::new("beta").unwrap(),
                        RolloutPercentage::NONE,
                    )),
            )
            .unwrap();
        store
            .commit(
                Commit::new(Partition::Tenant(tenant))
                    .create(FeatureFlag::new(name.clone(), RolloutPercentage::NONE).for_tenant(tenant)),
            )
            .unwrap();
        let flags = store.get_flags(tenant);
        assert_eq!(flags.len(), 2);
        let reports = flags.iter().find(|f| f.name == name).unwrap();
        assert_eq!(reports.rollout_percentage, RolloutPercentage::NONE);
        assert_eq!(store.get_flags(TenantId::new()).len(), 2);

        let snap = store.snapshot(tenant);
        assert_eq!(snap.sequence, 1);
        assert_eq!(snap.global_sequence, 1);
        assert_eq!(snap.flag(&name).unwrap().tenant_id, Some(tenant));
    }

    #[test]
    fn delete_removes_record() {
        let store = EntitlementStore::default();
        let name = FeatureName::new("reports").unwrap();
        store
            .commit(Commit::new(Partition::Global).create(FeatureFlag::new(name.clone(), RolloutPercentage::ALL)))
            .unwrap();
        let key = RecordKey::Flag {
            tenant: None,
            name: name.clone(),
        };
        let result = store.commit(Commit::new(Partition::Global).delete(key.clone(), 1)).unwrap();
        assert_eq!(result.changes, vec![Change::Delete { key }]);
        assert!(store.get_flag(None, &name).is_none());
    }

    #[test]
    fn export_then_hydrate_restores_everything() {
        let store = EntitlementStore::default();
        let tenant = Tenant::new("acme", PlanTier::Basic, store.now());
        store.commit(tenant_commit(&tenant)).unwrap();
        let copy = EntitlementStore::default();
        copy.hydrate(store.export());
        assert_eq!(copy.get_tenant(tenant.id).unwrap().value, tenant);
        assert_eq!(copy.sequence(Partition::Tenant(tenant.id)), 1);
        assert!(copy.audit_log().verify_chain().chain_valid);
        assert_eq!(copy.list_tenants().len(), 1);
    }

    #[test]
    fn empty_commit_is_a_no_op() {
        let store = EntitlementStore::default();
        let recorder = Arc::new(Recorder::default());
        store.register_observer(recorder.clone());
        let result = store.commit(Commit::new(Partition::Global)).unwrap();
        assert_eq!(result.sequence, 0);
        assert!(recorder.0.lock().is_empty());
    }
}
