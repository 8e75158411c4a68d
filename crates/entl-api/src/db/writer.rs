//! Write-behind persistence.
//!
//! The store calls observers while holding a partition lock, so the
//! observer only enqueues. A single writer task drains the queue in order,
//! which keeps each partition's commits in sequence. Failed writes are
//! logged and counted; the in-memory store stays authoritative.

use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use entl_audit::AuditEntry;
use entl_store::{CommitObserver, CommitResult};

use super::{audit, records};

/// Work for the writer task.
#[derive(Debug)]
pub enum PersistMessage {
    /// A committed batch: its record changes and audit entries.
    Commit(Box<CommitResult>),
    /// Audit entries recorded outside a commit (sampled decisions).
    Audit(Vec<AuditEntry>),
}

/// Sending side of the persistence queue.
#[derive(Debug, Clone)]
pub struct PersistenceHandle {
    tx: mpsc::UnboundedSender<PersistMessage>,
}

impl PersistenceHandle {
    /// Queue audit entries for persistence.
    pub fn persist_audit(&self, entries: Vec<AuditEntry>) {
        if entries.is_empty() {
            return;
        }
        if self.tx.send(PersistMessage::Audit(entries)).is_err() {
            tracing::error!("persistence writer stopped, audit entries not persisted");
        }
    }
}

impl CommitObserver for PersistenceHandle {
    fn on_commit(&self, result: &CommitResult) {
        if self
            .tx
            .send(PersistMessage::Commit(Box::new(result.clone())))
            .is_err()
        {
            tracing::error!(
                partition = %result.partition,
                sequence = result.sequence,
                "persistence writer stopped, commit not persisted"
            );
        }
    }
}

/// Start the writer task. Register the returned handle on the store to
/// persist every commit.
pub fn spawn_writer(pool: PgPool) -> (PersistenceHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(Arc::new(pool), rx));
    (PersistenceHandle { tx }, task)
}

async fn run(pool: Arc<PgPool>, mut rx: mpsc::UnboundedReceiver<PersistMessage>) {
    while let Some(message) = rx.recv().await {
        let (label, outcome) = match &message {
            PersistMessage::Commit(result) => ("commit", write_commit(&pool, result).await),
            PersistMessage::Audit(entries) => ("audit", audit::insert_all(&pool, entries).await),
        };
        if let Err(e) = outcome {
            metrics::counter!("entl_persistence_failures_total", "kind" => label).increment(1);
            tracing::error!(kind = label, error = %e, "persistence write failed");
        }
    }
    tracing::info!("persistence writer stopped");
}

/// Record changes and their audit entries land together or not at all.
async fn write_commit(pool: &PgPool, result: &CommitResult) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    records::apply_commit(&mut tx, result).await?;
    audit::insert_entries(&mut tx, &result.audit).await?;
    tx.commit().await
}

/// Handle whose queue is drained by the caller, for tests.
#[cfg(test)]
pub(crate) fn test_handle() -> (PersistenceHandle, mpsc::UnboundedReceiver<PersistMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (PersistenceHandle { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use entl_core::PlanTier;
    use entl_lifecycle::{LifecycleConfig, LifecycleManager, RecordingArchiver};
    use entl_store::EntitlementStore;

    #[test]
    fn commits_are_queued_in_order() {
        let store = Arc::new(EntitlementStore::default());
        let (handle, mut rx) = test_handle();
        store.register_observer(Arc::new(handle));
        let manager = LifecycleManager::new(
            Arc::clone(&store),
            Arc::new(RecordingArchiver::new()),
            LifecycleConfig::default(),
        );

        let tenant = manager.create_tenant("acme", PlanTier::Basic, "ops").unwrap();
        manager.create_tenant("globex", PlanTier::Premium, "ops").unwrap();

        let Ok(PersistMessage::Commit(first)) = rx.try_recv() else {
            panic!("expected a queued commit");
        };
        assert_eq!(first.partition.tenant(), Some(tenant.id));
        assert_eq!(first.sequence, 1);
        assert_eq!(first.audit.len(), 1);
        assert!(matches!(rx.try_recv(), Ok(PersistMessage::Commit(_))));
        assert!(rx.try_recv().is_err());
    }

    fn first_commit(
        manager: &LifecycleManager,
        rx: &mut mpsc::UnboundedReceiver<PersistMessage>,
    ) -> CommitResult {
        manager.create_tenant("initech", PlanTier::Basic, "ops").unwrap();
        match rx.try_recv() {
            Ok(PersistMessage::Commit(result)) => *result,
            other => panic!("expected a queued commit, got {other:?}"),
        }
    }

    /// Runs against Postgres when `DATABASE_URL` is set; skipped otherwise.
    #[tokio::test]
    async fn failed_audit_insert_rolls_back_record_changes() {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            return;
        };
        let pool = crate::db::init_pool(Some(&url)).await.unwrap().unwrap();

        let store = Arc::new(EntitlementStore::default());
        let (handle, mut rx) = test_handle();
        store.register_observer(Arc::new(handle));
        let manager = LifecycleManager::new(
            Arc::clone(&store),
            Arc::new(RecordingArchiver::new()),
            LifecycleConfig::default(),
        );
        let mut result = first_commit(&manager, &mut rx);
        let record_key = match &result.changes[0] {
            entl_store::Change::Put { record, .. } => record.key().to_string(),
            entl_store::Change::Delete { key } => key.to_string(),
        };
        // Out of range for BIGINT, so the audit insert fails after the
        // record upsert ran.
        result.audit[0].position = u64::MAX;

        assert!(write_commit(&pool, &result).await.is_err());
        let stored: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM entitlement_records WHERE record_key = $1")
                .bind(&record_key)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(stored, 0);
    }

    #[test]
    fn empty_audit_batches_are_dropped() {
        let (handle, mut rx) = test_handle();
        handle.persist_audit(Vec::new());
        assert!(rx.try_recv().is_err());
    }
}
