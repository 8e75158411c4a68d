//! Audit event persistence.
//!
//! The chain is append-only: inserts keyed by position are idempotent and
//! rows are never updated. Loaded entries are verified by the caller.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use entl_audit::{AuditAction, AuditEntry};
use entl_core::TenantId;

/// Append entries in their own transaction.
pub async fn insert_all(pool: &PgPool, entries: &[AuditEntry]) -> Result<(), sqlx::Error> {
    if entries.is_empty() {
        return Ok(());
    }
    let mut tx = pool.begin().await?;
    insert_entries(&mut tx, entries).await?;
    tx.commit().await
}

/// Append entries inside `tx`, skipping positions already stored.
pub async fn insert_entries(
    tx: &mut Transaction<'_, Postgres>,
    entries: &[AuditEntry],
) -> Result<(), sqlx::Error> {
    for entry in entries {
        let position = i64::try_from(entry.position)
            .map_err(|e| sqlx::Error::Protocol(format!("failed to encode audit position: {e}")))?;
        sqlx::query(
            "INSERT INTO audit_events
               (position, id, tenant_id, user_id, action, subject, before_state, after_state,
                actor, recorded_at, previous_hash, entry_hash)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (position) DO NOTHING",
        )
        .bind(position)
        .bind(entry.id)
        .bind(entry.tenant_id.map(|t| *t.as_uuid()))
        .bind(&entry.user_id)
        .bind(entry.action.as_str())
        .bind(&entry.subject)
        .bind(&entry.before)
        .bind(&entry.after)
        .bind(&entry.actor)
        .bind(entry.timestamp)
        .bind(&entry.previous_hash)
        .bind(&entry.entry_hash)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// The whole chain in position order.
pub async fn load_all(pool: &PgPool) -> Result<Vec<AuditEntry>, sqlx::Error> {
    let rows = sqlx::query_as::<_, AuditRow>(
        "SELECT position, id, tenant_id, user_id, action, subject, before_state, after_state,
                actor, recorded_at, previous_hash, entry_hash
         FROM audit_events ORDER BY position",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(AuditRow::into_entry).collect()
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    position: i64,
    id: Uuid,
    tenant_id: Option<Uuid>,
    user_id: Option<String>,
    action: String,
    subject: String,
    before_state: Option<serde_json::Value>,
    after_state: Option<serde_json::Value>,
    actor: String,
    recorded_at: DateTime<Utc>,
    previous_hash: String,
    entry_hash: String,
}

impl AuditRow {
    fn into_entry(self) -> Result<AuditEntry, sqlx::Error> {
        // An unknown action cannot be defaulted: the entry hash covers it.
        let action: AuditAction = self
            .action
            .parse()
            .map_err(|e| sqlx::Error::Protocol(format!("audit entry {}: {e}", self.position)))?;
        let position = u64::try_from(self.position)
            .map_err(|e| sqlx::Error::Protocol(format!("audit entry {}: {e}", self.position)))?;
        Ok(AuditEntry {
            id: self.id,
            position,
            tenant_id: self.tenant_id.map(TenantId::from_uuid),
            user_id: self.user_id,
            action,
            subject: self.subject,
            before: self.before_state,
            after: self.after_state,
            actor: self.actor,
            timestamp: self.recorded_at,
            previous_hash: self.previous_hash,
            entry_hash: self.entry_hash,
        })
    }
}
