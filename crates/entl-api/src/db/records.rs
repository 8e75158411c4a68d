//! Record and partition-sequence persistence.
//!
//! Writes apply a committed [`CommitResult`] inside the caller's
//! transaction. An upsert only replaces a row holding an older version, so
//! replaying a commit is harmless.

use sqlx::{PgPool, Postgres, Transaction};

use entl_store::{Change, CommitResult, Partition, Record, StoredRecord};

fn protocol(what: &str, e: impl std::fmt::Display) -> sqlx::Error {
    sqlx::Error::Protocol(format!("failed to {what}: {e}"))
}

fn to_i64(value: u64, what: &str) -> Result<i64, sqlx::Error> {
    i64::try_from(value).map_err(|e| protocol(what, e))
}

/// Apply one commit's changes and advance its partition sequence. Nothing
/// is durable until the caller commits `tx`.
pub async fn apply_commit(
    tx: &mut Transaction<'_, Postgres>,
    result: &CommitResult,
) -> Result<(), sqlx::Error> {
    for change in &result.changes {
        match change {
            Change::Put { record, version } => {
                upsert(tx, record, *version, result).await?;
            }
            Change::Delete { key } => {
                sqlx::query("DELETE FROM entitlement_records WHERE record_key = $1")
                    .bind(key.to_string())
                    .execute(&mut **tx)
                    .await?;
            }
        }
    }
    sqlx::query(
        "INSERT INTO partition_sequences (partition, sequence) VALUES ($1, $2)
         ON CONFLICT (partition) DO UPDATE SET sequence = EXCLUDED.sequence
         WHERE partition_sequences.sequence < EXCLUDED.sequence",
    )
    .bind(result.partition.to_string())
    .bind(to_i64(result.sequence, "encode partition sequence")?)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert(
    tx: &mut Transaction<'_, Postgres>,
    record: &Record,
    version: u64,
    result: &CommitResult,
) -> Result<(), sqlx::Error> {
    let key = record.key();
    let body = serde_json::to_value(record).map_err(|e| protocol("serialize record", e))?;
    sqlx::query(
        "INSERT INTO entitlement_records (record_key, kind, partition, version, body, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (record_key) DO UPDATE
         SET version = EXCLUDED.version, body = EXCLUDED.body, updated_at = EXCLUDED.updated_at
         WHERE entitlement_records.version < EXCLUDED.version",
    )
    .bind(key.to_string())
    .bind(key.kind().as_str())
    .bind(key.partition().to_string())
    .bind(to_i64(version, "encode record version")?)
    .bind(&body)
    .bind(result.committed_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Every stored record.
pub async fn load_all(pool: &PgPool) -> Result<Vec<StoredRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RecordRow>(
        "SELECT record_key, version, body FROM entitlement_records ORDER BY record_key",
    )
    .fetch_all(pool)
    .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        match row.into_stored() {
            Ok(stored) => records.push(stored),
            Err((key, e)) => {
                tracing::warn!(record_key = %key, error = %e, "skipping undecodable record");
            }
        }
    }
    Ok(records)
}

/// Last persisted sequence of every partition.
pub async fn load_sequences(pool: &PgPool) -> Result<Vec<(Partition, u64)>, sqlx::Error> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT partition, sequence FROM partition_sequences")
            .fetch_all(pool)
            .await?;

    rows.into_iter()
        .map(|(partition, sequence)| {
            let partition: Partition = partition
                .parse()
                .map_err(|e| protocol("decode partition", e))?;
            let sequence = u64::try_from(sequence).map_err(|e| protocol("decode sequence", e))?;
            Ok((partition, sequence))
        })
        .collect()
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    record_key: String,
    version: i64,
    body: serde_json::Value,
}

impl RecordRow {
    fn into_stored(self) -> Result<StoredRecord, (String, String)> {
        let record: Record =
            serde_json::from_value(self.body).map_err(|e| (self.record_key.clone(), e.to_string()))?;
        let version =
            u64::try_from(self.version).map_err(|e| (self.record_key.clone(), e.to_string()))?;
        Ok(StoredRecord { record, version })
    }
}
