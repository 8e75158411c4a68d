//! Commit requests and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use entl_audit::{AuditDraft, AuditEntry};

use crate::record::{Partition, Record, RecordKey};

/// A single conditional write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Create or replace a record.
    Put(Record),
    /// Remove a record.
    Delete(RecordKey),
}

impl WriteOp {
    /// Key the write targets.
    pub fn key(&self) -> RecordKey {
        match self {
            Self::Put(record) => record.key(),
            Self::Delete(key) => key.clone(),
        }
    }
}

/// A write plus the version it was computed against.
#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    /// The write.
    pub op: WriteOp,
    /// Version read by the caller; `None` means the record must not exist.
    pub expected: Option<u64>,
}

/// A transactional batch of writes to one partition, with its audit drafts.
#[derive(Debug, Clone)]
pub struct Commit {
    /// Partition every write must belong to.
    pub partition: Partition,
    /// Writes, applied in order.
    pub writes: Vec<Write>,
    /// Audit entries recorded with the writes.
    pub audit: Vec<AuditDraft>,
}

impl Commit {
    /// Empty commit against `partition`.
    pub fn new(partition: Partition) -> Self {
        Self {
            partition,
            writes: Vec::new(),
            audit: Vec::new(),
        }
    }

    /// Create a record that must not already exist.
    pub fn create(self, record: impl Into<Record>) -> Self {
        self.put(record, None)
    }

    /// Replace a record read at `expected` (or create if `None`).
    pub fn put(mut self, record: impl Into<Record>, expected: Option<u64>) -> Self {
        self.writes.push(Write {
            op: WriteOp::Put(record.into()),
            expected,
        });
        self
    }

    /// Delete a record read at `expected`.
    pub fn delete(mut self, key: RecordKey, expected: u64) -> Self {
        self.writes.push(Write {
            op: WriteOp::Delete(key),
            expected: Some(expected),
        });
        self
    }

    /// Attach an audit draft.
    pub fn audit(mut self, draft: AuditDraft) -> Self {
        self.audit.push(draft);
        self
    }

    /// Whether the commit writes nothing.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.audit.is_empty()
    }
}

/// A record change as observed after a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    /// Record written at `version`.
    Put {
        /// The record after the write.
        record: Record,
        /// Its new version.
        version: u64,
    },
    /// Record removed.
    Delete {
        /// Key of the removed record.
        key: RecordKey,
    },
}

impl Change {
    /// Key the change applies to.
    pub fn key(&self) -> RecordKey {
        match self {
            Self::Put { record, .. } => record.key(),
            Self::Delete { key } => key.clone(),
        }
    }
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitResult {
    /// Partition committed to.
    pub partition: Partition,
    /// Partition sequence number assigned to the commit.
    pub sequence: u64,
    /// When the commit was applied.
    pub committed_at: DateTime<Utc>,
    /// Post-commit state of every written record.
    pub changes: Vec<Change>,
    /// Audit entries recorded with the commit.
    pub audit: Vec<AuditEntry>,
}

impl CommitResult {
    /// The record written under `key`, if any.
    pub fn written(&self, key: &RecordKey) -> Option<&Record> {
        self.changes.iter().find_map(|c| match c {
            Change::Put { record, .. } if &record.key() == key => Some(record),
            _ => None,
        })
    }

    /// New version of the record under `key`, if it was written.
    pub fn version_of(&self, key: &RecordKey) -> Option<u64> {
        self.changes.iter().find_map(|c| match c {
            Change::Put { record, version } if &record.key() == key => Some(*version),
            _ => None,
        })
    }
}
