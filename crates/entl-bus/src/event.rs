//! Events published on the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use entl_store::{Change, CommitResult, Partition};

/// One committed change set, as seen by subscribers.
///
/// Carries the post-commit records, never a diff, so applying an event
/// twice yields the same snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitlementEvent {
    /// Partition the commit belongs to.
    pub partition: Partition,
    /// Partition sequence number of the commit.
    pub sequence: u64,
    /// When the commit was applied.
    pub committed_at: DateTime<Utc>,
    /// Post-commit records.
    pub changes: Vec<Change>,
}

impl From<&CommitResult> for EntitlementEvent {
    fn from(result: &CommitResult) -> Self {
        Self {
            partition: result.partition,
            sequence: result.sequence,
            committed_at: result.committed_at,
            changes: result.changes.clone(),
        }
    }
}
