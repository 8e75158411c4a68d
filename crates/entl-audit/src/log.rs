//! In-memory audit log.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use entl_core::{CanonicalizationError, TenantId};

use crate::entry::{AuditAction, AuditDraft, AuditEntry, GENESIS_HASH};

/// Filter for [`AuditLog::query`]. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditQuery {
    /// Only entries for this tenant.
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    /// Only entries at or after this instant.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Only entries with this action.
    #[serde(default)]
    pub action: Option<AuditAction>,
    /// At most this many entries (the most recent ones).
    #[serde(default)]
    pub limit: Option<usize>,
}

impl AuditQuery {
    fn matches(&self, entry: &AuditEntry) -> bool {
        self.tenant_id.map_or(true, |t| entry.tenant_id == Some(t))
            && self.since.map_or(true, |s| entry.timestamp >= s)
            && self.action.map_or(true, |a| entry.action == a)
    }
}

/// Outcome of a chain verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    /// Entries examined.
    pub total_entries: usize,
    /// Position of the first entry whose link or hash does not check out.
    pub first_broken: Option<u64>,
    /// Entries with a bad link or hash.
    pub broken_links: usize,
    /// `broken_links == 0`.
    pub chain_valid: bool,
}

/// Verify a sequence of entries: positions consecutive, each entry's
/// `previous_hash` equal to the predecessor's `entry_hash`, and each
/// `entry_hash` matching the entry's content.
pub fn verify_entries<'a>(entries: impl IntoIterator<Item = &'a AuditEntry>) -> ChainVerification {
    let mut total = 0;
    let mut broken = 0;
    let mut first_broken = None;
    let mut expected_prev: Option<&str> = None;
    let mut expected_pos: Option<u64> = None;

    for entry in entries {
        total += 1;
        let link_ok = match expected_prev {
            Some(prev) => entry.previous_hash == prev,
            None => entry.position != 0 || entry.previous_hash == GENESIS_HASH,
        };
        let pos_ok = expected_pos.map_or(true, |p| entry.position == p);
        let hash_ok = entry
            .compute_hash()
            .map(|h| h == entry.entry_hash)
            .unwrap_or(false);
        if !(link_ok && pos_ok && hash_ok) {
            broken += 1;
            first_broken.get_or_insert(entry.position);
        }
        expected_prev = Some(&entry.entry_hash);
        expected_pos = Some(entry.position + 1);
    }

    ChainVerification {
        total_entries: total,
        first_broken,
        broken_links: broken,
        chain_valid: broken == 0,
    }
}

/// Append-only, hash-chained audit log.
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl AuditLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted entries (hydration). Entries are taken as-is;
    /// call [`AuditLog::verify_chain`] to check them.
    pub fn from_entries(mut entries: Vec<AuditEntry>) -> Self {
        entries.sort_by_key(|e| e.position);
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Replace the contents with persisted entries (hydration).
    pub fn restore(&self, mut entries: Vec<AuditEntry>) {
        entries.sort_by_key(|e| e.position);
        *self.entries.write() = entries;
    }

    /// Append one entry.
    pub fn record(
        &self,
        draft: AuditDraft,
        at: DateTime<Utc>,
    ) -> Result<AuditEntry, CanonicalizationError> {
        let mut sealed = self.record_all(vec![draft], at)?;
        Ok(sealed.remove(0))
    }

    /// Append a group of entries contiguously. All or nothing: if any draft
    /// fails to seal, the log is unchanged.
    pub fn record_all(
        &self,
        drafts: Vec<AuditDraft>,
        at: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>, CanonicalizationError> {
        let mut entries = self.entries.write();
        let mut position = entries.len() as u64;
        let mut previous = entries
            .last()
            .map_or_else(|| GENESIS_HASH.to_string(), |e| e.entry_hash.clone());

        let mut sealed = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let entry = AuditEntry::seal(draft, position, previous, at)?;
            previous = entry.entry_hash.clone();
            position += 1;
            sealed.push(entry);
        }
        entries.extend(sealed.iter().cloned());
        Ok(sealed)
    }

    /// Entries matching `query`, in append order.
    pub fn query(&self, query: &AuditQuery) -> Vec<AuditEntry> {
        let entries = self.entries.read();
        let mut matched: Vec<AuditEntry> =
            entries.iter().filter(|e| query.matches(e)).cloned().collect();
        if let Some(limit) = query.limit {
            let start = matched.len().saturating_sub(limit);
            matched.drain(..start);
        }
        matched
    }

    /// Entries at or after `position`.
    pub fn entries_since(&self, position: u64) -> Vec<AuditEntry> {
        let entries = self.entries.read();
        let start = usize::try_from(position).unwrap_or(usize::MAX).min(entries.len());
        entries[start..].to_vec()
    }

    /// Verify the whole chain.
    pub fn verify_chain(&self) -> ChainVerification {
        verify_entries(self.entries.read().iter())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Hash of the last entry, or the genesis hash.
    pub fn head_hash(&self) -> String {
        self.entries
            .read()
            .last()
            .map_or_else(|| GENESIS_HASH.to_string(), |e| e.entry_hash.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn draft(tenant: TenantId, action: AuditAction) -> AuditDraft {
        AuditDraft::new(Some(tenant), action, "subject", "system")
            .with_change(None, Some(&json!({"n": 1})))
    }

    #[test]
    fn record_chains_entries() {
        let log = AuditLog::new();
        let t = TenantId::new();
        let a = log.record(draft(t, AuditAction::TenantCreated), Utc::now()).unwrap();
        let b = log.record(draft(t, AuditAction::LicenseIssued), Utc::now()).unwrap();
        assert_eq!(a.position, 0);
        assert_eq!(a.previous_hash, GENESIS_HASH);
        assert_eq!(b.previous_hash, a.entry_hash);
        assert_eq!(log.head_hash(), b.entry_hash);
        assert!(log.verify_chain().chain_valid);
    }

    #[test]
    fn record_all_is_atomic() {
        let log = AuditLog::new();
        let t = TenantId::new();
        let bad = AuditDraft::new(Some(t), AuditAction::FlagUpdated, "flag", "op")
            .with_change(None, Some(&json!({"x": 1.5})));
        assert!(log
            .record_all(vec![draft(t, AuditAction::FlagCreated), bad], Utc::now())
            .is_err());
        assert!(log.is_empty());
    }

    #[test]
    fn query_filters_in_append_order() {
        let log = AuditLog::new();
        let t1 = TenantId::new();
        let t2 = TenantId::new();
        let start = Utc::now();
        log.record(draft(t1, AuditAction::TenantCreated), start).unwrap();
        log.record(draft(t2, AuditAction::TenantCreated), start).unwrap();
        log.record(draft(t1, AuditAction::LicenseIssued), start + Duration::hours(1))
            .unwrap();

        let q = AuditQuery {
            tenant_id: Some(t1),
            ..Default::default()
        };
        let got = log.query(&q);
        assert_eq!(got.len(), 2);
        assert!(got[0].position < got[1].position);

        let q = AuditQuery {
            since: Some(start + Duration::minutes(30)),
            ..Default::default()
        };
        assert_eq!(log.query(&q).len(), 1);

        let q = AuditQuery {
            action: Some(AuditAction::TenantCreated),
            limit: Some(1),
            ..Default::default()
        };
        let got = log.query(&q);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].tenant_id, Some(t2));
    }

    #[test]
    fn verification_detects_tampering() {
        let log = AuditLog::new();
        let t = TenantId::new();
        for _ in 0..5 {
            log.record(draft(t, AuditAction::FlagUpdated), Utc::now()).unwrap();
        }
        let mut exported = log.entries_since(0);
        exported[2].actor = "mallory".into();
        let result = verify_entries(&exported);
        assert!(!result.chain_valid);
        assert_eq!(result.first_broken, Some(2));

        let mut exported = log.entries_since(0);
        exported.remove(3);
        let result = verify_entries(&exported);
        assert_eq!(result.first_broken, Some(4));
    }

    #[test]
    fn hydrated_log_continues_the_chain() {
        let log = AuditLog::new();
        let t = TenantId::new();
        log.record(draft(t, AuditAction::TenantCreated), Utc::now()).unwrap();
        let restored = AuditLog::from_entries(log.entries_since(0));
        let next = restored
            .record(draft(t, AuditAction::LicenseIssued), Utc::now())
            .unwrap();
        assert_eq!(next.position, 1);
        assert!(restored.verify_chain().chain_valid);
    }
}
