//! # entl-audit: Audit Log
//!
//! Append-only log of every entitlement mutation, plus a sampled record of
//! evaluation decisions.
//!
//! ## Hash chain
//!
//! Each [`AuditEntry`] stores the hash of its predecessor and its own hash,
//! computed as SHA-256 over the canonical JSON of the entry's content and the
//! predecessor hash. Editing, removing or reordering any entry breaks every
//! later link, which [`verify_entries`] reports.
//!
//! ## Atomicity
//!
//! The store appends the audit drafts of a commit with
//! [`AuditLog::record_all`] while holding the tenant's partition lock, so the
//! entries of one commit are contiguous and appear exactly when the commit's
//! writes do.

pub mod entry;
pub mod log;
pub mod sampler;

pub use entry::{AuditAction, AuditDraft, AuditEntry, GENESIS_HASH};
pub use log::{verify_entries, AuditLog, AuditQuery, ChainVerification};
pub use sampler::{DecisionSampler, SamplingConfig};
