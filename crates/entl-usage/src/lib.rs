//! # entl-usage: Usage & Compliance Reporter
//!
//! Metered counters live in a [`UsageLedger`]. [`UsageReporter::report`]
//! compares them (plus license activations) against the tenant's license
//! limits, hands a [`UsageSnapshot`] per limit to the [`BillingSink`], and
//! returns the [`ComplianceSignal`]s the lifecycle manager should apply.
//!
//! Limit signals are edge-triggered: `LimitExceeded` fires when a limit
//! goes over its maximum, `LimitCleared` when it comes back, and nothing
//! while it stays on one side. The starting side of a limit is the
//! license's persisted `exceeded_limits` set, so a restart does not
//! replay signals.

pub mod ledger;
pub mod reporter;

pub use ledger::UsageLedger;
pub use reporter::{
    BillingSink, ComplianceSignal, MemoryBillingSink, TracingBillingSink, UsageConfig,
    UsageReport, UsageReporter, UsageSnapshot,
};
