//! Shared transition bookkeeping for every status enum in the crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use entl_core::{EntitlementError, EntitlementResult};

/// A lifecycle status with a fixed transition table.
pub trait Status: Copy + Eq + std::fmt::Debug + std::fmt::Display {
    /// Canonical lowercase name (matches the serde representation).
    fn name(&self) -> &'static str;

    /// Whether `self → to` is a legal move.
    fn can_transition_to(&self, to: Self) -> bool;

    /// Whether no further transitions are possible.
    fn is_terminal(&self) -> bool;
}

/// One entry in a record's transition log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord<S> {
    /// Status before the move.
    pub from: S,
    /// Status after the move.
    pub to: S,
    /// When the move was committed.
    pub at: DateTime<Utc>,
    /// Free-form reason, if the caller gave one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Check `from → to` against the table and build the log entry.
pub(crate) fn checked<S: Status>(
    from: S,
    to: S,
    at: DateTime<Utc>,
    reason: Option<String>,
) -> EntitlementResult<TransitionRecord<S>> {
    if from.is_terminal() {
        return Err(EntitlementError::InvalidTransition {
            from: from.name().to_string(),
            to: to.name().to_string(),
            reason: format!("{from} is terminal"),
        });
    }
    if !from.can_transition_to(to) {
        return Err(EntitlementError::InvalidTransition {
            from: from.name().to_string(),
            to: to.name().to_string(),
            reason: format!("{} may not move to {}", from.name(), to.name()),
        });
    }
    Ok(TransitionRecord {
        from,
        to,
        at,
        reason,
    })
}

/// Implements `Display` and `as_str` for a status enum via [`Status::name`].
macro_rules! status_display {
    ($ty:ty) => {
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(<$ty as $crate::transition::Status>::name(self))
            }
        }

        impl $ty {
            /// Canonical lowercase name.
            pub fn as_str(&self) -> &'static str {
                <$ty as $crate::transition::Status>::name(self)
            }
        }
    };
}

pub(crate) use status_display;
