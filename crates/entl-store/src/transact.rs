//! Optimistic read-compute-commit with bounded retries.

use entl_core::{EntitlementError, EntitlementResult};

use crate::commit::{Commit, CommitResult};
use crate::store::EntitlementStore;

/// Attempts made by [`transact`] when the caller has no configured budget.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Run `compute` against the current store state and commit what it
/// returns, retrying from a fresh read when the commit loses a version race.
///
/// `compute` must be free of side effects outside the returned commit; it
/// may run up to `attempts` times. Any error other than
/// `ConcurrentModification` is returned immediately. After `attempts`
/// conflicts the last conflict is returned with the attempt count.
pub fn transact<T>(
    store: &EntitlementStore,
    attempts: u32,
    mut compute: impl FnMut(&EntitlementStore) -> EntitlementResult<(Commit, T)>,
) -> EntitlementResult<(CommitResult, T)> {
    let attempts = attempts.max(1);
    let mut last_key = String::new();
    for attempt in 1..=attempts {
        let (commit, value) = compute(store)?;
        match store.commit(commit) {
            Ok(result) => return Ok((result, value)),
            Err(EntitlementError::ConcurrentModification { key, .. }) => {
                tracing::debug!(key = %key, attempt, "version conflict, retrying");
                last_key = key;
                std::thread::yield_now();
            }
            Err(other) => return Err(other),
        }
    }
    tracing::warn!(key = %last_key, attempts, "giving up after repeated version conflicts");
    Err(EntitlementError::ConcurrentModification {
        key: last_key,
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Partition;
    use entl_core::PlanTier;
    use entl_state::Tenant;
    use std::cell::Cell;

    #[test]
    fn retries_until_success() {
        let store = EntitlementStore::default();
        let tenant = Tenant::new("acme", PlanTier::Basic, store.now());
        store
            .commit(Commit::new(Partition::Tenant(tenant.id)).create(tenant.clone()))
            .unwrap();

        let calls = Cell::new(0);
        let (result, plan) = transact(&store, 5, |s| {
            calls.set(calls.get() + 1);
            let current = s.get_tenant(tenant.id).unwrap();
            // Lose the race on the first attempt.
            let expected = if calls.get() == 1 { current.version + 10 } else { current.version };
            let mut updated = current.value;
            updated.plan = PlanTier::Premium;
            Ok((
                Commit::new(Partition::Tenant(tenant.id)).put(updated, Some(expected)),
                PlanTier::Premium,
            ))
        })
        .unwrap();
        assert_eq!(calls.get(), 2);
        assert_eq!(plan, PlanTier::Premium);
        assert_eq!(result.sequence, 2);
    }

    #[test]
    fn gives_up_after_budget() {
        let store = EntitlementStore::default();
        let tenant = Tenant::new("acme", PlanTier::Basic, store.now());
        let calls = Cell::new(0u32);
        let err = transact(&store, 3, |_| {
            calls.set(calls.get() + 1);
            Ok((
                Commit::new(Partition::Tenant(tenant.id)).put(tenant.clone(), Some(99)),
                (),
            ))
        })
        .unwrap_err();
        assert_eq!(calls.get(), 3);
        assert!(matches!(
            err,
            EntitlementError::ConcurrentModification { attempts: 3, .. }
        ));
    }

    #[test]
    fn other_errors_are_not_retried() {
        let store = EntitlementStore::default();
        let calls = Cell::new(0u32);
        let err = transact::<()>(&store, 5, |_| {
            calls.set(calls.get() + 1);
            Err(EntitlementError::not_found("tenant", "x"))
        })
        .unwrap_err();
        assert_eq!(calls.get(), 1);
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
