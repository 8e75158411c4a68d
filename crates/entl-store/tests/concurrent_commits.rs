//! Concurrency behaviour of the store under real threads.

use std::sync::Arc;

use entl_audit::{AuditAction, AuditDraft};
use entl_core::{EntitlementError, PlanTier};
use entl_state::Tenant;
use entl_store::{transact, Commit, EntitlementStore, Partition};

fn create_tenant(store: &EntitlementStore, name: &str) -> Tenant {
    let tenant = Tenant::new(name, PlanTier::Basic, store.now());
    store
        .commit(Commit::new(Partition::Tenant(tenant.id)).create(tenant.clone()))
        .unwrap();
    tenant
}

#[test]
fn concurrent_read_modify_write_loses_no_update() {
    let store = Arc::new(EntitlementStore::default());
    let tenant = create_tenant(&store, "0");

    let threads: u32 = 8;
    let per_thread: u32 = 25;
    std::thread::scope(|scope| {
        for _ in 0..threads {
            let store = Arc::clone(&store);
            let id = tenant.id;
            scope.spawn(move || {
                for _ in 0..per_thread {
                    let outcome = transact(&store, 1_000, |s| {
                        let current = s.get_tenant(id).unwrap();
                        let mut next = current.value;
                        let n: u32 = next.name.parse().unwrap();
                        next.name = (n + 1).to_string();
                        Ok((
                            Commit::new(Partition::Tenant(id))
                                .put(next, Some(current.version))
                                .audit(AuditDraft::new(
                                    Some(id),
                                    AuditAction::TenantCreated,
                                    format!("tenant/{id}"),
                                    "test",
                                )),
                            (),
                        ))
                    });
                    assert!(outcome.is_ok(), "{outcome:?}");
                }
            });
        }
    });

    let final_tenant = store.get_tenant(tenant.id).unwrap();
    let total = threads * per_thread;
    assert_eq!(final_tenant.value.name, total.to_string());
    assert_eq!(final_tenant.version, u64::from(total) + 1);
    assert_eq!(store.sequence(Partition::Tenant(tenant.id)), u64::from(total) + 1);
    assert_eq!(store.audit_log().len(), total as usize);
    assert!(store.audit_log().verify_chain().chain_valid);
}

#[test]
fn exactly_one_blind_create_wins() {
    let store = Arc::new(EntitlementStore::default());
    let tenant = Tenant::new("acme", PlanTier::Basic, store.now());
    let results: Vec<Result<_, EntitlementError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let tenant = tenant.clone();
                scope.spawn(move || {
                    store.commit(Commit::new(Partition::Tenant(tenant.id)).create(tenant))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.code() == "CONCURRENT_MODIFICATION"));
}

#[test]
fn tenants_commit_independently() {
    let store = Arc::new(EntitlementStore::default());
    let tenants: Vec<Tenant> = (0..4).map(|i| create_tenant(&store, &format!("t{i}"))).collect();
    std::thread::scope(|scope| {
        for tenant in &tenants {
            let store = Arc::clone(&store);
            let id = tenant.id;
            scope.spawn(move || {
                for _ in 0..50 {
                    transact(&store, 5, |s| {
                        let current = s.get_tenant(id).unwrap();
                        Ok((
                            Commit::new(Partition::Tenant(id)).put(current.value, Some(current.version)),
                            (),
                        ))
                    })
                    .unwrap();
                }
            });
        }
    });
    for tenant in &tenants {
        assert_eq!(store.sequence(Partition::Tenant(tenant.id)), 51);
    }
}

mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Commits to one tenant never move another tenant's sequence.
        #[test]
        fn sequences_are_per_partition(writes in proptest::collection::vec(0usize..3, 0..40)) {
            let store = EntitlementStore::default();
            let tenants: Vec<Tenant> = (0..3).map(|i| create_tenant(&store, &format!("t{i}"))).collect();
            let mut expected = [1u64; 3];
            for idx in writes {
                let id = tenants[idx].id;
                let current = store.get_tenant(id).unwrap();
                store
                    .commit(Commit::new(Partition::Tenant(id)).put(current.value, Some(current.version)))
                    .unwrap();
                expected[idx] += 1;
            }
            for (tenant, want) in tenants.iter().zip(expected) {
                prop_assert_eq!(store.sequence(Partition::Tenant(tenant.id)), want);
            }
        }
    }
}
