//! Store commits reach application caches through the bus.

use std::sync::Arc;
use std::time::Duration;

use entl_bus::{spawn_follower, PropagationBus, TenantCache};
use entl_core::{FeatureName, PlanTier, TenantId};
use entl_eval::{FeatureCatalog, FeatureFlag, RolloutPercentage, TenantSnapshot};
use entl_state::Tenant;
use entl_store::{Commit, EntitlementStore, Partition, RecordKey};

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

fn setup() -> (Arc<EntitlementStore>, Arc<PropagationBus>) {
    let store = Arc::new(EntitlementStore::default());
    let bus = Arc::new(PropagationBus::default());
    store.register_observer(bus.clone());
    (store, bus)
}

fn create_tenant(store: &EntitlementStore) -> TenantId {
    let tenant = Tenant::new("acme", PlanTier::Basic, store.now());
    let id = tenant.id;
    store
        .commit(Commit::new(Partition::Tenant(id)).create(tenant))
        .unwrap();
    id
}

fn reports() -> FeatureName {
    FeatureName::new("reports").unwrap()
}

#[tokio::test]
async fn follower_picks_up_prior_and_later_commits() {
    let (store, bus) = setup();
    let tenant = create_tenant(&store);

    let stream = bus.subscribe(tenant);
    let cache = Arc::new(TenantCache::new(TenantSnapshot::empty(
        tenant,
        FeatureCatalog::default(),
    )));
    let handle = spawn_follower(cache.clone(), stream, store.clone());

    eventually(|| cache.snapshot().tenant.is_some()).await;

    let flag = FeatureFlag::new(reports(), RolloutPercentage::ALL).for_tenant(tenant);
    store
        .commit(Commit::new(Partition::Tenant(tenant)).create(flag))
        .unwrap();
    eventually(|| cache.snapshot().flag(&reports()).is_some()).await;
    assert_eq!(cache.sequence(), store.sequence(Partition::Tenant(tenant)));

    let global = FeatureFlag::new(FeatureName::new("beta").unwrap(), RolloutPercentage::NONE);
    store
        .commit(Commit::new(Partition::Global).create(global))
        .unwrap();
    eventually(|| cache.snapshot().global_sequence == 1).await;

    store
        .commit(Commit::new(Partition::Tenant(tenant)).delete(
            RecordKey::Flag {
                tenant: Some(tenant),
                name: reports(),
            },
            1,
        ))
        .unwrap();
    eventually(|| cache.snapshot().flag(&reports()).is_none()).await;

    handle.abort();
}

#[tokio::test]
async fn lagging_follower_resynchronizes() {
    let store = Arc::new(EntitlementStore::default());
    let bus = Arc::new(PropagationBus::new(1));
    store.register_observer(bus.clone());
    let tenant = create_tenant(&store);

    let stream = bus.subscribe(tenant);
    let cache = Arc::new(TenantCache::new(TenantSnapshot::empty(
        tenant,
        FeatureCatalog::default(),
    )));

    for i in 0..20 {
        let flag = FeatureFlag::new(FeatureName::new(format!("f{i}")).unwrap(), RolloutPercentage::ALL)
            .for_tenant(tenant);
        store
            .commit(Commit::new(Partition::Tenant(tenant)).create(flag))
            .unwrap();
    }

    let _handle = spawn_follower(cache.clone(), stream, store.clone());
    eventually(|| cache.sequence() == 21).await;
    assert_eq!(cache.snapshot().tenant_flags.len(), 20);
}

#[tokio::test]
async fn tenants_see_only_their_own_changes() {
    let (store, bus) = setup();
    let a = create_tenant(&store);
    let b = create_tenant(&store);

    let cache_b = Arc::new(TenantCache::new(TenantSnapshot::empty(b, FeatureCatalog::default())));
    let _handle = spawn_follower(cache_b.clone(), bus.subscribe(b), store.clone());
    eventually(|| cache_b.sequence() == 1).await;

    let flag = FeatureFlag::new(reports(), RolloutPercentage::ALL).for_tenant(a);
    store
        .commit(Commit::new(Partition::Tenant(a)).create(flag))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(cache_b.snapshot().flag(&reports()).is_none());
    assert_eq!(cache_b.sequence(), 1);
}
