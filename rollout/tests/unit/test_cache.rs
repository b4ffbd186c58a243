//! Cache unit tests

use std::sync::Arc;

use rollout::config::source::StaticSource;
use rollout::config::store::ConfigStore;
use rollout::plan::{PlanCache, PlanKey, StepKind};

use crate::common::{config_store, definitions};

#[tokio::test]
async fn test_plan_cache_shares_plans() {
    let store = config_store().await;
    let cache = PlanCache::new(10);

    let pair = store.resolve("java21-linux", "dev-linux").unwrap();
    let first = cache.get_or_build(&pair);
    let second = cache.get_or_build(&pair);

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.len(), 1);
    assert!(cache.get(&PlanKey::for_pair(&pair)).is_some());
}

#[tokio::test]
async fn test_plan_cache_eviction() {
    let store = config_store().await;
    let cache = PlanCache::new(2);

    let a = store.resolve("java21-linux", "dev-linux").unwrap();
    let b = store.resolve("java21-linux", "prod-linux").unwrap();
    let c = store.resolve("java21-windows", "prod-windows").unwrap();
    cache.get_or_build(&a);
    cache.get_or_build(&b);
    cache.get_or_build(&c);

    // Cache should have evicted the oldest entry
    assert_eq!(cache.len(), 2);
    assert!(cache.get(&PlanKey::for_pair(&a)).is_none());
    assert!(cache.get(&PlanKey::for_pair(&c)).is_some());
}

#[tokio::test]
async fn test_plan_cache_rebuilds_after_refresh() {
    let store = ConfigStore::load(Arc::new(StaticSource::new(definitions())))
        .await
        .unwrap();
    let cache = PlanCache::new(10);

    let before = cache.get_or_build(&store.resolve("java21-linux", "dev-linux").unwrap());
    store.refresh().await.unwrap();
    let pair = store.resolve("java21-linux", "dev-linux").unwrap();
    assert_eq!(pair.generation, 2);

    let after = cache.get_or_build(&pair);
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(*before, *after);
}

#[tokio::test]
async fn test_plan_cache_clear() {
    let store = config_store().await;
    let cache = PlanCache::new(10);

    let plan = cache.get_or_build(&store.resolve("java17-aix", "dev-linux").unwrap());
    assert!(plan.contains(StepKind::CreateSymlink));
    assert!(!cache.is_empty());

    cache.clear();
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_every_valid_pair_follows_plan_order() {
    let store = config_store().await;
    let cache = PlanCache::new(32);

    let mut checked = 0;
    for installation in store.list_installations() {
        for profile in store.compatible_profiles(&installation.id).unwrap() {
            let plan = cache.get_or_build(&store.resolve(&installation.id, &profile.id).unwrap());

            let positions: Vec<usize> = plan
                .kinds()
                .iter()
                .map(|k| StepKind::ORDER.iter().position(|o| o == k).unwrap())
                .collect();
            assert!(positions.windows(2).all(|w| w[0] < w[1]));

            assert_eq!(plan.contains(StepKind::BackupExisting), profile.backup_enabled);
            assert_eq!(
                plan.contains(StepKind::CreateSymlink),
                profile.symlink_enabled && installation.os.supports_symlinks()
            );
            checked += 1;
        }
    }
    // java21-linux x2, java17-aix, java21-windows
    assert_eq!(checked, 4);
}
