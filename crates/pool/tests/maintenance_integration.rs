//! Maintenance tests: idle eviction, lifetime expiry, leak detection and
//! the interval scheduler driving a real pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use nebula_pool::{
    IntervalScheduler, Maintainable, Pool, PoolConfig, Resource, Result, Scheduler,
};

struct Numbers {
    created: AtomicU32,
    cleaned: Arc<AtomicU32>,
}

impl Numbers {
    fn new(cleaned: &Arc<AtomicU32>) -> Self {
        Self {
            created: AtomicU32::new(0),
            cleaned: Arc::clone(cleaned),
        }
    }
}

impl Resource for Numbers {
    type Instance = u32;

    fn id(&self) -> &str {
        "numbers"
    }

    async fn create(&self) -> Result<u32> {
        Ok(self.created.fetch_add(1, Ordering::SeqCst))
    }

    async fn cleanup(&self, _instance: u32) -> Result<()> {
        self.cleaned.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn pool(config: PoolConfig) -> (Pool<Numbers>, Arc<AtomicU32>) {
    let cleaned = Arc::new(AtomicU32::new(0));
    let pool = Pool::new(Numbers::new(&cleaned), config).unwrap();
    (pool, cleaned)
}

#[tokio::test]
async fn evict_idle_only_touches_entries_idle_long_enough() {
    let (pool, cleaned) = pool(PoolConfig::default().with_size(4));
    pool.increase_items().await.unwrap();
    pool.increase_items().await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    pool.increase_items().await.unwrap();

    let evicted = pool.evict_idle(Duration::from_millis(20)).await;
    assert_eq!(evicted, 2);
    assert_eq!(cleaned.load(Ordering::SeqCst), 2);

    let stats = pool.stats();
    assert_eq!(stats.live, 1);
    assert_eq!(stats.idle, 1);
}

#[tokio::test]
async fn evict_idle_ignores_leased_entries() {
    let (pool, _) = pool(PoolConfig::default().with_size(2));
    let lease = pool.borrow().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(pool.evict_idle(Duration::from_millis(10)).await, 0);
    pool.release(lease).await.unwrap();
    assert_eq!(pool.stats().idle, 1);
}

#[tokio::test]
async fn evict_expired_removes_old_entries() {
    let (pool, cleaned) = pool(PoolConfig::default().with_size(2));
    pool.increase_items().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(pool.evict_expired(Duration::from_millis(10)).await, 1);
    assert_eq!(cleaned.load(Ordering::SeqCst), 1);
    assert_eq!(pool.stats().live, 0);
}

#[tokio::test]
async fn detect_leaks_reports_long_held_leases() {
    let (pool, _) = pool(PoolConfig::default().with_size(2));
    let slow = pool.borrow().await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    let fresh = pool.borrow().await.unwrap();

    let leaks = pool.detect_leaks(Duration::from_millis(20));
    assert_eq!(leaks.len(), 1);
    assert_eq!(leaks[0].entry, slow.id());
    assert!(leaks[0].held >= Duration::from_millis(20));

    pool.release(slow).await.unwrap();
    pool.release(fresh).await.unwrap();
    assert!(pool.detect_leaks(Duration::ZERO).is_empty());
}

#[tokio::test]
async fn maintain_applies_configured_checks() {
    let config = PoolConfig::default()
        .with_size(3)
        .with_idle_timeout(Some(Duration::from_millis(20)))
        .with_max_lifetime(None)
        .with_leak_detection_threshold(Some(Duration::from_millis(20)));
    let (pool, _) = pool(config);

    let held = pool.borrow().await.unwrap();
    pool.increase_items().await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;

    let report = pool.maintain().await;
    assert_eq!(report.idle_evicted, 1);
    assert_eq!(report.expired, 0);
    assert_eq!(report.leaks.len(), 1);
    assert_eq!(report.leaks[0].entry, held.id());
    assert!(!report.is_clean());

    pool.release(held).await.unwrap();
}

#[tokio::test]
async fn maintain_with_everything_disabled_is_clean() {
    let config = PoolConfig::default()
        .with_size(2)
        .with_idle_timeout(None)
        .with_max_lifetime(None);
    let (pool, _) = pool(config);
    pool.warmup().await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(pool.maintain().await.is_clean());
    assert_eq!(pool.stats().live, 1);
}

#[tokio::test]
async fn scheduler_evicts_idle_entries_in_the_background() {
    let config = PoolConfig::default()
        .with_size(4)
        .with_idle_timeout(Some(Duration::from_millis(20)))
        .with_maintenance_interval(Duration::from_millis(10));
    let (pool, cleaned) = pool(config);
    assert_eq!(pool.warmup().await, 2);

    let mut scheduler = IntervalScheduler::new();
    scheduler.bind_to(Arc::new(pool.clone()) as Arc<dyn Maintainable>);
    scheduler.start().unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;
    scheduler.stop().await;

    assert_eq!(pool.stats().live, 0);
    assert_eq!(cleaned.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn maintainable_grows_and_shrinks_through_trait_object() {
    let (pool, _) = pool(PoolConfig::default().with_size(2));
    let control: Arc<dyn Maintainable> = Arc::new(pool.clone());

    assert_eq!(control.name(), "numbers");
    assert!(control.increase_items().await.unwrap());
    assert_eq!(control.stats().idle, 1);
    assert!(control.decrease_items().await);
    assert_eq!(pool.stats().live, 0);
}
