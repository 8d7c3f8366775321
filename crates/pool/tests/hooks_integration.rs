//! Hook integration tests: before-borrow and after-return hooks running
//! inside a real pool.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use nebula_pool::{
    AuditHook, Error, HookPhase, HookResult, HookTarget, KeepAliveChecker, KeepAliveHook, Pool,
    PoolConfig, PoolHook, Resource, Result,
};
use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

struct Numbers {
    created: AtomicU32,
}

impl Numbers {
    fn new() -> Self {
        Self {
            created: AtomicU32::new(0),
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
}

/// Rejects odd instances in the given phase and records every call.
struct RejectOdd {
    phase: HookPhase,
    seen: Arc<Mutex<Vec<(HookPhase, u32)>>>,
}

impl PoolHook<u32> for RejectOdd {
    fn name(&self) -> &str {
        "reject-odd"
    }

    fn phases(&self) -> Vec<HookPhase> {
        vec![self.phase]
    }

    fn run<'a>(
        &'a self,
        phase: HookPhase,
        target: &'a HookTarget<'a, u32>,
    ) -> Pin<Box<dyn Future<Output = HookResult> + Send + 'a>> {
        Box::pin(async move {
            self.seen.lock().push((phase, *target.instance));
            if target.instance % 2 == 1 {
                HookResult::Reject(format!("{} is odd", target.instance))
            } else {
                HookResult::Continue
            }
        })
    }
}

fn pool_with(hook: Arc<dyn PoolHook<u32>>, size: usize) -> Pool<Numbers> {
    Pool::builder(Numbers::new())
        .config(
            PoolConfig::default()
                .with_size(size)
                .with_borrowing_timeout(Duration::from_secs(1)),
        )
        .hook(hook)
        .hook(Arc::new(AuditHook))
        .build()
        .unwrap()
}

// ---------------------------------------------------------------------------
// Before borrow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn before_borrow_rejection_destroys_entry_and_fails_borrow() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let pool = pool_with(
        Arc::new(RejectOdd {
            phase: HookPhase::BeforeBorrow,
            seen: Arc::clone(&seen),
        }),
        2,
    );
    pool.increase_items().await.unwrap(); // 0
    pool.increase_items().await.unwrap(); // 1

    let first = pool.borrow().await.unwrap();
    assert_eq!(*first, 0);

    let err = pool.borrow().await.unwrap_err();
    assert!(
        matches!(
            err,
            Error::HookRejected {
                phase: HookPhase::BeforeBorrow,
                ref hook,
                ..
            } if hook == "reject-odd"
        ),
        "unexpected error: {err:?}"
    );

    let stats = pool.stats();
    assert_eq!(stats.live, 1);
    assert_eq!(stats.metrics.item_deleted_total, 1);
    assert_eq!(
        *seen.lock(),
        vec![(HookPhase::BeforeBorrow, 0), (HookPhase::BeforeBorrow, 1)]
    );
}

// ---------------------------------------------------------------------------
// After return
// ---------------------------------------------------------------------------

#[tokio::test]
async fn after_return_rejection_destroys_entry_and_fails_release() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let pool = pool_with(
        Arc::new(RejectOdd {
            phase: HookPhase::AfterReturn,
            seen: Arc::clone(&seen),
        }),
        2,
    );
    pool.increase_items().await.unwrap(); // 0
    pool.increase_items().await.unwrap(); // 1

    let even = pool.borrow().await.unwrap();
    let odd = pool.borrow().await.unwrap();
    assert_eq!((*even, *odd), (0, 1));

    pool.release(even).await.unwrap();
    let err = pool.release(odd).await.unwrap_err();
    assert!(matches!(
        err,
        Error::HookRejected {
            phase: HookPhase::AfterReturn,
            ..
        }
    ));

    let stats = pool.stats();
    assert_eq!(stats.live, 1);
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.leased, 0);
}

// ---------------------------------------------------------------------------
// Keep-alive
// ---------------------------------------------------------------------------

struct Liveness {
    alive: Arc<AtomicBool>,
    checks: Arc<AtomicU32>,
}

impl KeepAliveChecker<u32> for Liveness {
    async fn check(&self, _instance: &u32) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.alive.load(Ordering::SeqCst)
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(20)
    }
}

#[tokio::test]
async fn keep_alive_replaces_dead_idle_resource() {
    let alive = Arc::new(AtomicBool::new(true));
    let checks = Arc::new(AtomicU32::new(0));
    let pool = pool_with(
        Arc::new(KeepAliveHook::new(Liveness {
            alive: Arc::clone(&alive),
            checks: Arc::clone(&checks),
        })),
        1,
    );

    // Fresh entry: no probe.
    let lease = pool.borrow().await.unwrap();
    pool.release(lease).await.unwrap();
    assert_eq!(checks.load(Ordering::SeqCst), 0);

    // Idle past the interval and dead: probe rejects it.
    alive.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(40)).await;
    let err = pool.borrow().await.unwrap_err();
    assert!(matches!(err, Error::HookRejected { .. }));
    assert_eq!(checks.load(Ordering::SeqCst), 1);
    assert_eq!(pool.stats().live, 0);

    // A retry gets a fresh resource.
    alive.store(true, Ordering::SeqCst);
    let lease = pool.borrow().await.unwrap();
    assert_eq!(*lease, 1);
}
