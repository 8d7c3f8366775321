//! Task binding tests.
//!
//! With `bind_to_task`, a task that borrows twice gets the same resource
//! both times and the pool counts a single borrow.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use nebula_pool::{Pool, PoolConfig, Resource, Result};

struct TestResource {
    created: AtomicU32,
}

impl Resource for TestResource {
    type Instance = u32;

    fn id(&self) -> &str {
        "bound"
    }

    async fn create(&self) -> Result<u32> {
        Ok(self.created.fetch_add(1, Ordering::SeqCst))
    }
}

fn bound_pool(size: usize) -> Pool<TestResource> {
    Pool::new(
        TestResource {
            created: AtomicU32::new(0),
        },
        PoolConfig::default()
            .with_size(size)
            .with_bind_to_task(true)
            .with_borrowing_timeout(Duration::from_secs(1)),
    )
    .unwrap()
}

#[tokio::test]
async fn same_task_gets_same_resource() {
    let pool = bound_pool(2);
    let handle = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let first = pool.borrow().await.unwrap();
            let second = pool.borrow().await.unwrap();
            assert_eq!(first.id(), second.id());
            assert_eq!(*first, *second);
            assert!(first.is_shared());

            let stats = pool.stats();
            assert_eq!(stats.metrics.borrowed_total, 1);
            assert_eq!(stats.leased, 1);
            assert_eq!(stats.bound_tasks, 1);

            pool.release(second).await.unwrap();
            // Still held by `first`.
            assert_eq!(pool.stats().leased, 1);
            pool.release(first).await.unwrap();
        })
    };
    handle.await.unwrap();

    let stats = pool.stats();
    assert_eq!(stats.leased, 0);
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.bound_tasks, 0);
    assert_eq!(stats.metrics.item_created_total, 1);
}

#[tokio::test]
async fn different_tasks_get_different_resources() {
    let pool = bound_pool(2);
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let holder = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let lease = pool.borrow().await.unwrap();
            let id = lease.id();
            rx.await.unwrap();
            pool.release(lease).await.unwrap();
            id
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    let other = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let lease = pool.borrow().await.unwrap();
            let id = lease.id();
            pool.release(lease).await.unwrap();
            id
        })
    }
    .await
    .unwrap();

    tx.send(()).unwrap();
    let held = holder.await.unwrap();
    assert_ne!(held, other);
    assert_eq!(pool.stats().metrics.borrowed_total, 2);
}

#[tokio::test]
async fn rebinding_after_full_release_borrows_again() {
    let pool = bound_pool(1);
    let pool_in_task = pool.clone();
    tokio::spawn(async move {
        let lease = pool_in_task.borrow().await.unwrap();
        pool_in_task.release(lease).await.unwrap();
        let lease = pool_in_task.borrow().await.unwrap();
        pool_in_task.release(lease).await.unwrap();
    })
    .await
    .unwrap();

    assert_eq!(pool.stats().metrics.borrowed_total, 2);
}

#[tokio::test]
async fn bound_leases_return_on_drop_once_all_are_gone() {
    let pool = bound_pool(1);
    let pool_in_task = pool.clone();
    tokio::spawn(async move {
        let first = pool_in_task.borrow().await.unwrap();
        let second = pool_in_task.borrow().await.unwrap();
        drop(first);
        drop(second);
    })
    .await
    .unwrap();

    let lease = pool
        .borrow_timeout(Duration::from_secs(1))
        .await
        .expect("entry should come back once every bound lease is dropped");
    assert_eq!(*lease, 0);
}
