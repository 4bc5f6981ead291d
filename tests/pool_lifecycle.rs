//! End, restart and initialization behaviour of the pool.

use std::time::Duration;

use lazy_pool::{MemoryFactory, PoolConfiguration, PoolError, Resource, ResourcePool};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[tokio::test]
async fn end_twice_fails_the_second_time() {
    init_tracing();
    let pool = ResourcePool::new(MemoryFactory::new(), PoolConfiguration::new().with_size(3)).unwrap();

    pool.end().await.unwrap();
    let err = pool.end().await.unwrap_err();
    assert!(matches!(err, PoolError::AlreadyEnded));
    assert_eq!(err.to_string(), "Pool connections have already been terminated");
}

#[tokio::test]
async fn end_terminates_idle_connections() {
    let factory = MemoryFactory::new();
    let pool = ResourcePool::new(factory.clone(), PoolConfiguration::new().with_size(3)).unwrap();
    pool.ready().await.unwrap();

    pool.end().await.unwrap();
    assert_eq!(factory.terminates(), 3);
    assert_eq!(pool.available(), 0);
    assert_eq!(pool.size(), 0);
    assert_eq!(pool.initialized(), 0);
    assert!(pool.is_ended());
}

#[tokio::test]
async fn end_skips_lazy_resources_never_connected() {
    let factory = MemoryFactory::new();
    let pool = ResourcePool::new(factory.clone(), PoolConfiguration::new().with_size(3).lazy()).unwrap();
    pool.connect().await.unwrap().release();

    pool.end().await.unwrap();
    assert_eq!(factory.connects(), 1);
    assert_eq!(factory.terminates(), 1);
}

#[tokio::test]
async fn connect_after_end_reinitializes() {
    let factory = MemoryFactory::new();
    let pool = ResourcePool::new(factory.clone(), PoolConfiguration::new().with_size(3)).unwrap();
    pool.ready().await.unwrap();
    let initial = pool.available();

    pool.end().await.unwrap();
    let conn = pool.connect().await.unwrap();
    assert!(conn.is_ready());
    conn.release();

    assert_eq!(pool.size(), 3);
    assert_eq!(pool.available(), initial);
    assert_eq!(factory.created(), 6);

    // the restarted pool can be ended again
    pool.end().await.unwrap();
}

#[tokio::test]
async fn held_resource_survives_end_and_is_terminated_on_release() {
    init_tracing();
    let factory = MemoryFactory::new();
    let pool = ResourcePool::new(factory.clone(), PoolConfiguration::new().with_size(3)).unwrap();

    let mut held = pool.connect().await.unwrap();
    pool.end().await.unwrap();
    assert_eq!(factory.terminates(), 2);

    assert!(held.query("SELECT 1").is_ok());

    // a new epoch must not absorb the stale resource
    let restarted = pool.connect().await.unwrap();
    restarted.release();

    held.release();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(factory.terminates(), 3);
    assert_eq!(pool.available(), 3);
    assert_eq!(pool.get_metrics().stale_releases, 1);
}

#[tokio::test]
async fn end_wakes_parked_callers() {
    let pool = ResourcePool::new(MemoryFactory::new(), PoolConfiguration::new().with_size(1)).unwrap();
    let _held = pool.connect().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.connect().await.map(|conn| conn.id()) })
    };
    tokio::task::yield_now().await;

    pool.end().await.unwrap();
    assert!(matches!(waiter.await.unwrap(), Err(PoolError::Closed)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_connects_share_one_initialization() {
    let factory = MemoryFactory::with_connect_delay(Duration::from_millis(30));
    let pool = ResourcePool::new(factory.clone(), PoolConfiguration::new().with_size(3)).unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            pool.connect().await.unwrap().release();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(factory.created(), 3);
    assert_eq!(factory.connects(), 3);
    assert_eq!(pool.get_metrics().epochs, 1);
}

#[tokio::test]
async fn failed_eager_initialization_cleans_up_and_recovers() {
    init_tracing();
    let factory = MemoryFactory::new();
    let pool = ResourcePool::new(factory.clone(), PoolConfiguration::new().with_size(3)).unwrap();

    factory.fail_next_connects(1);
    assert!(matches!(pool.ready().await, Err(PoolError::Connect(_))));
    assert_eq!(factory.connects(), 2);
    assert_eq!(factory.terminates(), 2);
    assert_eq!(pool.size(), 0);

    let conn = pool.connect().await.unwrap();
    assert!(conn.is_ready());
    assert_eq!(pool.size(), 3);
    assert_eq!(factory.created(), 6);
}

#[tokio::test]
async fn end_on_failed_initialization_keeps_pool_active() {
    let factory = MemoryFactory::new();
    let pool = ResourcePool::new(factory.clone(), PoolConfiguration::new().with_size(2)).unwrap();

    factory.fail_next_connects(2);
    assert!(matches!(pool.end().await, Err(PoolError::Connect(_))));
    assert!(!pool.is_ended());

    // the second attempt initializes again and actually ends the pool
    pool.end().await.unwrap();
    assert!(pool.is_ended());
    assert_eq!(factory.terminates(), 2);
}

#[tokio::test]
async fn failed_termination_aborts_drain_and_keeps_resources() {
    init_tracing();
    let factory = MemoryFactory::new();
    let pool = ResourcePool::new(factory.clone(), PoolConfiguration::new().with_size(3)).unwrap();
    pool.ready().await.unwrap();

    factory.fail_next_terminates(1);
    assert!(matches!(pool.end().await, Err(PoolError::Terminate(_))));

    // nothing after the failure was touched and nothing was lost
    assert_eq!(factory.terminates(), 0);
    assert!(!pool.is_ended());
    assert_eq!(pool.size(), 3);
    assert_eq!(pool.available(), 3);
    assert_eq!(pool.initialized(), 3);

    pool.end().await.unwrap();
    assert_eq!(factory.terminates(), 3);
    assert!(pool.is_ended());
}

#[tokio::test]
async fn failed_end_leaves_held_and_idle_resources_usable() {
    let factory = MemoryFactory::new();
    let pool = ResourcePool::new(factory.clone(), PoolConfiguration::new().with_size(2)).unwrap();

    // the held connection keeps one slot out of the drain
    let held = pool.connect().await.unwrap();
    let held_id = held.id();
    pool.ready().await.unwrap();

    factory.fail_next_terminates(1);
    assert!(pool.end().await.is_err());
    held.release();

    // the idle one survived the failed attempt still connected, nothing reconnects
    assert_eq!(pool.initialized(), 2);
    let again = pool.connect().await.unwrap();
    assert_eq!(again.id(), held_id);
    assert_eq!(factory.connects(), 2);
}

#[tokio::test]
async fn acquire_timeout_does_not_cut_initialization_short() {
    let factory = MemoryFactory::with_connect_delay(Duration::from_millis(50));
    let config = PoolConfiguration::new()
        .with_size(2)
        .with_acquire_timeout(Duration::from_millis(20));
    let pool = ResourcePool::new(factory.clone(), config).unwrap();

    let (conn, ready) = tokio::join!(pool.connect(), pool.ready());
    assert!(conn.unwrap().is_ready());
    ready.unwrap();

    assert_eq!(factory.created(), 2);
    assert_eq!(factory.connects(), 2);
    assert_eq!(pool.get_metrics().epochs, 1);
}

#[tokio::test]
async fn dropped_connect_does_not_repeat_initialization() {
    let factory = MemoryFactory::with_connect_delay(Duration::from_millis(50));
    let pool = ResourcePool::new(factory.clone(), PoolConfiguration::new().with_size(2)).unwrap();

    let abandoned = tokio::time::timeout(Duration::from_millis(10), pool.connect()).await;
    assert!(abandoned.is_err());

    pool.ready().await.unwrap();
    assert_eq!(factory.created(), 2);
    assert_eq!(factory.connects(), 2);
    assert_eq!(pool.available(), 2);
}

#[tokio::test]
async fn metrics_follow_lifecycle() {
    let pool = ResourcePool::new(MemoryFactory::new(), PoolConfiguration::new().with_size(2)).unwrap();

    {
        let _a = pool.connect().await.unwrap();
        let metrics = pool.get_metrics();
        assert_eq!(metrics.in_use, 1);
        assert_eq!(metrics.available, 1);
        assert_eq!(metrics.size, 2);
    }

    pool.end().await.unwrap();
    let metrics = pool.get_metrics();
    assert_eq!(metrics.total_acquired, 1);
    assert_eq!(metrics.total_released, 1);
    assert_eq!(metrics.terminated, 2);
    assert_eq!(metrics.size, 0);
    assert!(!pool.get_health_status().is_healthy());
}
