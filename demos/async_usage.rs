//! Concurrent usage examples

use lazy_pool::{MemoryFactory, PoolConfiguration, ResourcePool};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("lazy_pool=debug")
        .init();

    println!("=== lazy_pool - Async Examples ===\n");

    // Example 1: Shared initialization
    shared_initialization().await;

    // Example 2: Fair waiters
    fair_waiters().await;

    // Example 3: Timeout
    with_timeout().await;

    // Example 4: End and restart
    end_and_restart().await;
}

async fn shared_initialization() {
    println!("1. Shared Initialization:");
    let factory = MemoryFactory::with_connect_delay(Duration::from_millis(50));
    let pool = ResourcePool::new(factory.clone(), PoolConfiguration::new().with_size(3)).unwrap();

    let mut handles = vec![];
    for _ in 0..3 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move { pool.connect().await.map(|conn| conn.id()) }));
    }

    for handle in handles {
        println!("   Got connection {:?}", handle.await.unwrap());
    }
    println!("   Connections created: {}\n", factory.created());
}

async fn fair_waiters() {
    println!("2. Fair Waiters:");
    let pool = ResourcePool::new(MemoryFactory::new(), PoolConfiguration::new().with_size(2)).unwrap();

    let mut handles = vec![];
    for i in 0..6 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            let conn = pool.connect().await.unwrap();
            println!("   Task {} got connection {}", i, conn.id());
            sleep(Duration::from_millis(20)).await;
        }));
        tokio::task::yield_now().await;
    }

    for handle in handles {
        handle.await.unwrap();
    }
    println!("   Final available: {}\n", pool.available());
}

async fn with_timeout() {
    println!("3. Timeout:");
    let pool = ResourcePool::new(MemoryFactory::new(), PoolConfiguration::new().with_size(1)).unwrap();

    let _held = pool.connect().await.unwrap();
    match pool.connect_timeout(Duration::from_millis(100)).await {
        Ok(_) => println!("   Got connection"),
        Err(e) => println!("   Error: {}", e),
    }
    println!();
}

async fn end_and_restart() {
    println!("4. End and Restart:");
    let factory = MemoryFactory::new();
    let pool = ResourcePool::new(factory.clone(), PoolConfiguration::new().with_size(2)).unwrap();

    pool.ready().await.unwrap();
    pool.end().await.unwrap();
    println!("   Ended, available: {}, terminated: {}", pool.available(), factory.terminates());

    if let Err(e) = pool.end().await {
        println!("   Second end: {}", e);
    }

    pool.connect().await.unwrap().release();
    println!("   Restarted, available: {}", pool.available());
}
