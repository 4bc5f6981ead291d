//! Basic usage examples for ResourcePool

use lazy_pool::{MemoryFactory, PoolConfiguration, ResourcePool};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    println!("=== lazy_pool - Basic Examples ===\n");

    // Example 1: Eager pool
    eager_pool().await;

    // Example 2: Lazy pool
    lazy_pool().await;

    // Example 3: Try methods
    try_methods().await;

    // Example 4: Metrics and health
    metrics_and_health().await;
}

async fn eager_pool() {
    println!("1. Eager Pool:");
    let pool = ResourcePool::new(MemoryFactory::new(), PoolConfiguration::new().with_size(3)).unwrap();

    pool.ready().await.unwrap();
    println!("   Connected before first use: {}", pool.initialized());

    {
        let mut conn = pool.connect().await.unwrap();
        println!("   Got row: {}", conn.query("SELECT 1").unwrap());
        // Connection automatically returned when dropped
    }

    println!("   Available after return: {}\n", pool.available());
}

async fn lazy_pool() {
    println!("2. Lazy Pool:");
    let pool = ResourcePool::new(MemoryFactory::new(), PoolConfiguration::new().with_size(3).lazy()).unwrap();

    pool.ready().await.unwrap();
    println!("   Connected before first use: {}", pool.initialized());

    let first = pool.connect().await.unwrap();
    let second = pool.connect().await.unwrap();
    println!("   Connected while two are held: {}", pool.initialized());
    drop((first, second));

    // The warm connection is reused, nothing new is opened
    pool.connect().await.unwrap().release();
    println!("   Connected after reuse: {}\n", pool.initialized());
}

async fn try_methods() {
    println!("3. Try Methods:");
    let pool = ResourcePool::new(MemoryFactory::new(), PoolConfiguration::new().with_size(1)).unwrap();

    let conn1 = pool.try_connect().await;
    assert!(conn1.is_ok());
    println!("   First try: Success");

    let conn2 = pool.try_connect().await;
    assert!(conn2.is_err());
    println!("   Second try: {}", conn2.unwrap_err());

    drop(conn1);

    let conn3 = pool.try_connect().await;
    assert!(conn3.is_ok());
    println!("   Third try: Success\n");
}

async fn metrics_and_health() {
    println!("4. Metrics and Health:");
    let pool = ResourcePool::new(MemoryFactory::new(), PoolConfiguration::new().with_size(5)).unwrap();

    {
        let _conn1 = pool.connect().await.unwrap();
        let _conn2 = pool.connect().await.unwrap();

        let health = pool.get_health_status();
        println!("   Health: {}", if health.is_healthy { "Healthy" } else { "Unhealthy" });
        println!("   Utilization: {:.1}%", health.utilization * 100.0);
        println!("   In use: {}, Available: {}", health.in_use, health.available);
    }

    let metrics = pool.export_metrics();
    println!("\n   Metrics:");
    for (key, value) in metrics {
        println!("     {}: {}", key, value);
    }
}
