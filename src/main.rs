// lazy_pool demo binary
// The library lives in lib.rs; run the demos with: cargo run --example basic

use lazy_pool::{MemoryFactory, PoolConfiguration, PoolResult, ResourcePool};

#[tokio::main]
async fn main() -> PoolResult<()> {
    println!("=== lazy_pool ===");
    println!("See demos/ directory for usage examples");
    println!("Run: cargo run --example basic");
    println!();

    println!("Quick Demo:");
    let factory = MemoryFactory::new();
    let pool = ResourcePool::new(factory.clone(), PoolConfiguration::new().with_size(3).lazy())?;

    {
        let mut conn = pool.connect().await?;
        match conn.query("SELECT 1") {
            Ok(row) => println!("  Got row: {}", row),
            Err(e) => println!("  Query failed: {}", e),
        }
    }

    println!("  Available after return: {}", pool.available());
    println!("  Connected so far: {}", pool.initialized());

    pool.end().await?;
    println!("  Terminated connections: {}", factory.terminates());

    Ok(())
}
