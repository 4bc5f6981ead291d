//! Advanced features: custom resources, the raw stack, stale releases, Prometheus

use async_trait::async_trait;
use lazy_pool::{
    DeferredStack, MemoryFactory, PoolConfiguration, Resource, ResourceFactory, ResourcePool,
};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
struct ConnectionParams {
    host: String,
    port: u16,
}

#[derive(Error, Debug)]
#[error("handshake failed: {0}")]
struct HandshakeError(String);

#[derive(Debug)]
struct Session {
    params: ConnectionParams,
    open: bool,
}

#[async_trait]
impl Resource for Session {
    type Error = HandshakeError;

    async fn connect(&mut self) -> Result<(), HandshakeError> {
        if self.params.port == 0 {
            return Err(HandshakeError(format!("{} has no port", self.params.host)));
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.open = true;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.open
    }

    async fn terminate(&mut self) -> Result<(), HandshakeError> {
        self.open = false;
        Ok(())
    }
}

impl ResourceFactory for ConnectionParams {
    type Resource = Session;

    fn create(&self) -> Session {
        Session {
            params: self.clone(),
            open: false,
        }
    }
}

#[tokio::main]
async fn main() {
    println!("=== lazy_pool - Advanced Features ===\n");

    // Example 1: Custom resource
    custom_resource().await;

    // Example 2: Failing handshakes
    failing_handshake().await;

    // Example 3: Raw deferred stack
    raw_stack().await;

    // Example 4: Release after end
    stale_release().await;

    // Example 5: Prometheus metrics
    prometheus_export().await;
}

async fn custom_resource() {
    println!("1. Custom Resource:");
    let params = ConnectionParams {
        host: "db.internal".to_string(),
        port: 5432,
    };
    let pool = ResourcePool::new(params, PoolConfiguration::new().with_size(4).lazy()).unwrap();

    {
        let session = pool.connect().await.unwrap();
        println!("   Connected to {}:{}", session.params.host, session.params.port);
    }
    println!("   Sessions opened: {} of {}\n", pool.initialized(), pool.size());
}

async fn failing_handshake() {
    println!("2. Failing Handshake:");
    let params = ConnectionParams {
        host: "nowhere".to_string(),
        port: 0,
    };
    let pool = ResourcePool::new(params, PoolConfiguration::new().with_size(2).lazy()).unwrap();

    match pool.connect().await {
        Ok(_) => println!("   Unexpected success"),
        Err(e) => println!("   Error: {}", e),
    }
    println!("   Capacity kept: available {} of {}\n", pool.available(), pool.size());
}

async fn raw_stack() {
    println!("3. Raw Deferred Stack:");
    let factory = MemoryFactory::new();
    let stack = DeferredStack::new((0..2).map(|_| factory.create()).collect());

    let a = stack.acquire().await.unwrap();
    let b = stack.acquire().await.unwrap();
    println!("   Took {} then {}", a.id(), b.id());

    a.release();
    b.release();
    let next = stack.acquire().await.unwrap();
    println!("   Most recently released comes back first: {}", next.id());

    let detached = next.detach();
    println!("   Detached {}, available {}", detached.id(), stack.available());
    stack.push(detached);
    println!("   Pushed back, available {}\n", stack.available());
}

async fn stale_release() {
    println!("4. Release After End:");
    let factory = MemoryFactory::new();
    let pool = ResourcePool::new(factory.clone(), PoolConfiguration::new().with_size(2)).unwrap();

    let held = pool.connect().await.unwrap();
    pool.end().await.unwrap();
    println!("   Terminated while one was held: {}", factory.terminates());

    held.release();
    tokio::time::sleep(Duration::from_millis(10)).await;
    println!("   Terminated after late release: {}", factory.terminates());
    println!("   Stale releases: {}\n", pool.get_metrics().stale_releases);
}

async fn prometheus_export() {
    println!("5. Prometheus Metrics:");
    let pool = ResourcePool::new(MemoryFactory::new(), PoolConfiguration::new().with_size(3)).unwrap();
    let _conn = pool.connect().await.unwrap();

    let mut tags = HashMap::new();
    tags.insert("service".to_string(), "api".to_string());

    print!("{}", pool.export_metrics_prometheus("primary", Some(&tags)));
}
