//! # lazy_pool
//!
//! Lazy-initializing async pool for a fixed set of exclusive, reusable
//! resources such as database connections.
//!
//! ## Features
//!
//! - Lazy pools connect each resource on first use, eager pools connect all
//!   of them before reporting ready
//! - Waiters are served in arrival order; idle resources are reused most
//!   recently released first
//! - RAII release: dropping a [`Pooled`] guard returns the resource
//! - Restartable lifecycle: `end` drains the pool, the next `connect`
//!   starts a new epoch
//! - Health reporting and Prometheus metrics export
//! - `testing` feature (on by default): [`MemoryFactory`], an in-memory
//!   resource for tests, demos and benchmarks
//!
//! ## Quick Start
//!
//! ```rust
//! use lazy_pool::{MemoryFactory, PoolConfiguration, ResourcePool};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), lazy_pool::PoolError> {
//! let pool = ResourcePool::new(MemoryFactory::new(), PoolConfiguration::new().with_size(4).lazy())?;
//! {
//!     let mut conn = pool.connect().await?;
//!     println!("{}", conn.query("SELECT 1").unwrap());
//!     // Returned to the pool when `conn` goes out of scope
//! }
//! assert_eq!(pool.available(), 4);
//! pool.end().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod errors;
mod health;
#[cfg(any(test, feature = "testing"))]
mod memory;
mod metrics;
mod pool;
mod resource;
mod stack;

pub use config::PoolConfiguration;
pub use errors::{PoolError, PoolResult, ResourceErrorSource};
pub use health::HealthStatus;
#[cfg(any(test, feature = "testing"))]
pub use memory::{MemoryConnection, MemoryError, MemoryFactory};
pub use metrics::{MetricsExporter, PoolMetrics};
pub use pool::ResourcePool;
pub use resource::{Resource, ResourceFactory};
pub use stack::{DeferredStack, Pooled};
