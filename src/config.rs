//! Pool configuration options

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for resource pool behavior
///
/// The connection parameters of the resources themselves live in the
/// [`ResourceFactory`](crate::ResourceFactory); this only shapes the pool.
///
/// # Examples
///
/// ```
/// use lazy_pool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_size(4)
///     .lazy()
///     .with_acquire_timeout(Duration::from_secs(5));
///
/// assert_eq!(config.size, 4);
/// assert!(config.lazy);
/// assert_eq!(config.acquire_timeout, Some(Duration::from_secs(5)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolConfiguration {
    /// Number of resources in every epoch of the pool
    pub size: usize,

    /// Connect resources on first acquisition instead of during initialization
    pub lazy: bool,

    /// Deadline applied by `ResourcePool::connect` while waiting for a resource
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            size: 10,
            lazy: false,
            acquire_timeout: None,
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of resources
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Defer connecting each resource until it is first acquired
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    /// Connect every resource before the pool reports ready
    pub fn eager(mut self) -> Self {
        self.lazy = false;
        self
    }

    /// Bound how long `connect` may wait for a resource
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.size == 0 {
            return Err("pool size must be at least 1".to_string());
        }
        if self.acquire_timeout == Some(Duration::ZERO) {
            return Err("acquire timeout must be non-zero".to_string());
        }
        Ok(())
    }
}
