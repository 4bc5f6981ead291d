//! Error types for the resource pool

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Shared, cloneable handle to an error raised by a resource.
pub type ResourceErrorSource = Arc<dyn StdError + Send + Sync + 'static>;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Failed to connect resource: {0}")]
    Connect(#[source] ResourceErrorSource),

    #[error("Failed to terminate resource: {0}")]
    Terminate(#[source] ResourceErrorSource),

    #[error("Pool connections have already been terminated")]
    AlreadyEnded,

    #[error("Pool is already being ended")]
    Ending,

    #[error("Pool was ended while waiting for a resource")]
    Closed,

    #[error("Pool initialization task failed: {0}")]
    InitializationAborted(String),

    #[error("Pool is empty - no resources available")]
    PoolEmpty,

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid pool configuration: {0}")]
    InvalidConfiguration(String),
}

impl PoolError {
    pub(crate) fn connect<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        PoolError::Connect(Arc::new(error))
    }

    pub(crate) fn terminate<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        PoolError::Terminate(Arc::new(error))
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
