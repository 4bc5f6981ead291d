//! Traits implemented by pooled resources and the configuration that builds them

use std::error::Error as StdError;

use async_trait::async_trait;

/// A reusable, exclusively held unit of capacity, typically a network
/// connection.
///
/// The pool never inspects a resource beyond these three operations.
/// `connect` is only called while `is_ready` reports `false`, and
/// `terminate` only while it reports `true`.
#[async_trait]
pub trait Resource: Send + 'static {
    /// Error raised while connecting or terminating
    type Error: StdError + Send + Sync + 'static;

    /// Make the resource usable
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Whether the resource is already connected; must be cheap and side-effect free
    fn is_ready(&self) -> bool;

    /// Close the underlying connection
    async fn terminate(&mut self) -> Result<(), Self::Error>;
}

/// Builds the resources of each pool epoch from an immutable configuration.
///
/// # Examples
///
/// ```
/// use lazy_pool::{MemoryFactory, Resource, ResourceFactory};
///
/// let factory = MemoryFactory::new();
/// let connection = factory.create();
/// assert!(!connection.is_ready());
/// assert_eq!(factory.created(), 1);
/// ```
pub trait ResourceFactory: Send + Sync + 'static {
    type Resource: Resource;

    /// Construct one unconnected resource
    fn create(&self) -> Self::Resource;
}
