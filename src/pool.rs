//! Restartable resource pool built on the deferred access stack

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::PoolConfiguration;
use crate::errors::{PoolError, PoolResult};
use crate::health::HealthStatus;
use crate::metrics::{MetricsExporter, MetricsTracker, Occupancy, PoolMetrics};
use crate::resource::{Resource, ResourceFactory};
use crate::stack::{DeferredStack, Pooled};

type InitFuture<R> = Shared<BoxFuture<'static, PoolResult<DeferredStack<R>>>>;

/// One start-to-end lifetime of the resource set.
///
/// Initialization runs on a spawned task that every caller of the epoch
/// awaits, so a caller giving up never abandons or repeats it. A failed
/// attempt is replaced by a fresh one on the next call.
struct Epoch<R: Resource> {
    init: Mutex<Option<InitFuture<R>>>,
}

impl<R: Resource> Epoch<R> {
    fn new() -> Self {
        Self {
            init: Mutex::new(None),
        }
    }

    /// The stack, once initialization has succeeded
    fn stack(&self) -> Option<DeferredStack<R>> {
        let init = self.init.lock();
        let stack = init.as_ref()?.peek()?.as_ref().ok().cloned();
        stack
    }
}

enum Lifecycle<R: Resource> {
    Active(Arc<Epoch<R>>),
    /// `end` is draining this epoch; it keeps serving callers until closed
    Ending(Arc<Epoch<R>>),
    Ended,
}

impl<R: Resource> Lifecycle<R> {
    fn epoch(&self) -> Option<&Arc<Epoch<R>>> {
        match self {
            Lifecycle::Active(epoch) | Lifecycle::Ending(epoch) => Some(epoch),
            Lifecycle::Ended => None,
        }
    }
}

/// Held by `end` while it drains. Unless finished, dropping it puts the
/// epoch back into service.
struct EndingGuard<'a, R: Resource> {
    lifecycle: &'a Mutex<Lifecycle<R>>,
    epoch: Arc<Epoch<R>>,
    finished: bool,
}

impl<R: Resource> EndingGuard<'_, R> {
    /// Mark the pool ended and close the stack in one step
    fn finish(mut self, stack: &DeferredStack<R>) -> Vec<R> {
        self.finished = true;
        let mut lifecycle = self.lifecycle.lock();
        *lifecycle = Lifecycle::Ended;
        stack.close()
    }
}

impl<R: Resource> Drop for EndingGuard<'_, R> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut lifecycle = self.lifecycle.lock();
        if matches!(&*lifecycle, Lifecycle::Ending(epoch) if Arc::ptr_eq(epoch, &self.epoch)) {
            debug!("end did not complete, resource pool stays active");
            *lifecycle = Lifecycle::Active(Arc::clone(&self.epoch));
        }
    }
}

/// A fixed-size pool of exclusive resources with a restartable lifecycle.
///
/// The first of [`ready`](ResourcePool::ready), [`connect`](ResourcePool::connect)
/// or [`end`](ResourcePool::end) creates the resources; eager pools also
/// connect all of them at that point. Concurrent callers share that single
/// initialization. After `end` the next `connect` starts a new epoch with
/// fresh resources.
///
/// Clones share the same pool.
///
/// # Examples
///
/// ```
/// use lazy_pool::{MemoryFactory, PoolConfiguration, ResourcePool};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let pool = ResourcePool::new(MemoryFactory::new(), PoolConfiguration::new().with_size(3).lazy()).unwrap();
///
/// let mut conn = pool.connect().await.unwrap();
/// conn.query("SELECT 1").unwrap();
/// conn.release();
///
/// assert_eq!(pool.initialized(), 1);
/// pool.end().await.unwrap();
/// assert!(pool.end().await.is_err());
/// # }
/// ```
pub struct ResourcePool<F: ResourceFactory> {
    factory: Arc<F>,
    config: Arc<PoolConfiguration>,
    lifecycle: Arc<Mutex<Lifecycle<F::Resource>>>,
    metrics: Arc<MetricsTracker>,
}

impl<F: ResourceFactory> Clone for ResourcePool<F> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            config: Arc::clone(&self.config),
            lifecycle: Arc::clone(&self.lifecycle),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<F: ResourceFactory> fmt::Debug for ResourcePool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("config", &self.config)
            .field("ended", &self.is_ended())
            .field("available", &self.available())
            .field("size", &self.size())
            .finish()
    }
}

impl<F: ResourceFactory> ResourcePool<F> {
    /// Create a pool. No resource is created until it is first used.
    pub fn new(factory: F, config: PoolConfiguration) -> PoolResult<Self> {
        config.validate().map_err(PoolError::InvalidConfiguration)?;
        debug!(size = config.size, lazy = config.lazy, "creating resource pool");

        Ok(Self {
            factory: Arc::new(factory),
            config: Arc::new(config),
            lifecycle: Arc::new(Mutex::new(Lifecycle::Active(Arc::new(Epoch::new())))),
            metrics: Arc::new(MetricsTracker::new()),
        })
    }

    /// Get a resource, restarting the pool if it was ended.
    ///
    /// Waits for initialization, then for an idle resource. When
    /// `PoolConfiguration::acquire_timeout` is set it bounds the second
    /// wait only; initialization always runs to completion.
    ///
    /// # Errors
    ///
    /// A resource that fails to connect on demand yields
    /// [`PoolError::Connect`]. That resource is not discarded: it goes back
    /// to the pool unconnected and the next caller retries it.
    pub async fn connect(&self) -> PoolResult<Pooled<F::Resource>> {
        let stack = self.ready_stack().await?;
        match self.config.acquire_timeout {
            Some(timeout) => acquire_within(&stack, timeout).await,
            None => stack.acquire().await,
        }
    }

    /// Get a resource, giving up if none is handed over within `timeout`
    /// once the pool is initialized
    pub async fn connect_timeout(&self, timeout: Duration) -> PoolResult<Pooled<F::Resource>> {
        let stack = self.ready_stack().await?;
        acquire_within(&stack, timeout).await
    }

    /// Get an idle resource without waiting for a release
    pub async fn try_connect(&self) -> PoolResult<Pooled<F::Resource>> {
        let stack = self.ready_stack().await?;
        stack.try_acquire().await
    }

    /// Wait until the current epoch is initialized.
    ///
    /// Starts initialization if nobody has yet. Returns immediately on an
    /// ended pool without restarting it.
    pub async fn ready(&self) -> PoolResult<()> {
        let epoch = self.lifecycle.lock().epoch().cloned();
        if let Some(epoch) = epoch {
            self.initialize_epoch(&epoch).await?;
        }
        Ok(())
    }

    /// Terminate every idle resource and mark the pool ended.
    ///
    /// Resources still held by callers are not reclaimed; when they are
    /// released later they are terminated instead of reused. Parked
    /// acquisitions fail with [`PoolError::Closed`].
    ///
    /// The pool only counts as ended once the drain succeeded. If
    /// initialization fails, or a termination fails (which aborts the rest
    /// of the drain), the error is returned and the pool stays active with
    /// every resource still in it, so `end` can be called again. While one
    /// `end` is in progress another fails with [`PoolError::Ending`].
    pub async fn end(&self) -> PoolResult<()> {
        let guard = {
            let mut lifecycle = self.lifecycle.lock();
            let epoch = match &*lifecycle {
                Lifecycle::Active(epoch) => Arc::clone(epoch),
                Lifecycle::Ending(_) => return Err(PoolError::Ending),
                Lifecycle::Ended => return Err(PoolError::AlreadyEnded),
            };
            *lifecycle = Lifecycle::Ending(Arc::clone(&epoch));
            EndingGuard {
                lifecycle: &self.lifecycle,
                epoch,
                finished: false,
            }
        };

        let stack = self.initialize_epoch(&guard.epoch).await?;
        let terminated = self.drain(&stack).await?;
        let in_use = stack.in_use().saturating_sub(terminated.len());

        let leftover = guard.finish(&stack);
        for pooled in terminated {
            drop(pooled.detach());
        }
        debug!(in_use, "resource pool ended");

        // released between the drain and the close
        for mut resource in leftover.into_iter().filter(|resource| resource.is_ready()) {
            match resource.terminate().await {
                Ok(()) => MetricsTracker::incr(&self.metrics.terminated),
                Err(error) => warn!(%error, "failed to terminate resource released during end"),
            }
        }

        Ok(())
    }

    /// Resources reporting ready, or 0 without a live epoch
    pub fn initialized(&self) -> usize {
        self.live_stack().map_or(0, |stack| stack.initialized())
    }

    /// Idle resources, or 0 without a live epoch
    pub fn available(&self) -> usize {
        self.live_stack().map_or(0, |stack| stack.available())
    }

    /// Capacity of the live epoch, or 0 without one
    pub fn size(&self) -> usize {
        self.live_stack().map_or(0, |stack| stack.size())
    }

    /// Resources currently held by callers
    pub fn in_use(&self) -> usize {
        self.live_stack().map_or(0, |stack| stack.in_use())
    }

    pub fn configured_size(&self) -> usize {
        self.config.size
    }

    pub fn is_lazy(&self) -> bool {
        self.config.lazy
    }

    pub fn is_ended(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Ended)
    }

    /// Get health status
    pub fn get_health_status(&self) -> HealthStatus {
        let occupancy = self.occupancy();
        HealthStatus::new(occupancy.available, occupancy.in_use, occupancy.size, self.is_ended())
    }

    /// Get pool metrics
    pub fn get_metrics(&self) -> PoolMetrics {
        self.metrics.get_metrics(self.occupancy())
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus format
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        MetricsExporter::export_prometheus(&self.get_metrics(), pool_name, tags)
    }

    /// The current epoch's stack, starting a new epoch if the pool was ended
    async fn ready_stack(&self) -> PoolResult<DeferredStack<F::Resource>> {
        let epoch = {
            let mut lifecycle = self.lifecycle.lock();
            let current = lifecycle.epoch().cloned();
            match current {
                Some(epoch) => epoch,
                None => {
                    debug!("restarting ended resource pool");
                    let epoch = Arc::new(Epoch::new());
                    *lifecycle = Lifecycle::Active(Arc::clone(&epoch));
                    epoch
                }
            }
        };

        self.initialize_epoch(&epoch).await
    }

    /// Join the epoch's initialization, spawning it if none is running
    /// or the last attempt failed
    async fn initialize_epoch(&self, epoch: &Epoch<F::Resource>) -> PoolResult<DeferredStack<F::Resource>> {
        let init = {
            let mut slot = epoch.init.lock();
            let running = slot
                .as_ref()
                .filter(|init| !matches!(init.peek(), Some(Err(_))))
                .cloned();
            match running {
                Some(init) => init,
                None => {
                    let init = self.spawn_initialize();
                    *slot = Some(init.clone());
                    init
                }
            }
        };

        init.await
    }

    fn spawn_initialize(&self) -> InitFuture<F::Resource> {
        let task = tokio::spawn(initialize(
            Arc::clone(&self.factory),
            Arc::clone(&self.config),
            Arc::clone(&self.metrics),
        ));

        async move {
            task.await
                .unwrap_or_else(|error| Err(PoolError::InitializationAborted(error.to_string())))
        }
        .boxed()
        .shared()
    }

    /// Terminate ready idle resources one at a time, most recently
    /// released first. The terminated resources stay checked out so a
    /// failed drain can return them; on error every guard taken so far is
    /// dropped and its resource goes back to the stack.
    async fn drain(&self, stack: &DeferredStack<F::Resource>) -> PoolResult<Vec<Pooled<F::Resource>>> {
        let mut terminated = Vec::new();

        while let Some(mut pooled) = stack.take_ready_idle() {
            if let Err(error) = pooled.terminate().await {
                warn!(%error, terminated = terminated.len(), "failed to terminate resource, aborting drain");
                return Err(PoolError::terminate(error));
            }
            MetricsTracker::incr(&self.metrics.terminated);
            terminated.push(pooled);
        }

        Ok(terminated)
    }

    fn live_stack(&self) -> Option<DeferredStack<F::Resource>> {
        let epoch = self.lifecycle.lock().epoch().cloned()?;
        epoch.stack()
    }

    fn occupancy(&self) -> Occupancy {
        self.live_stack()
            .map_or_else(Occupancy::default, |stack| stack.occupancy())
    }
}

async fn acquire_within<R: Resource>(stack: &DeferredStack<R>, timeout: Duration) -> PoolResult<Pooled<R>> {
    tokio::time::timeout(timeout, stack.acquire())
        .await
        .map_err(|_| PoolError::Timeout(timeout))?
}

async fn initialize<F: ResourceFactory>(
    factory: Arc<F>,
    config: Arc<PoolConfiguration>,
    metrics: Arc<MetricsTracker>,
) -> PoolResult<DeferredStack<F::Resource>> {
    let size = config.size;
    let mut resources: Vec<F::Resource> = (0..size).map(|_| factory.create()).collect();

    if !config.lazy {
        let results = join_all(resources.iter_mut().map(|resource| resource.connect())).await;

        if let Some(error) = results.into_iter().find_map(Result::err) {
            MetricsTracker::incr(&metrics.connect_failures);
            warn!(%error, "eager initialization failed");

            for resource in resources.iter_mut().filter(|resource| resource.is_ready()) {
                if let Err(error) = resource.terminate().await {
                    warn!(%error, "failed to terminate resource after aborted initialization");
                }
            }
            return Err(PoolError::connect(error));
        }
    }

    MetricsTracker::incr(&metrics.epochs);
    debug!(size, lazy = config.lazy, "resource pool initialized");
    Ok(DeferredStack::with_metrics(resources, metrics))
}
