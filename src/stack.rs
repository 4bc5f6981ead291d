//! Deferred access stack: fair arbitration over a fixed set of resources
//!
//! Idle resources are reused last-in-first-out so warm connections are
//! preferred. Callers that find the stack empty park as waiters and are
//! served first-in-first-out: a released resource goes straight to the
//! oldest waiter and never touches the idle set.

use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::errors::{PoolError, PoolResult};
use crate::metrics::{MetricsTracker, Occupancy};
use crate::resource::Resource;

/// A resource held by a caller.
///
/// Dereferences to the resource. Dropping the guard (or calling
/// [`release`](Pooled::release)) pushes the resource back into the stack
/// that issued it.
pub struct Pooled<R: Resource> {
    resource: Option<R>,
    stack: Arc<Shared<R>>,
    counted_ready: bool,
}

impl<R: Resource> Pooled<R> {
    fn new(resource: R, stack: Arc<Shared<R>>) -> Self {
        Self {
            resource: Some(resource),
            stack,
            counted_ready: false,
        }
    }

    /// Return the resource to the pool
    pub fn release(self) {
        drop(self);
    }

    /// Take the resource out of the guard without returning it.
    ///
    /// The slot stays checked out until the resource is handed back with
    /// [`DeferredStack::push`].
    #[allow(clippy::expect_used)]
    pub fn detach(mut self) -> R {
        self.take_resource().expect("resource already released")
    }

    fn mark_ready(&mut self) {
        if !self.counted_ready {
            self.counted_ready = true;
            self.stack.ready_held.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn uncount(&mut self) {
        if self.counted_ready {
            self.counted_ready = false;
            self.stack.ready_held.fetch_sub(1, Ordering::Relaxed);
        }
    }

    fn take_resource(&mut self) -> Option<R> {
        self.uncount();
        self.resource.take()
    }
}

impl<R: Resource> Deref for Pooled<R> {
    type Target = R;

    #[allow(clippy::expect_used)]
    fn deref(&self) -> &Self::Target {
        self.resource.as_ref().expect("resource already released")
    }
}

impl<R: Resource> DerefMut for Pooled<R> {
    #[allow(clippy::expect_used)]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource.as_mut().expect("resource already released")
    }
}

impl<R: Resource> Drop for Pooled<R> {
    fn drop(&mut self) {
        if let Some(resource) = self.take_resource() {
            Shared::release(&self.stack, resource);
        }
    }
}

impl<R: Resource + fmt::Debug> fmt::Debug for Pooled<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("resource", &self.resource)
            .finish()
    }
}

struct StackState<R: Resource> {
    idle: Vec<R>,
    waiters: VecDeque<oneshot::Sender<Pooled<R>>>,
    closed: bool,
}

struct Shared<R: Resource> {
    state: Mutex<StackState<R>>,
    total: usize,
    ready_held: AtomicUsize,
    metrics: Arc<MetricsTracker>,
}

impl<R: Resource> Shared<R> {
    fn release(shared: &Arc<Self>, mut resource: R) {
        let mut state = shared.state.lock();

        if state.closed {
            drop(state);
            MetricsTracker::incr(&shared.metrics.stale_releases);
            retire(resource, Arc::clone(&shared.metrics));
            return;
        }

        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.is_closed() {
                trace!("skipping abandoned waiter");
                continue;
            }

            match waiter.send(Pooled::new(resource, Arc::clone(shared))) {
                Ok(()) => {
                    trace!(waiters = state.waiters.len(), "resource handed to waiter");
                    MetricsTracker::incr(&shared.metrics.total_released);
                    return;
                }
                Err(mut returned) => {
                    trace!("waiter gone before hand-off");
                    let Some(back) = returned.take_resource() else {
                        return;
                    };
                    resource = back;
                }
            }
        }

        state.idle.push(resource);
        MetricsTracker::incr(&shared.metrics.total_released);
    }
}

/// Terminate a resource whose epoch is gone. Runs in the background when a
/// tokio runtime is available, otherwise the resource is just dropped.
fn retire<R: Resource>(mut resource: R, metrics: Arc<MetricsTracker>) {
    warn!("resource released after its pool was ended; terminating it");

    if !resource.is_ready() {
        return;
    }

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                match resource.terminate().await {
                    Ok(()) => MetricsTracker::incr(&metrics.terminated),
                    Err(error) => warn!(%error, "failed to terminate stale resource"),
                }
            });
        }
        Err(_) => debug!("no runtime available, dropping stale resource"),
    }
}

enum Checkout<R: Resource> {
    Idle(Pooled<R>),
    Wait(oneshot::Receiver<Pooled<R>>),
}

/// Fixed-capacity container of resources with fair concurrent access.
///
/// Cloning yields another handle to the same stack.
///
/// # Examples
///
/// ```
/// use lazy_pool::{DeferredStack, MemoryFactory, Resource, ResourceFactory};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let factory = MemoryFactory::new();
/// let stack = DeferredStack::new((0..2).map(|_| factory.create()).collect());
///
/// let conn = stack.acquire().await.unwrap();
/// assert!(conn.is_ready());
/// assert_eq!(stack.available(), 1);
///
/// conn.release();
/// assert_eq!(stack.available(), 2);
/// assert_eq!(stack.initialized(), 1);
/// # }
/// ```
pub struct DeferredStack<R: Resource> {
    shared: Arc<Shared<R>>,
}

impl<R: Resource> Clone for DeferredStack<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: Resource> fmt::Debug for DeferredStack<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("DeferredStack")
            .field("available", &state.idle.len())
            .field("waiters", &state.waiters.len())
            .field("size", &self.shared.total)
            .field("closed", &state.closed)
            .finish()
    }
}

impl<R: Resource> DeferredStack<R> {
    /// Create a stack owning `resources`; its capacity is fixed to their count
    pub fn new(resources: Vec<R>) -> Self {
        Self::with_metrics(resources, Arc::new(MetricsTracker::new()))
    }

    pub(crate) fn with_metrics(resources: Vec<R>, metrics: Arc<MetricsTracker>) -> Self {
        let total = resources.len();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(StackState {
                    idle: resources,
                    waiters: VecDeque::new(),
                    closed: false,
                }),
                total,
                ready_held: AtomicUsize::new(0),
                metrics,
            }),
        }
    }

    /// Take a resource, waiting for a release if none is idle.
    ///
    /// A resource that is not ready is connected first.
    ///
    /// # Errors
    ///
    /// If that connect fails, [`PoolError::Connect`] is returned and the
    /// caller gets no guard. The failed resource is not discarded: it is
    /// pushed back onto the stack unconnected (handed to the oldest waiter
    /// if there is one) and the next acquisition retries the connect. The
    /// stack never shrinks because of a failed connect.
    ///
    /// Returns [`PoolError::Closed`] if the stack is closed before a
    /// resource is handed over.
    pub async fn acquire(&self) -> PoolResult<Pooled<R>> {
        let pooled = match self.checkout()? {
            Checkout::Idle(pooled) => pooled,
            Checkout::Wait(receiver) => {
                MetricsTracker::incr(&self.shared.metrics.wait_events);
                receiver.await.map_err(|_| PoolError::Closed)?
            }
        };

        self.prepare(pooled).await
    }

    /// Take an idle resource without waiting
    pub async fn try_acquire(&self) -> PoolResult<Pooled<R>> {
        let pooled = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            match state.idle.pop() {
                Some(resource) => Pooled::new(resource, Arc::clone(&self.shared)),
                None => return Err(PoolError::PoolEmpty),
            }
        };

        self.prepare(pooled).await
    }

    /// Return a detached resource to the stack.
    ///
    /// Only resources previously issued by this stack may be pushed;
    /// anything else breaks the capacity accounting.
    pub fn push(&self, resource: R) {
        Shared::release(&self.shared, resource);
    }

    /// Idle resources grantable without waiting
    pub fn available(&self) -> usize {
        self.shared.state.lock().idle.len()
    }

    /// Fixed capacity
    pub fn size(&self) -> usize {
        self.shared.total
    }

    /// Resources currently checked out
    pub fn in_use(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.shared.total.saturating_sub(self.available())
    }

    /// Callers parked waiting for a release
    pub fn waiting(&self) -> usize {
        self.shared.state.lock().waiters.len()
    }

    /// Resources reporting ready: idle ones checked now, held ones as of
    /// their hand-out
    pub fn initialized(&self) -> usize {
        let idle_ready = self
            .shared
            .state
            .lock()
            .idle
            .iter()
            .filter(|resource| resource.is_ready())
            .count();
        idle_ready + self.shared.ready_held.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Stop serving: wake parked waiters with [`PoolError::Closed`] and hand
    /// back the idle resources, most recently released first. Resources
    /// released afterwards are terminated instead of reused.
    pub fn close(&self) -> Vec<R> {
        let (idle, waiters) = {
            let mut state = self.shared.state.lock();
            state.closed = true;
            (mem::take(&mut state.idle), mem::take(&mut state.waiters))
        };

        debug!(idle = idle.len(), waiters = waiters.len(), "closing stack");
        drop(waiters);

        idle.into_iter().rev().collect()
    }

    /// Check out the most recently released idle resource that is ready,
    /// without connecting anything. Used to drain the stack before closing.
    pub(crate) fn take_ready_idle(&self) -> Option<Pooled<R>> {
        let mut state = self.shared.state.lock();
        let index = state.idle.iter().rposition(|resource| resource.is_ready())?;
        let resource = state.idle.remove(index);
        Some(Pooled::new(resource, Arc::clone(&self.shared)))
    }

    pub(crate) fn occupancy(&self) -> Occupancy {
        Occupancy {
            in_use: self.in_use(),
            available: self.available(),
            initialized: self.initialized(),
            size: self.size(),
        }
    }

    fn checkout(&self) -> PoolResult<Checkout<R>> {
        let mut state = self.shared.state.lock();

        if state.closed {
            return Err(PoolError::Closed);
        }

        if let Some(resource) = state.idle.pop() {
            return Ok(Checkout::Idle(Pooled::new(resource, Arc::clone(&self.shared))));
        }

        let (sender, receiver) = oneshot::channel();
        state.waiters.push_back(sender);
        trace!(waiters = state.waiters.len(), "no idle resource, parking");
        Ok(Checkout::Wait(receiver))
    }

    async fn prepare(&self, mut pooled: Pooled<R>) -> PoolResult<Pooled<R>> {
        if !pooled.is_ready() {
            if let Err(error) = pooled.connect().await {
                MetricsTracker::incr(&self.shared.metrics.connect_failures);
                warn!(%error, "failed to connect resource on demand");
                return Err(PoolError::connect(error));
            }
            trace!("resource connected on demand");
        }

        pooled.mark_ready();
        MetricsTracker::incr(&self.shared.metrics.total_acquired);
        Ok(pooled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryConnection, MemoryFactory};
    use crate::resource::ResourceFactory;
    use std::time::Duration;

    fn stack_of(factory: &MemoryFactory, size: usize) -> DeferredStack<MemoryConnection> {
        DeferredStack::new((0..size).map(|_| factory.create()).collect())
    }

    #[tokio::test]
    async fn idle_reuse_is_lifo() {
        let factory = MemoryFactory::new();
        let stack = stack_of(&factory, 2);

        let a = stack.acquire().await.unwrap();
        let b = stack.acquire().await.unwrap();
        let (a_id, b_id) = (a.id(), b.id());

        a.release();
        b.release();

        let first = stack.acquire().await.unwrap();
        let second = stack.acquire().await.unwrap();
        assert_eq!(first.id(), b_id);
        assert_eq!(second.id(), a_id);
    }

    #[tokio::test]
    async fn release_goes_to_oldest_waiter() {
        let factory = MemoryFactory::new();
        let stack = stack_of(&factory, 1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let held = stack.acquire().await.unwrap();

        let mut handles = Vec::new();
        for label in ["first", "second", "third"] {
            let stack = stack.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let conn = stack.acquire().await.unwrap();
                order.lock().push(label);
                drop(conn);
            }));
            tokio::task::yield_now().await;
        }
        assert_eq!(stack.waiting(), 3);

        held.release();
        assert_eq!(stack.available(), 0, "hand-off must bypass the idle set");

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
        assert_eq!(stack.available(), 1);
    }

    #[tokio::test]
    async fn abandoned_waiter_does_not_leak_capacity() {
        let factory = MemoryFactory::new();
        let stack = stack_of(&factory, 1);

        let held = stack.acquire().await.unwrap();
        let timed_out = tokio::time::timeout(Duration::from_millis(10), stack.acquire()).await;
        assert!(timed_out.is_err());

        held.release();
        assert_eq!(stack.available(), 1);
        assert_eq!(stack.waiting(), 0);
    }

    #[tokio::test]
    async fn failed_connect_returns_resource() {
        let factory = MemoryFactory::new();
        factory.fail_next_connects(1);
        let stack = stack_of(&factory, 1);

        let err = stack.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::Connect(_)));
        assert_eq!(stack.available(), 1);
        assert_eq!(stack.initialized(), 0);

        let conn = stack.acquire().await.unwrap();
        assert!(conn.is_ready());
    }

    #[tokio::test]
    async fn initialized_counts_held_and_idle() {
        let factory = MemoryFactory::new();
        let stack = stack_of(&factory, 3);
        assert_eq!(stack.initialized(), 0);

        let conn = stack.acquire().await.unwrap();
        assert_eq!(stack.initialized(), 1);

        conn.release();
        assert_eq!(stack.initialized(), 1);
        assert_eq!(factory.connects(), 1);
    }

    #[tokio::test]
    async fn try_acquire_never_waits() {
        let factory = MemoryFactory::new();
        let stack = stack_of(&factory, 1);

        let _held = stack.try_acquire().await.unwrap();
        assert!(matches!(stack.try_acquire().await, Err(PoolError::PoolEmpty)));
        assert_eq!(stack.waiting(), 0);
    }

    #[tokio::test]
    async fn close_wakes_waiters() {
        let factory = MemoryFactory::new();
        let stack = stack_of(&factory, 1);
        let _held = stack.acquire().await.unwrap();

        let waiter = {
            let stack = stack.clone();
            tokio::spawn(async move { stack.acquire().await })
        };
        tokio::task::yield_now().await;

        assert!(stack.close().is_empty());
        assert!(matches!(waiter.await.unwrap(), Err(PoolError::Closed)));
        assert!(matches!(stack.acquire().await, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn release_after_close_terminates() {
        let factory = MemoryFactory::new();
        let stack = stack_of(&factory, 2);

        let held = stack.acquire().await.unwrap();
        let idle = stack.close();
        assert_eq!(idle.len(), 1);

        held.release();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(factory.terminates(), 1);
        assert_eq!(stack.available(), 0);
    }

    #[tokio::test]
    async fn failed_connect_hands_resource_to_next_waiter() {
        let factory = MemoryFactory::new();
        let stack = stack_of(&factory, 1);
        let held = stack.acquire().await.unwrap().detach();

        let failing = {
            let stack = stack.clone();
            tokio::spawn(async move { stack.acquire().await.map(|conn| conn.id()) })
        };
        tokio::task::yield_now().await;
        let next = {
            let stack = stack.clone();
            tokio::spawn(async move { stack.acquire().await.map(|conn| conn.id()) })
        };
        tokio::task::yield_now().await;

        // the pushed-back resource is unconnected, so the first waiter connects it
        let mut unready = held;
        unready.terminate().await.unwrap();
        factory.fail_next_connects(1);
        stack.push(unready);

        assert!(matches!(failing.await.unwrap(), Err(PoolError::Connect(_))));
        assert_eq!(next.await.unwrap().unwrap(), 0);
        assert_eq!(stack.size(), 1);
        assert_eq!(stack.available(), 1);
    }

    #[tokio::test]
    async fn take_ready_idle_skips_unconnected() {
        let factory = MemoryFactory::new();
        let stack = stack_of(&factory, 3);
        let warm = stack.acquire().await.unwrap();
        let warm_id = warm.id();
        warm.release();

        let taken = stack.take_ready_idle().unwrap();
        assert_eq!(taken.id(), warm_id);
        assert!(stack.take_ready_idle().is_none());

        drop(taken);
        assert_eq!(stack.available(), 3);
    }

    #[tokio::test]
    async fn detach_and_push_round_trip() {
        let factory = MemoryFactory::new();
        let stack = stack_of(&factory, 1);

        let conn = stack.acquire().await.unwrap().detach();
        assert_eq!(stack.available(), 0);
        assert_eq!(stack.in_use(), 1);

        stack.push(conn);
        assert_eq!(stack.available(), 1);
        assert_eq!(stack.in_use(), 0);
    }
}
