//! In-memory resource used by the demo binary, tests and benchmarks.
//!
//! Enabled by the `testing` feature.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::resource::{Resource, ResourceFactory};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("connection {0} was refused")]
    Refused(usize),

    #[error("connection {0} is not connected")]
    NotConnected(usize),

    #[error("connection {0} did not shut down cleanly")]
    TerminateFailed(usize),
}

#[derive(Debug, Default)]
struct FactoryState {
    created: AtomicUsize,
    connects: AtomicUsize,
    terminates: AtomicUsize,
    failures_pending: AtomicUsize,
    terminate_failures_pending: AtomicUsize,
    connect_delay: Duration,
}

/// Factory for [`MemoryConnection`]s that records every lifecycle call.
///
/// Clones share their counters, so a test can keep one handle while the
/// pool owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryFactory {
    state: Arc<FactoryState>,
}

impl MemoryFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a handshake that takes `delay`
    pub fn with_connect_delay(delay: Duration) -> Self {
        Self {
            state: Arc::new(FactoryState {
                connect_delay: delay,
                ..FactoryState::default()
            }),
        }
    }

    /// Make the next `count` connection attempts fail
    pub fn fail_next_connects(&self, count: usize) {
        self.state.failures_pending.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` termination attempts fail, leaving the
    /// connection open
    pub fn fail_next_terminates(&self, count: usize) {
        self.state.terminate_failures_pending.store(count, Ordering::SeqCst);
    }

    /// Number of connections created so far
    pub fn created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    /// Number of successful connects
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Number of completed terminations
    pub fn terminates(&self) -> usize {
        self.state.terminates.load(Ordering::SeqCst)
    }
}

impl ResourceFactory for MemoryFactory {
    type Resource = MemoryConnection;

    fn create(&self) -> MemoryConnection {
        let id = self.state.created.fetch_add(1, Ordering::SeqCst);
        MemoryConnection {
            id,
            connected: false,
            queries: 0,
            state: Arc::clone(&self.state),
        }
    }
}

/// A connection that lives entirely in memory
#[derive(Debug)]
pub struct MemoryConnection {
    id: usize,
    connected: bool,
    queries: usize,
    state: Arc<FactoryState>,
}

impl MemoryConnection {
    /// Creation order within the factory, starting at 0
    pub fn id(&self) -> usize {
        self.id
    }

    /// Number of queries run on this connection
    pub fn queries(&self) -> usize {
        self.queries
    }

    /// Run a query, echoing it back
    pub fn query(&mut self, sql: &str) -> Result<String, MemoryError> {
        if !self.connected {
            return Err(MemoryError::NotConnected(self.id));
        }
        self.queries += 1;
        Ok(format!("[{}] {}", self.id, sql))
    }
}

#[async_trait]
impl Resource for MemoryConnection {
    type Error = MemoryError;

    async fn connect(&mut self) -> Result<(), MemoryError> {
        if !self.state.connect_delay.is_zero() {
            tokio::time::sleep(self.state.connect_delay).await;
        }

        let refused = self
            .state
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(MemoryError::Refused(self.id));
        }

        self.connected = true;
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.connected
    }

    async fn terminate(&mut self) -> Result<(), MemoryError> {
        if !self.connected {
            return Err(MemoryError::NotConnected(self.id));
        }

        let failed = self
            .state
            .terminate_failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(MemoryError::TerminateFailed(self.id));
        }

        self.connected = false;
        self.state.terminates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
