//! Metrics collection and export for resource pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Metrics snapshot for a pool
///
/// Counters accumulate across epochs; gauges describe the live epoch and
/// read zero while the pool is ended.
///
/// # Examples
///
/// ```
/// use lazy_pool::{MemoryFactory, PoolConfiguration, ResourcePool};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let pool = ResourcePool::new(MemoryFactory::new(), PoolConfiguration::new().with_size(2)).unwrap();
///
/// let conn = pool.connect().await.unwrap();
/// let metrics = pool.get_metrics();
/// assert_eq!(metrics.total_acquired, 1);
/// assert_eq!(metrics.in_use, 1);
/// drop(conn);
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PoolMetrics {
    /// Successful acquisitions
    pub total_acquired: usize,

    /// Resources handed back to a live stack
    pub total_released: usize,

    /// Acquisitions that had to park as a waiter
    pub wait_events: usize,

    /// Failed connection attempts, eager or on demand
    pub connect_failures: usize,

    /// Resources terminated by `end` or after a stale release
    pub terminated: usize,

    /// Releases into a stack whose epoch had already ended
    pub stale_releases: usize,

    /// Completed initializations
    pub epochs: usize,

    /// Resources currently held by callers
    pub in_use: usize,

    /// Idle resources grantable without waiting
    pub available: usize,

    /// Resources reporting ready
    pub initialized: usize,

    /// Held fraction of the capacity (0.0 to 1.0)
    pub utilization: f64,

    /// Capacity of the live epoch
    pub size: usize,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_acquired".to_string(), self.total_acquired.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("wait_events".to_string(), self.wait_events.to_string());
        metrics.insert("connect_failures".to_string(), self.connect_failures.to_string());
        metrics.insert("terminated".to_string(), self.terminated.to_string());
        metrics.insert("stale_releases".to_string(), self.stale_releases.to_string());
        metrics.insert("epochs".to_string(), self.epochs.to_string());
        metrics.insert("in_use".to_string(), self.in_use.to_string());
        metrics.insert("available".to_string(), self.available.to_string());
        metrics.insert("initialized".to_string(), self.initialized.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics.insert("size".to_string(), self.size.to_string());
        metrics
    }
}

/// Metrics exporter for Prometheus
pub struct MetricsExporter;

impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use lazy_pool::{MemoryFactory, PoolConfiguration, ResourcePool};
    /// use std::collections::HashMap;
    ///
    /// let pool = ResourcePool::new(MemoryFactory::new(), PoolConfiguration::default()).unwrap();
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = pool.export_metrics_prometheus("db", Some(&tags));
    /// assert!(output.contains("lazypool_resources_in_use"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let labels = Self::format_labels(pool_name, tags);
        let mut output = String::new();

        let gauges = [
            ("lazypool_resources_in_use", "Resources currently held", metrics.in_use as f64),
            ("lazypool_resources_available", "Idle resources", metrics.available as f64),
            ("lazypool_resources_initialized", "Connected resources", metrics.initialized as f64),
            ("lazypool_size", "Capacity of the live epoch", metrics.size as f64),
            ("lazypool_utilization", "Held fraction of capacity", metrics.utilization),
        ];
        for (name, help, value) in gauges {
            output.push_str(&format!("# HELP {name} {help}\n"));
            output.push_str(&format!("# TYPE {name} gauge\n"));
            output.push_str(&format!("{name}{{{labels}}} {value:.2}\n"));
        }

        let counters = [
            ("lazypool_acquired_total", "Successful acquisitions", metrics.total_acquired),
            ("lazypool_released_total", "Releases into a live epoch", metrics.total_released),
            ("lazypool_waits_total", "Acquisitions that parked", metrics.wait_events),
            ("lazypool_connect_failures_total", "Failed connection attempts", metrics.connect_failures),
            ("lazypool_terminated_total", "Terminated resources", metrics.terminated),
            ("lazypool_stale_releases_total", "Releases after the epoch ended", metrics.stale_releases),
            ("lazypool_epochs_total", "Completed initializations", metrics.epochs),
        ];
        for (name, help, value) in counters {
            output.push_str(&format!("# HELP {name} {help}\n"));
            output.push_str(&format!("# TYPE {name} counter\n"));
            output.push_str(&format!("{name}{{{labels}}} {value}\n"));
        }

        output
    }

    /// Register a snapshot of `metrics` with a Prometheus registry
    #[cfg(feature = "metrics")]
    pub fn register(
        metrics: &PoolMetrics,
        pool_name: &str,
        registry: &prometheus::Registry,
    ) -> prometheus::Result<()> {
        use prometheus::{Gauge, IntCounter, Opts};

        let opts = |name: &str, help: &str| Opts::new(name, help).const_label("pool", pool_name);

        let gauges = [
            ("lazypool_resources_in_use", "Resources currently held", metrics.in_use as f64),
            ("lazypool_resources_available", "Idle resources", metrics.available as f64),
            ("lazypool_utilization", "Held fraction of capacity", metrics.utilization),
        ];
        for (name, help, value) in gauges {
            let gauge = Gauge::with_opts(opts(name, help))?;
            gauge.set(value);
            registry.register(Box::new(gauge))?;
        }

        let counters = [
            ("lazypool_acquired_total", "Successful acquisitions", metrics.total_acquired),
            ("lazypool_connect_failures_total", "Failed connection attempts", metrics.connect_failures),
            ("lazypool_terminated_total", "Terminated resources", metrics.terminated),
        ];
        for (name, help, value) in counters {
            let counter = IntCounter::with_opts(opts(name, help))?;
            counter.inc_by(value as u64);
            registry.register(Box::new(counter))?;
        }

        Ok(())
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            let mut sorted: Vec<_> = tags.iter().collect();
            sorted.sort();
            for (key, value) in sorted {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Gauge readings taken from the live stack
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Occupancy {
    pub in_use: usize,
    pub available: usize,
    pub initialized: usize,
    pub size: usize,
}

/// Internal counters shared by every epoch of one pool
#[derive(Debug, Default)]
pub(crate) struct MetricsTracker {
    pub total_acquired: AtomicUsize,
    pub total_released: AtomicUsize,
    pub wait_events: AtomicUsize,
    pub connect_failures: AtomicUsize,
    pub terminated: AtomicUsize,
    pub stale_releases: AtomicUsize,
    pub epochs: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, occupancy: Occupancy) -> PoolMetrics {
        let utilization = if occupancy.size > 0 {
            occupancy.in_use as f64 / occupancy.size as f64
        } else {
            0.0
        };

        PoolMetrics {
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            wait_events: self.wait_events.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            terminated: self.terminated.load(Ordering::Relaxed),
            stale_releases: self.stale_releases.load(Ordering::Relaxed),
            epochs: self.epochs.load(Ordering::Relaxed),
            in_use: occupancy.in_use,
            available: occupancy.available,
            initialized: occupancy.initialized,
            utilization,
            size: occupancy.size,
        }
    }
}
