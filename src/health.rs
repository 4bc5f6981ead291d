//! Health reporting for resource pools

/// Health status of a resource pool
///
/// # Examples
///
/// ```
/// use lazy_pool::HealthStatus;
///
/// let health = HealthStatus::new(3, 1, 4, false);
/// assert!(health.is_healthy());
/// assert_eq!(health.available, 3);
///
/// let ended = HealthStatus::new(0, 0, 0, true);
/// assert!(!ended.is_healthy());
/// ```
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Held fraction of the capacity (0.0 to 1.0)
    pub utilization: f64,

    /// Idle resources
    pub available: usize,

    /// Resources held by callers
    pub in_use: usize,

    /// Capacity of the live epoch
    pub size: usize,

    /// Whether the pool has been ended
    pub ended: bool,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    pub fn new(available: usize, in_use: usize, size: usize, ended: bool) -> Self {
        let utilization = if size > 0 {
            in_use as f64 / size as f64
        } else {
            0.0
        };

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if ended {
            warnings.push("Pool has been ended".to_string());
            is_healthy = false;
        }

        if utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", utilization * 100.0));
            is_healthy = false;
        }

        // callers will park until a release
        if available == 0 && size > 0 {
            warnings.push("No idle resources".to_string());
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization,
            available,
            in_use,
            size,
            ended,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}
