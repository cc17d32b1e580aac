//! # Configuration
//!
//! Settings for the two independent halves of the engine: the admission
//! controller (sliding window + telemetry ring) and the bounded worker pool.
//!
//! ## Admission Parameters
//!
//! ```text
//!     Sliding Window Configuration:
//!
//!     ◄──────────── window (1s) ────────────►
//!     ┌─────────────────────────────────────┐
//!     │ t1   t2  t3      t4    t5           │ ← accepted timestamps
//!     └─────────────────────────────────────┘
//!                                          now
//!     allow iff  count(window) < max_requests_per_second
//!
//!     Telemetry ring: telemetry_capacity slots per client,
//!     oldest unread decision overwritten when full.
//! ```
//!
//! ## Pool Parameters
//!
//! ```text
//!     enqueue ──► [ task | task | ... ] ──► worker_count threads
//!                 ◄── max_queue_size ─►
//! ```

use super::error::{Error, Result};
use std::time::Duration;

/// Default sliding window capacity, in accepted requests per window.
pub const DEFAULT_MAX_REQUESTS_PER_SECOND: usize = 1000;

/// Default sliding window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Default number of decision events retained per client between flushes.
pub const DEFAULT_TELEMETRY_CAPACITY: usize = 1000;

/// Largest accepted telemetry ring, in events per client (8 MiB of slots).
pub const MAX_TELEMETRY_CAPACITY: usize = 1 << 20;

/// Default number of worker threads in the pool.
pub const DEFAULT_WORKER_COUNT: usize = 16;

/// Default bound on queued, not yet running, tasks.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;

/// Configuration for an [`AdmissionController`](crate::AdmissionController).
///
/// ## Examples
///
/// ```rust
/// use metricstream::AdmissionConfig;
/// use std::time::Duration;
///
/// // 50 requests per second per client
/// let config = AdmissionConfig::per_second(50);
///
/// // 10 requests per 250ms, keeping the last 4096 decisions per client
/// let config = AdmissionConfig::per_second(10)
///     .with_window(Duration::from_millis(250))
///     .with_telemetry_capacity(4096);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionConfig {
    /// Maximum accepted requests per client inside one window.
    ///
    /// Zero is legal and denies every request.
    pub max_requests_per_second: usize,

    /// Length of the trailing window. One second unless you have a reason.
    pub window: Duration,

    /// Slots in each client's telemetry ring.
    pub telemetry_capacity: usize,
}

impl Default for AdmissionConfig {
    /// 1000 requests per 1s window, 1000 telemetry slots per client.
    fn default() -> Self {
        Self {
            max_requests_per_second: DEFAULT_MAX_REQUESTS_PER_SECOND,
            window: DEFAULT_WINDOW,
            telemetry_capacity: DEFAULT_TELEMETRY_CAPACITY,
        }
    }
}

impl AdmissionConfig {
    /// Creates a configuration admitting `max_requests_per_second` per client
    /// with the default window and telemetry capacity.
    pub fn per_second(max_requests_per_second: usize) -> Self {
        Self {
            max_requests_per_second,
            ..Self::default()
        }
    }

    /// Overrides the window length.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Overrides the per-client telemetry ring capacity.
    pub fn with_telemetry_capacity(mut self, capacity: usize) -> Self {
        self.telemetry_capacity = capacity;
        self
    }

    /// Window length in nanoseconds, saturated to `u64`.
    pub(crate) fn window_ns(&self) -> u64 {
        u64::try_from(self.window.as_nanos()).unwrap_or(u64::MAX)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if:
    /// - `window` is zero
    /// - `telemetry_capacity` is zero or above [`MAX_TELEMETRY_CAPACITY`]
    pub fn validate(&self) -> Result<()> {
        if self.window.is_zero() {
            return Err(Error::InvalidConfig("window must be greater than zero"));
        }

        if self.telemetry_capacity == 0 {
            return Err(Error::InvalidConfig(
                "telemetry_capacity must be greater than zero",
            ));
        }

        if self.telemetry_capacity > MAX_TELEMETRY_CAPACITY {
            return Err(Error::InvalidConfig(
                "telemetry_capacity exceeds MAX_TELEMETRY_CAPACITY",
            ));
        }

        Ok(())
    }

    /// Effective admitted rate expressed per second.
    ///
    /// ```rust
    /// use metricstream::AdmissionConfig;
    /// use std::time::Duration;
    ///
    /// let config = AdmissionConfig::per_second(10).with_window(Duration::from_millis(500));
    /// assert_eq!(config.effective_rate_per_second(), 20.0);
    /// ```
    pub fn effective_rate_per_second(&self) -> f64 {
        let secs = self.window.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.max_requests_per_second as f64 / secs
        }
    }
}

/// Configuration for a [`WorkerPool`](crate::WorkerPool).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads, fixed for the life of the pool.
    pub worker_count: usize,

    /// Bound on tasks waiting for a worker.
    pub max_queue_size: usize,
}

impl Default for PoolConfig {
    /// 16 workers, up to 10 000 queued tasks.
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
        }
    }
}

impl PoolConfig {
    /// Creates a pool configuration.
    pub fn new(worker_count: usize, max_queue_size: usize) -> Self {
        Self {
            worker_count,
            max_queue_size,
        }
    }

    /// Sizes the pool to the machine's available parallelism.
    pub fn per_core(max_queue_size: usize) -> Self {
        let worker_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(DEFAULT_WORKER_COUNT);

        Self {
            worker_count,
            max_queue_size,
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if either field is zero.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::InvalidConfig("worker_count must be greater than zero"));
        }

        if self.max_queue_size == 0 {
            return Err(Error::InvalidConfig(
                "max_queue_size must be greater than zero",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_defaults() {
        let config = AdmissionConfig::default();
        assert_eq!(config.max_requests_per_second, 1000);
        assert_eq!(config.window, Duration::from_secs(1));
        assert_eq!(config.telemetry_capacity, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_admission_validation() {
        let zero_window = AdmissionConfig::per_second(5).with_window(Duration::ZERO);
        assert!(zero_window.validate().is_err());

        let zero_ring = AdmissionConfig::per_second(5).with_telemetry_capacity(0);
        assert!(zero_ring.validate().is_err());

        let largest =
            AdmissionConfig::per_second(5).with_telemetry_capacity(MAX_TELEMETRY_CAPACITY);
        assert!(largest.validate().is_ok());

        let huge_ring = AdmissionConfig::per_second(5).with_telemetry_capacity(usize::MAX / 16);
        assert!(matches!(huge_ring.validate(), Err(Error::InvalidConfig(_))));

        // Denying everything is a legitimate policy
        let deny_all = AdmissionConfig::per_second(0);
        assert!(deny_all.validate().is_ok());
    }

    #[test]
    fn test_window_ns() {
        let config = AdmissionConfig::default();
        assert_eq!(config.window_ns(), 1_000_000_000);

        let huge = AdmissionConfig::default().with_window(Duration::MAX);
        assert_eq!(huge.window_ns(), u64::MAX);
    }

    #[test]
    fn test_effective_rate() {
        let config = AdmissionConfig::per_second(120).with_window(Duration::from_secs(60));
        assert_eq!(config.effective_rate_per_second(), 2.0);
    }

    #[test]
    fn test_pool_validation() {
        assert!(PoolConfig::default().validate().is_ok());
        assert!(PoolConfig::new(0, 10).validate().is_err());
        assert!(PoolConfig::new(4, 0).validate().is_err());
        assert!(PoolConfig::per_core(100).worker_count >= 1);
    }
}
