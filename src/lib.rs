//! # Metricstream - Admission Control for a Metrics Ingestion Front End
//!
//! The concurrency core of a metrics-ingestion service: decide quickly whether
//! a client may send more data, remember every decision for monitoring without
//! slowing that decision down, and hand accepted work to a fixed set of
//! threads that push back instead of queueing without bound.
//!
//! ## The Sliding Window
//!
//! Each client gets a window of the timestamps of its recently *accepted*
//! requests. A request is admitted while the window holds fewer than
//! `max_requests_per_second` entries:
//!
//! ```text
//!     max = 5, window = 1s
//!
//!     t=0.00  ✅ [0.00]
//!     t=0.02  ✅ [0.00 0.02]
//!     ...
//!     t=0.08  ✅ [0.00 0.02 0.04 0.06 0.08]
//!     t=0.09  ⛔ window full
//!     t=1.19  ✅ [1.19]              (everything older than 1s pruned)
//! ```
//!
//! ## Features
//!
//! - 🪟 **Sliding Window Admission** - Exact per-client limit over any 1s interval
//! - 📼 **Lossy Decision Telemetry** - Fixed-size ring per client; recording never waits on a flush
//! - 🔀 **Two Lock Domains** - Window and telemetry locks are never held together
//! - 🧵 **Bounded Worker Pool** - FIFO queue with immediate backpressure
//! - 📊 **Metrics & Health** - Snapshots for admission, telemetry and the pool
//! - 🧪 **Injectable Clock** - Deterministic tests with [`ManualClock`]
//!
//! ## Quick Start
//!
//! ### Admission Control
//!
//! ```rust
//! use metricstream::{AdmissionController, AdmissionConfig};
//!
//! // 5 requests per second per client
//! let controller = AdmissionController::new(AdmissionConfig::per_second(5)).unwrap();
//!
//! for _ in 0..5 {
//!     assert!(controller.allow_request("client-a"));
//! }
//! // Return 429 Too Many Requests
//! assert!(!controller.allow_request("client-a"));
//! ```
//!
//! ### Builder Pattern
//!
//! ```rust
//! use metricstream::{AdmissionControllerBuilder, MemorySink};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let sink = Arc::new(MemorySink::new());
//! let controller = AdmissionControllerBuilder::new()
//!     .max_requests_per_second(100)
//!     .window(Duration::from_secs(1))
//!     .telemetry_capacity(4096)
//!     .sink(sink.clone())
//!     .build();
//!
//! controller.allow_request("client-a");
//! controller.flush_metrics();
//! assert_eq!(sink.len(), 1);
//! ```
//!
//! ### Bounded Worker Pool
//!
//! ```rust
//! use metricstream::{PoolConfig, WorkerPool};
//!
//! let pool = WorkerPool::new(PoolConfig::new(4, 1000)).unwrap();
//!
//! if !pool.enqueue(|| { /* handle the request */ }) {
//!     // Return 503 Service Unavailable
//! }
//! pool.shutdown();
//! ```
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │   Request Front End     │
//!                    └──────────┬──────────────┘
//!                               │
//!                    ┌──────────▼──────────────┐
//!                    │    IngestionService     │
//!                    ├─────────────────────────┤
//!                    │  • dispatch()           │
//!                    │  • start_flush_thread() │
//!                    │  • shutdown()           │
//!                    └──────────┬──────────────┘
//!                               │
//!                ┌──────────────┴───────────────┐
//!                │                              │
//!     ┌──────────▼──────────┐       ┌───────────▼──────────┐
//!     │ AdmissionController │       │     WorkerPool       │
//!     ├─────────────────────┤       ├──────────────────────┤
//!     │ • Sliding windows   │       │ • Fixed workers      │
//!     │ • Telemetry rings   │       │ • Bounded FIFO       │
//!     │ • flush → sink      │       │ • Backpressure       │
//!     └─────────────────────┘       └──────────────────────┘
//! ```
//!
//! ## Performance Characteristics
//!
//! | Operation | Time Complexity | Blocks On |
//! |-----------|-----------------|-----------|
//! | allow_request() | O(k)* | one client's window lock, then its ring writer lock |
//! | flush_metrics() | O(clients + events) | one client's drain lock at a time |
//! | enqueue() | O(1) | the queue lock, never on a full queue |
//!
//! *k = entries expired since the client's previous request, at most
//! `max_requests_per_second`
//!
//! ## Thread Safety
//!
//! Every type is `Send + Sync` and meant to be shared through an `Arc`:
//! - `AdmissionController` - see [`SharedAdmissionController`]
//! - `WorkerPool` - see [`SharedWorkerPool`]
//! - `IngestionService` - see [`SharedIngestionService`]
//!
//! ## Telemetry Loss
//!
//! A client's ring holds `telemetry_capacity` decisions. If more accumulate
//! between flushes, the oldest are overwritten and reported as dropped in the
//! [`FlushReport`] and in [`AdmissionMetrics`]. Admission never waits for
//! telemetry.
//!
//! ## Examples
//!
//! See `demos/ingest_service.rs` for a complete service with a periodic flush
//! and structured logging.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    missing_debug_implementations
)]
#![forbid(unsafe_code)]

// Internal module
mod engine;

// Public re-exports
pub use engine::{
    AdmissionConfig, AdmissionController, AdmissionMetrics, Clock, DecisionEvent,
    DispatchOutcome, Drained, Error, FlushReport, HealthStatus, IngestionService, LogSink,
    ManualClock, MemorySink, Metric, MetricBatch, MetricType, MetricValidator, MonitoringSink,
    MonotonicClock, NullSink, PoolConfig, PoolState, PoolStats, Rejection, RequestWindow, Result,
    ServiceStats, SinkError, TelemetryRing, ValidationError, WorkerPool, CACHE_LINE_SIZE,
    DEFAULT_CLIENT_ID, DEFAULT_MAX_QUEUE_SIZE, DEFAULT_MAX_REQUESTS_PER_SECOND,
    DEFAULT_TELEMETRY_CAPACITY, DEFAULT_WINDOW, DEFAULT_WORKER_COUNT, MAX_BATCH_SIZE,
    MAX_METRIC_NAME_LEN, MAX_TELEMETRY_CAPACITY, MAX_TIMESTAMP_NS,
};

use std::sync::Arc;
use std::time::Duration;

/// An admission controller wrapped in `Arc` for sharing between request
/// threads and the flush scheduler.
///
/// # Example
/// ```rust
/// use metricstream::{AdmissionController, AdmissionConfig, SharedAdmissionController};
/// use std::sync::Arc;
///
/// let shared: SharedAdmissionController =
///     Arc::new(AdmissionController::new(AdmissionConfig::per_second(10)).unwrap());
///
/// let clone = shared.clone();
/// std::thread::spawn(move || {
///     clone.allow_request("a");
/// })
/// .join()
/// .unwrap();
/// ```
pub type SharedAdmissionController = Arc<AdmissionController>;

/// A worker pool wrapped in `Arc`.
pub type SharedWorkerPool = Arc<WorkerPool>;

/// An ingestion service wrapped in `Arc`.
pub type SharedIngestionService = Arc<IngestionService>;

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum supported Rust version.
pub const MSRV: &str = "1.70.0";

/// Prelude module for convenient imports.
///
/// ```rust
/// use metricstream::prelude::*;
/// ```
pub mod prelude {
    //! Common imports for typical admission and dispatch code.
    //!
    //! # Example
    //! ```rust
    //! use metricstream::prelude::*;
    //!
    //! let controller = AdmissionControllerBuilder::new().max_requests_per_second(10).build();
    //! let pool = WorkerPool::new(PoolConfig::new(1, 8)).unwrap();
    //! let status = HealthStatus::Healthy;
    //! ```

    pub use crate::{
        AdmissionConfig, AdmissionController, AdmissionControllerBuilder, AdmissionMetrics,
        DecisionEvent, DispatchOutcome, HealthStatus, IngestionService, Metric, MetricBatch,
        MetricType, MonitoringSink, PoolConfig, SharedAdmissionController,
        SharedIngestionService, SharedWorkerPool, WorkerPool,
    };
}

/// Builder for an [`AdmissionController`] with custom settings.
///
/// # Example
///
/// ```rust
/// use metricstream::{AdmissionControllerBuilder, ManualClock, NullSink};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// // 100 requests per minute, deterministic time
/// let clock = Arc::new(ManualClock::new());
/// let controller = AdmissionControllerBuilder::new()
///     .max_requests_per_second(100)
///     .window(Duration::from_secs(60))
///     .sink(Arc::new(NullSink))
///     .clock(clock.clone())
///     .build();
///
/// // Or use try_build() for error handling
/// let result = AdmissionControllerBuilder::new()
///     .telemetry_capacity(0) // Invalid!
///     .try_build();
///
/// assert!(result.is_err());
/// ```
pub struct AdmissionControllerBuilder {
    config: AdmissionConfig,
    sink: Option<Arc<dyn MonitoringSink>>,
    clock: Option<Arc<dyn Clock>>,
}

impl AdmissionControllerBuilder {
    /// Creates a builder with the default configuration.
    ///
    /// Defaults:
    /// - 1000 requests per window
    /// - 1 second window
    /// - 1000 telemetry slots per client
    /// - [`LogSink`] and [`MonotonicClock`]
    pub fn new() -> Self {
        Self {
            config: AdmissionConfig::default(),
            sink: None,
            clock: None,
        }
    }

    /// Sets the per-client limit. Zero denies everything.
    pub fn max_requests_per_second(mut self, max: usize) -> Self {
        self.config.max_requests_per_second = max;
        self
    }

    /// Sets the window length (must be > 0).
    pub fn window(mut self, window: Duration) -> Self {
        self.config.window = window;
        self
    }

    /// Sets the per-client telemetry ring capacity (must be > 0).
    pub fn telemetry_capacity(mut self, capacity: usize) -> Self {
        self.config.telemetry_capacity = capacity;
        self
    }

    /// Sets where flushed decisions go.
    pub fn sink(mut self, sink: Arc<dyn MonitoringSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sets the time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the controller.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid:
    /// - `window` is zero
    /// - `telemetry_capacity` is zero
    ///
    /// Use `try_build()` if you want to handle errors.
    pub fn build(self) -> AdmissionController {
        match self.try_build() {
            Ok(controller) => controller,
            Err(err) => panic!("{err}"),
        }
    }

    /// Builds the controller, returning an error if the configuration is
    /// invalid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if validation fails.
    pub fn try_build(self) -> Result<AdmissionController> {
        let sink = self.sink.unwrap_or_else(|| Arc::new(LogSink));
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        AdmissionController::with_parts(self.config, sink, clock)
    }
}

impl Default for AdmissionControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AdmissionControllerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionControllerBuilder")
            .field("config", &self.config)
            .field("custom_sink", &self.sink.is_some())
            .field("custom_clock", &self.clock.is_some())
            .finish()
    }
}
