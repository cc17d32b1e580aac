//! # Engine
//!
//! Internal implementation of admission control, decision telemetry and the
//! bounded worker pool. Each submodule owns one concern.
//!
//! ## Module Structure
//!
//! ```text
//!     engine/
//!     ├── mod.rs          (module organization)
//!     ├── config.rs       (AdmissionConfig, PoolConfig)
//!     ├── error.rs        (Error, SinkError, ValidationError, Rejection)
//!     ├── utils.rs        (clocks, cache-line padding)
//!     ├── window.rs       (per-client sliding window)
//!     ├── telemetry.rs    (per-client decision ring)
//!     ├── sink.rs         (monitoring sinks)
//!     ├── controller.rs   (admission controller + flush)
//!     ├── metrics.rs      (admission metrics, health)
//!     ├── pool.rs         (bounded worker pool)
//!     ├── ingest.rs       (metric model, validation)
//!     └── service.rs      (ingestion service context)
//! ```
//!
//! ## Architecture Flow
//!
//! ```text
//!     request ──► IngestionService::dispatch
//!                    │
//!                    ├──► AdmissionController ──► RequestWindow   (lock A)
//!                    │          │
//!                    │          └──────────────► TelemetryRing    (lock B)
//!                    │                               ▲
//!                    │     flush thread ─────────────┘ drain      (lock C)
//!                    │                               └──► MonitoringSink
//!                    │
//!                    ├──► MetricValidator
//!                    │
//!                    └──► WorkerPool ──► handler(batch)
//! ```

mod config;
mod controller;
mod error;
mod ingest;
mod metrics;
mod pool;
mod service;
mod sink;
mod telemetry;
mod utils;
mod window;

/// Configuration for admission and the pool
pub use config::{
    AdmissionConfig, PoolConfig, DEFAULT_MAX_QUEUE_SIZE, DEFAULT_MAX_REQUESTS_PER_SECOND,
    DEFAULT_TELEMETRY_CAPACITY, DEFAULT_WINDOW, DEFAULT_WORKER_COUNT,
    MAX_TELEMETRY_CAPACITY,
};

/// Admission facade and flush results
pub use controller::{AdmissionController, FlushReport};

/// Error types
pub use error::{Error, Rejection, Result, SinkError, ValidationError};

/// Metric payload model and validation
pub use ingest::{
    Metric, MetricBatch, MetricType, MetricValidator, MAX_BATCH_SIZE, MAX_METRIC_NAME_LEN,
};

/// Observability snapshots
pub use metrics::{AdmissionMetrics, HealthStatus};

/// Bounded worker pool
pub use pool::{PoolState, PoolStats, WorkerPool};

/// Service context
pub use service::{DispatchOutcome, IngestionService, ServiceStats, DEFAULT_CLIENT_ID};

/// Monitoring sinks
pub use sink::{LogSink, MemorySink, MonitoringSink, NullSink};

/// Decision telemetry
pub use telemetry::{DecisionEvent, Drained, TelemetryRing, MAX_TIMESTAMP_NS};

/// Time sources
pub use utils::{Clock, ManualClock, MonotonicClock, CACHE_LINE_SIZE};

/// Sliding window state
pub use window::RequestWindow;
