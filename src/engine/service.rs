//! # Ingestion Service
//!
//! The context object a front end holds: one admission controller, one worker
//! pool, one validator, and the periodic flush. Built once at startup and
//! passed by reference to whatever accepts requests.
//!
//! ```text
//!     dispatch(client, batch, handler)
//!         │
//!         ├─ allow_request(client) ── false ──► RateLimited   (429)
//!         ├─ validate_batch(batch) ── err ────► Invalid(err)  (400)
//!         ├─ pool.submit(handler)  ── full ───► Overloaded    (503)
//!         └────────────────────────────────────► Accepted      (200)
//!
//!     flush thread ──every interval──► controller.flush_metrics()
//! ```
//!
//! ## Shutdown Order
//!
//! 1. stop the flush thread
//! 2. shut the pool down, running every queued handler
//! 3. one last flush, so decisions made during the drain are delivered

use super::{
    config::{AdmissionConfig, PoolConfig},
    controller::AdmissionController,
    error::{Rejection, Result, ValidationError},
    ingest::{MetricBatch, MetricValidator},
    metrics::HealthStatus,
    pool::{PoolState, WorkerPool},
    sink::MonitoringSink,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};

/// Client id used when a request carries no credentials.
pub const DEFAULT_CLIENT_ID: &str = "default";

/// What [`IngestionService::dispatch`] did with a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler was queued.
    Accepted {
        /// Metrics in the accepted batch.
        metrics: usize,
    },
    /// The client is over its rate limit.
    RateLimited,
    /// The batch failed validation.
    Invalid(ValidationError),
    /// The worker pool refused the handler.
    Overloaded(Rejection),
}

impl DispatchOutcome {
    /// `true` for [`Accepted`](Self::Accepted).
    #[inline]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// HTTP status a front end would answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Accepted { .. } => 200,
            Self::RateLimited => 429,
            Self::Invalid(_) => 400,
            Self::Overloaded(_) => 503,
        }
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted { metrics } => write!(f, "accepted {metrics} metrics"),
            Self::RateLimited => write!(f, "rate limit exceeded"),
            Self::Invalid(err) => write!(f, "invalid batch: {err}"),
            Self::Overloaded(reason) => write!(f, "overloaded: {reason}"),
        }
    }
}

/// Service-level request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceStats {
    /// Metrics in accepted batches.
    pub metrics_received: u64,
    /// Batches handed to the pool.
    pub batches_processed: u64,
    /// Batches that failed validation.
    pub validation_errors: u64,
    /// Requests denied by admission control.
    pub rate_limited: u64,
    /// Batches the pool had no room for.
    pub overloaded: u64,
}

impl ServiceStats {
    /// Every dispatch, whatever its outcome.
    #[inline]
    pub fn total_requests(&self) -> u64 {
        self.batches_processed + self.validation_errors + self.rate_limited + self.overloaded
    }

    /// Human-readable report.
    pub fn summary(&self) -> String {
        format!(
            "Ingestion Service Stats:\n\
             ├─ Metrics Received: {}\n\
             ├─ Batches Processed: {}\n\
             ├─ Validation Errors: {}\n\
             ├─ Rate Limited: {}\n\
             └─ Overloaded: {}",
            self.metrics_received,
            self.batches_processed,
            self.validation_errors,
            self.rate_limited,
            self.overloaded,
        )
    }
}

impl fmt::Display for ServiceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

#[derive(Default)]
struct Counters {
    metrics_received: AtomicU64,
    batches_processed: AtomicU64,
    validation_errors: AtomicU64,
    rate_limited: AtomicU64,
    overloaded: AtomicU64,
}

#[derive(Default)]
struct Lifecycle {
    flusher: Option<(JoinHandle<()>, mpsc::Sender<()>)>,
    stopped: bool,
}

/// Admission, validation and dispatch for a metrics front end.
///
/// ```rust
/// use metricstream::{
///     AdmissionConfig, DispatchOutcome, IngestionService, Metric, MetricBatch, MetricType,
///     NullSink, PoolConfig,
/// };
/// use std::sync::Arc;
///
/// let service = IngestionService::new(
///     AdmissionConfig::per_second(100),
///     PoolConfig::new(2, 64),
///     Arc::new(NullSink),
/// ).unwrap();
///
/// let batch = MetricBatch::new("host-1").with_metric(Metric::new("cpu", 0.42, MetricType::Gauge));
/// let outcome = service.dispatch("host-1", batch, |_batch| {
///     // persist the batch somewhere
///     Ok::<_, std::io::Error>(())
/// });
/// assert_eq!(outcome, DispatchOutcome::Accepted { metrics: 1 });
///
/// service.shutdown();
/// assert_eq!(service.stats().batches_processed, 1);
/// ```
pub struct IngestionService {
    controller: Arc<AdmissionController>,
    pool: WorkerPool,
    validator: MetricValidator,
    counters: Counters,
    lifecycle: Mutex<Lifecycle>,

    /// Held for the whole of [`shutdown`](IngestionService::shutdown).
    shutdown: Mutex<()>,
}

impl IngestionService {
    /// Builds a controller and a pool from their configurations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`](crate::Error::InvalidConfig) for an
    /// invalid configuration and [`Error::Spawn`](crate::Error::Spawn) if the
    /// workers cannot be started.
    pub fn new(
        admission: AdmissionConfig,
        pool: PoolConfig,
        sink: Arc<dyn MonitoringSink>,
    ) -> Result<Self> {
        let controller = Arc::new(AdmissionController::with_sink(admission, sink)?);
        Self::with_controller(controller, pool)
    }

    /// Wraps an existing controller.
    ///
    /// # Errors
    ///
    /// As for [`WorkerPool::new`].
    pub fn with_controller(controller: Arc<AdmissionController>, pool: PoolConfig) -> Result<Self> {
        let pool = WorkerPool::new(pool)?;

        Ok(Self {
            controller,
            pool,
            validator: MetricValidator::default(),
            counters: Counters::default(),
            lifecycle: Mutex::new(Lifecycle::default()),
            shutdown: Mutex::new(()),
        })
    }

    /// Replaces the default validator.
    pub fn with_validator(mut self, validator: MetricValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Client id for a request, falling back to [`DEFAULT_CLIENT_ID`].
    ///
    /// ```rust
    /// use metricstream::IngestionService;
    ///
    /// assert_eq!(IngestionService::client_id(Some("token-123")), "token-123");
    /// assert_eq!(IngestionService::client_id(None), "default");
    /// assert_eq!(IngestionService::client_id(Some("")), "default");
    /// ```
    pub fn client_id(credentials: Option<&str>) -> &str {
        match credentials {
            Some(id) if !id.is_empty() => id,
            _ => DEFAULT_CLIENT_ID,
        }
    }

    /// Admits, validates and queues one batch.
    ///
    /// `handler` runs on a pool worker with the batch. An `Err` it returns is
    /// logged there; the caller has already been answered by then.
    pub fn dispatch<H, E>(&self, client_id: &str, batch: MetricBatch, handler: H) -> DispatchOutcome
    where
        H: FnOnce(MetricBatch) -> std::result::Result<(), E> + Send + 'static,
        E: fmt::Display,
    {
        if !self.controller.allow_request(client_id) {
            self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
            return DispatchOutcome::RateLimited;
        }

        if let Err(err) = self.validator.validate_batch(&batch) {
            self.counters.validation_errors.fetch_add(1, Ordering::Relaxed);
            return DispatchOutcome::Invalid(err);
        }

        let metrics = batch.len();
        match self.pool.submit_fallible(move || handler(batch)) {
            Ok(()) => {
                self.counters
                    .metrics_received
                    .fetch_add(metrics as u64, Ordering::Relaxed);
                self.counters.batches_processed.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Accepted { metrics }
            }
            Err(reason) => {
                self.counters.overloaded.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Overloaded(reason)
            }
        }
    }

    /// Starts flushing telemetry every `interval`.
    ///
    /// A no-op if a flush thread is already running or the service has been
    /// shut down.
    ///
    /// # Errors
    ///
    /// [`Error::Spawn`](crate::Error::Spawn) if the thread cannot be created.
    pub fn start_flush_thread(&self, interval: Duration) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();

        if lifecycle.stopped {
            warn!("flush thread not started, service is shut down");
            return Ok(());
        }
        if lifecycle.flusher.is_some() {
            return Ok(());
        }

        lifecycle.flusher = Some(self.controller.clone().start_flush_thread(interval)?);
        Ok(())
    }

    /// Stops the flush thread, drains the pool, flushes one last time.
    ///
    /// Idempotent. Runs on drop. A concurrent second caller waits until the
    /// first has finished the final flush. Called from inside a handler, it
    /// only stops the pool accepting work and returns; the full sequence runs
    /// on the next call from outside the pool, or on drop.
    pub fn shutdown(&self) {
        if self.pool.is_worker_thread() {
            self.pool.shutdown();
            return;
        }

        let _exclusive = self.shutdown.lock();

        let flusher = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.stopped {
                return;
            }
            lifecycle.stopped = true;
            lifecycle.flusher.take()
        };

        if let Some((handle, stop_tx)) = flusher {
            let _ = stop_tx.send(());
            if handle.join().is_err() {
                error!("flush thread panicked");
            }
        }

        self.pool.shutdown();

        let report = self.controller.flush_metrics();
        info!(
            delivered = report.events_delivered,
            dropped = report.events_dropped,
            batches = self.counters.batches_processed.load(Ordering::Relaxed),
            "ingestion service stopped"
        );
    }

    /// Worst of the controller's health and the pool's.
    pub fn health(&self) -> HealthStatus {
        let admission = self.controller.metrics().health_status();
        let pool = self.pool.stats();

        let pool_health = if pool.state != PoolState::Running {
            HealthStatus::Critical
        } else if pool.is_saturated() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        match (admission, pool_health) {
            (HealthStatus::Critical, _) | (_, HealthStatus::Critical) => HealthStatus::Critical,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }

    /// Snapshot of the service counters.
    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            metrics_received: self.counters.metrics_received.load(Ordering::Relaxed),
            batches_processed: self.counters.batches_processed.load(Ordering::Relaxed),
            validation_errors: self.counters.validation_errors.load(Ordering::Relaxed),
            rate_limited: self.counters.rate_limited.load(Ordering::Relaxed),
            overloaded: self.counters.overloaded.load(Ordering::Relaxed),
        }
    }

    /// The admission controller.
    #[inline]
    pub fn controller(&self) -> &Arc<AdmissionController> {
        &self.controller
    }

    /// The worker pool.
    #[inline]
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }
}

impl Drop for IngestionService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for IngestionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionService")
            .field("controller", &self.controller)
            .field("pool", &self.pool)
            .field("stats", &self.stats())
            .finish()
    }
}
