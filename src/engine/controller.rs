//! # Admission Controller
//!
//! Per-client sliding-window admission with a lossy decision log that a
//! background flush ships to a [`MonitoringSink`].
//!
//! ## Architecture
//!
//! ```text
//!     allow_request("a") ──┐
//!     allow_request("b") ──┼──► client index ──► ClientState
//!     allow_request("a") ──┘     (DashMap)       ┌──────────────────────┐
//!                                                │ window:    Mutex     │ ◄── lock A
//!                                                │ telemetry: ring      │ ◄── lock B (writers)
//!                                                └──────────────────────┘      lock C (drain)
//!
//!     flush_metrics() ──► snapshot index ──► for each client: drain (lock C)
//!                                                              └─► sink.send(...)
//! ```
//!
//! ## Lock Discipline
//!
//! No code path holds two of these at once:
//!
//! ```text
//!     allow_request:  [index shard] ─ release ─ [A: admit] ─ release ─ [B: record]
//!     flush_metrics:  [index shards] ─ release ─ [C: drain] ─ release ─ sink
//! ```
//!
//! Admission and flush therefore share no lock at all, and two flushes only
//! ever wait on each other for the time it takes to drain one client.

use super::{
    config::AdmissionConfig,
    error::{Error, Result},
    metrics::AdmissionMetrics,
    sink::{LogSink, MonitoringSink},
    telemetry::{DecisionEvent, TelemetryRing},
    utils::{panic_message, CacheAligned, Clock, MonotonicClock},
    window::RequestWindow,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Initial capacity of the client index.
const INITIAL_CLIENT_CAPACITY: usize = 1024;

/// Upper bound on client index shards.
const MAX_SHARDS: usize = 64;

/// Name given to the background flush thread.
const FLUSH_THREAD_NAME: &str = "metricstream-flush";

/// Everything the controller keeps for one client.
///
/// The window and the ring are guarded independently.
struct ClientState {
    window: Mutex<RequestWindow>,
    telemetry: TelemetryRing,
}

impl ClientState {
    fn new(config: &AdmissionConfig) -> Self {
        Self {
            window: Mutex::new(RequestWindow::with_capacity(config.max_requests_per_second)),
            telemetry: TelemetryRing::with_capacity(config.telemetry_capacity),
        }
    }
}

/// Outcome of one [`AdmissionController::flush_metrics`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Clients that had anything to harvest.
    pub clients_drained: usize,
    /// Events the sink accepted.
    pub events_delivered: u64,
    /// Events overwritten before this flush reached them.
    pub events_dropped: u64,
    /// Events the sink returned an error for.
    pub sink_failures: u64,
}

impl FlushReport {
    /// Events taken out of the rings, delivered or not.
    #[inline]
    pub fn events_harvested(&self) -> u64 {
        self.events_delivered + self.sink_failures
    }
}

/// Sliding-window admission controller with per-client decision telemetry.
///
/// ## Usage
///
/// ```rust
/// use metricstream::{AdmissionController, AdmissionConfig};
///
/// let controller = AdmissionController::new(AdmissionConfig::per_second(5)).unwrap();
///
/// for _ in 0..5 {
///     assert!(controller.allow_request("client-a"));
/// }
/// assert!(!controller.allow_request("client-a"));
///
/// // Other clients are unaffected
/// assert!(controller.allow_request("client-b"));
/// ```
///
/// ## Sharing
///
/// Every method takes `&self`. Wrap the controller in an `Arc` to share it
/// between request threads and the flush scheduler.
pub struct AdmissionController {
    /// Client id to per-client state. Entries are never removed.
    clients: DashMap<Arc<str>, Arc<ClientState>, ahash::RandomState>,

    config: AdmissionConfig,

    /// `config.window` in nanoseconds, computed once.
    window_ns: u64,

    sink: Arc<dyn MonitoringSink>,

    clock: Arc<dyn Clock>,

    // Hot counters, written on every admission check
    total_allowed: CacheAligned<AtomicU64>,
    total_denied: CacheAligned<AtomicU64>,

    // Flush counters
    flushes: AtomicU64,
    events_delivered: AtomicU64,
    events_dropped: AtomicU64,
    sink_failures: AtomicU64,
}

impl AdmissionController {
    /// Creates a controller that logs decisions through [`LogSink`] and reads
    /// time from a [`MonotonicClock`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` fails validation.
    pub fn new(config: AdmissionConfig) -> Result<Self> {
        Self::with_parts(config, Arc::new(LogSink), Arc::new(MonotonicClock::new()))
    }

    /// Creates a controller delivering to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` fails validation.
    pub fn with_sink(config: AdmissionConfig, sink: Arc<dyn MonitoringSink>) -> Result<Self> {
        Self::with_parts(config, sink, Arc::new(MonotonicClock::new()))
    }

    /// Creates a controller with an explicit sink and clock.
    ///
    /// ```rust
    /// use metricstream::{AdmissionController, AdmissionConfig, ManualClock, NullSink};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let clock = Arc::new(ManualClock::new());
    /// let controller = AdmissionController::with_parts(
    ///     AdmissionConfig::per_second(1),
    ///     Arc::new(NullSink),
    ///     clock.clone(),
    /// ).unwrap();
    ///
    /// assert!(controller.allow_request("a"));
    /// assert!(!controller.allow_request("a"));
    /// clock.advance(Duration::from_secs(1));
    /// assert!(controller.allow_request("a"));
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` fails validation.
    pub fn with_parts(
        config: AdmissionConfig,
        sink: Arc<dyn MonitoringSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        // dashmap requires a power of two greater than one
        let shards = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(8)
            .saturating_mul(4)
            .next_power_of_two()
            .clamp(4, MAX_SHARDS);

        Ok(Self {
            clients: DashMap::with_capacity_and_hasher_and_shard_amount(
                INITIAL_CLIENT_CAPACITY,
                ahash::RandomState::new(),
                shards,
            ),
            window_ns: config.window_ns(),
            config,
            sink,
            clock,
            total_allowed: CacheAligned::new(AtomicU64::new(0)),
            total_denied: CacheAligned::new(AtomicU64::new(0)),
            flushes: AtomicU64::new(0),
            events_delivered: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
        })
    }

    /// Looks up a client's state, creating it on first sight.
    ///
    /// Concurrent first touches of the same id create exactly one state.
    #[inline]
    fn client_state(&self, client_id: &str) -> Arc<ClientState> {
        // Fast path: existing client, shard read lock only
        if let Some(state) = self.clients.get(client_id) {
            return state.value().clone();
        }

        self.clients
            .entry(Arc::from(client_id))
            .or_insert_with(|| {
                debug!(client = client_id, "tracking new client");
                Arc::new(ClientState::new(&self.config))
            })
            .value()
            .clone()
    }

    /// Decides whether to admit a request from `client_id`.
    ///
    /// Returns `true` if fewer than `max_requests_per_second` requests were
    /// admitted for this client within the trailing window. Either way the
    /// decision is appended to the client's telemetry ring.
    ///
    /// Two calls for the same client are strictly ordered by the client's
    /// window lock; calls for different clients never contend beyond the
    /// index shard.
    #[inline]
    pub fn allow_request(&self, client_id: &str) -> bool {
        let state = self.client_state(client_id);

        // Clock is read under the lock so each window sees non-decreasing time
        let (allowed, now_ns) = {
            let mut window = state.window.lock();
            let now_ns = self.clock.now_ns();
            let allowed = window.admit(now_ns, self.config.max_requests_per_second, self.window_ns);
            (allowed, now_ns)
        };

        state.telemetry.record(DecisionEvent::new(now_ns, allowed));

        if allowed {
            self.total_allowed.value.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_denied.value.fetch_add(1, Ordering::Relaxed);
        }

        allowed
    }

    /// Harvests every client's telemetry and hands each event to the sink.
    ///
    /// Safe to call from any number of threads at once and concurrently with
    /// [`allow_request`](Self::allow_request). Sink errors and sink panics are
    /// logged and counted as failures; an event is never offered to the sink
    /// twice.
    pub fn flush_metrics(&self) -> FlushReport {
        // Snapshot the index so no shard lock is held while draining
        let clients: Vec<(Arc<str>, Arc<ClientState>)> = self
            .clients
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut report = FlushReport::default();

        for (client_id, state) in clients {
            let drained = state.telemetry.drain();
            if drained.is_empty() {
                continue;
            }
            report.clients_drained += 1;

            if drained.dropped > 0 {
                warn!(
                    client = &*client_id,
                    dropped = drained.dropped,
                    capacity = state.telemetry.capacity(),
                    "telemetry overwritten before flush"
                );
                report.events_dropped += drained.dropped;
            }

            let mut failures = 0u64;
            let mut last_error = None;
            for event in drained.events {
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| self.sink.send(&client_id, event)));
                match outcome {
                    Ok(Ok(())) => report.events_delivered += 1,
                    Ok(Err(err)) => {
                        failures += 1;
                        last_error = Some(err);
                    }
                    Err(payload) => {
                        failures += 1;
                        error!(
                            client = &*client_id,
                            panic = panic_message(&*payload),
                            "monitoring sink panicked"
                        );
                    }
                }
            }

            if let Some(err) = last_error {
                warn!(
                    client = &*client_id,
                    failures,
                    error = %err,
                    "monitoring sink rejected events"
                );
            }
            report.sink_failures += failures;
        }

        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.events_delivered
            .fetch_add(report.events_delivered, Ordering::Relaxed);
        self.events_dropped
            .fetch_add(report.events_dropped, Ordering::Relaxed);
        self.sink_failures
            .fetch_add(report.sink_failures, Ordering::Relaxed);

        if report.clients_drained > 0 {
            debug!(
                clients = report.clients_drained,
                delivered = report.events_delivered,
                dropped = report.events_dropped,
                failed = report.sink_failures,
                "flushed telemetry"
            );
        }

        report
    }

    /// Starts a background thread calling [`flush_metrics`](Self::flush_metrics)
    /// every `interval`.
    ///
    /// Send on (or drop) the returned sender to stop it, then join the handle.
    ///
    /// ```rust
    /// use metricstream::{AdmissionController, AdmissionConfig, NullSink};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let controller = Arc::new(
    ///     AdmissionController::with_sink(AdmissionConfig::default(), Arc::new(NullSink)).unwrap(),
    /// );
    /// let (handle, stop_tx) = controller
    ///     .clone()
    ///     .start_flush_thread(Duration::from_millis(50))
    ///     .unwrap();
    ///
    /// controller.allow_request("a");
    ///
    /// stop_tx.send(()).unwrap();
    /// handle.join().unwrap();
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] if the thread cannot be created.
    pub fn start_flush_thread(
        self: Arc<Self>,
        interval: Duration,
    ) -> Result<(thread::JoinHandle<()>, mpsc::Sender<()>)> {
        let (stop_tx, stop_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name(FLUSH_THREAD_NAME.to_string())
            .spawn(move || {
                info!(interval_ms = interval.as_millis() as u64, "flush thread started");

                loop {
                    match stop_rx.recv_timeout(interval) {
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                            info!("flush thread stopping");
                            break;
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            self.flush_metrics();
                        }
                    }
                }
            })
            .map_err(|source| Error::Spawn {
                name: FLUSH_THREAD_NAME.to_string(),
                source,
            })?;

        Ok((handle, stop_tx))
    }

    /// Events recorded for `client_id` and not yet flushed.
    ///
    /// Zero for a client never seen. Does not create state.
    pub fn pending_events(&self, client_id: &str) -> usize {
        self.clients
            .get(client_id)
            .map(|state| state.value().telemetry.pending())
            .unwrap_or(0)
    }

    /// Accepted requests currently counted in `client_id`'s window.
    ///
    /// Entries are pruned lazily, so this may include expired timestamps until
    /// the client's next request.
    pub fn window_len(&self, client_id: &str) -> usize {
        self.clients
            .get(client_id)
            .map(|state| state.value().clone())
            .map(|state| state.window.lock().len())
            .unwrap_or(0)
    }

    /// Distinct clients seen so far.
    #[inline]
    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    /// Configuration this controller was built with.
    #[inline]
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Snapshot of admission and telemetry counters.
    pub fn metrics(&self) -> AdmissionMetrics {
        AdmissionMetrics {
            total_allowed: self.total_allowed.value.load(Ordering::Relaxed),
            total_denied: self.total_denied.value.load(Ordering::Relaxed),
            tracked_clients: self.tracked_clients(),
            flushes: self.flushes.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("max_requests_per_second", &self.config.max_requests_per_second)
            .field("window", &self.config.window)
            .field("telemetry_capacity", &self.config.telemetry_capacity)
            .field("tracked_clients", &self.tracked_clients())
            .finish()
    }
}
