//! # Monitoring Sinks
//!
//! Destination for decision events harvested by
//! [`flush_metrics`](crate::AdmissionController::flush_metrics). The controller
//! hands each event off exactly once and never retries:
//!
//! ```text
//!     flush_metrics ──► drain ring ──► sink.send(client, event)
//!                                          │
//!                                          ├─ Ok  ──► delivered
//!                                          └─ Err ──► warn!, counted, next event
//! ```
//!
//! Any `Fn(&str, DecisionEvent) -> Result<(), SinkError>` closure is a sink,
//! so ad-hoc destinations need no new type.

use super::error::SinkError;
use super::telemetry::DecisionEvent;
use parking_lot::Mutex;
use tracing::info;

/// Receives decision events drained from the telemetry rings.
///
/// Called from whichever thread runs the flush, never while a ring or window
/// lock is held. Implementations may block, but a slow sink only delays the
/// flush that is calling it.
pub trait MonitoringSink: Send + Sync {
    /// Delivers one event. Errors are logged and counted by the caller.
    fn send(&self, client_id: &str, event: DecisionEvent) -> Result<(), SinkError>;
}

impl<F> MonitoringSink for F
where
    F: Fn(&str, DecisionEvent) -> Result<(), SinkError> + Send + Sync,
{
    #[inline]
    fn send(&self, client_id: &str, event: DecisionEvent) -> Result<(), SinkError> {
        self(client_id, event)
    }
}

/// Emits every event as a structured `tracing` record at `INFO`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl MonitoringSink for LogSink {
    fn send(&self, client_id: &str, event: DecisionEvent) -> Result<(), SinkError> {
        info!(
            target: "metricstream::monitoring",
            client = client_id,
            timestamp_ns = event.timestamp_ns,
            allowed = event.allowed,
            "admission decision"
        );
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl MonitoringSink for NullSink {
    #[inline]
    fn send(&self, _client_id: &str, _event: DecisionEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Keeps every event in memory. Handy in tests and demos.
///
/// ```rust
/// use metricstream::{AdmissionController, AdmissionConfig, MemorySink};
/// use std::sync::Arc;
///
/// let sink = Arc::new(MemorySink::new());
/// let controller = AdmissionController::with_sink(AdmissionConfig::per_second(1), sink.clone()).unwrap();
///
/// controller.allow_request("a");
/// controller.allow_request("a");
/// controller.flush_metrics();
///
/// let events = sink.events_for("a");
/// assert_eq!(events.len(), 2);
/// assert!(events[0].allowed);
/// assert!(!events[1].allowed);
/// ```
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<(String, DecisionEvent)>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events received so far.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// `true` if nothing has been received.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Events received for one client, in delivery order.
    pub fn events_for(&self, client_id: &str) -> Vec<DecisionEvent> {
        self.events
            .lock()
            .iter()
            .filter(|(client, _)| client == client_id)
            .map(|(_, event)| *event)
            .collect()
    }

    /// Removes and returns everything received so far.
    pub fn take(&self) -> Vec<(String, DecisionEvent)> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl MonitoringSink for MemorySink {
    fn send(&self, client_id: &str, event: DecisionEvent) -> Result<(), SinkError> {
        self.events.lock().push((client_id.to_owned(), event));
        Ok(())
    }
}
