//! # Admission Metrics
//!
//! Point-in-time snapshot of an [`AdmissionController`](crate::AdmissionController),
//! with derived rates and a coarse health verdict.
//!
//! ```text
//!     Admission Dashboard:
//!     ┌─────────────────────────────────────┐
//!     │  Allow Rate: 92%                    │
//!     │  ▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓░░  (920/1000)   │
//!     │                                     │
//!     │  Telemetry Loss: 0.4%               │
//!     │  ░░░░░░░░░░░░░░░░░░░░  (4/1000)     │
//!     │                                     │
//!     │  Health: ✅ Healthy                 │
//!     └─────────────────────────────────────┘
//! ```

use std::fmt;

/// Denial ratio above which admission is considered under pressure.
const PRESSURE_DENIAL_RATE: f64 = 0.3;

/// Denial or telemetry-loss ratio above which the controller is critical.
const CRITICAL_RATE: f64 = 0.5;

/// Snapshot of admission and telemetry counters.
///
/// ## Key Metrics Explained
///
/// ### Admission
/// - **total_allowed** / **total_denied**: outcomes of `allow_request`
/// - **tracked_clients**: distinct client ids seen so far
///
/// ### Telemetry
/// - **flushes**: completed `flush_metrics` calls
/// - **events_delivered**: events the sink accepted
/// - **events_dropped**: events overwritten before any flush saw them
/// - **sink_failures**: events the sink returned an error for
///
/// ## Example Usage
///
/// ```rust
/// use metricstream::{AdmissionController, AdmissionConfig};
///
/// let controller = AdmissionController::new(AdmissionConfig::per_second(100)).unwrap();
/// controller.allow_request("a");
///
/// let metrics = controller.metrics();
/// assert_eq!(metrics.total_requests(), 1);
/// if metrics.health_status().is_unhealthy() {
///     println!("{}", metrics.summary());
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdmissionMetrics {
    /// Requests admitted.
    pub total_allowed: u64,

    /// Requests denied.
    pub total_denied: u64,

    /// Distinct clients with state in the controller.
    pub tracked_clients: usize,

    /// Completed flushes.
    pub flushes: u64,

    /// Events handed to the sink successfully.
    pub events_delivered: u64,

    /// Events lost to ring overwrite.
    pub events_dropped: u64,

    /// Events the sink failed to accept.
    pub sink_failures: u64,
}

impl AdmissionMetrics {
    /// Total admission checks performed.
    #[inline]
    pub fn total_requests(&self) -> u64 {
        self.total_allowed + self.total_denied
    }

    /// Fraction of requests admitted, `1.0` when nothing has been checked.
    #[inline]
    pub fn allow_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            1.0
        } else {
            self.total_allowed as f64 / total as f64
        }
    }

    /// Fraction of requests denied.
    #[inline]
    pub fn denial_rate(&self) -> f64 {
        1.0 - self.allow_rate()
    }

    /// Events that left a ring, whether or not the sink took them.
    #[inline]
    pub fn events_harvested(&self) -> u64 {
        self.events_delivered + self.sink_failures
    }

    /// Fraction of recorded events that never reached the sink.
    #[inline]
    pub fn telemetry_loss_rate(&self) -> f64 {
        let lost = self.events_dropped + self.sink_failures;
        let total = self.events_delivered + lost;
        if total == 0 {
            0.0
        } else {
            lost as f64 / total as f64
        }
    }

    /// More than 30% of requests are being denied.
    #[inline]
    pub fn is_under_pressure(&self) -> bool {
        self.denial_rate() > PRESSURE_DENIAL_RATE
    }

    /// Some telemetry has been lost, to overwrite or to the sink.
    #[inline]
    pub fn is_losing_telemetry(&self) -> bool {
        self.events_dropped > 0 || self.sink_failures > 0
    }

    /// Coarse health verdict.
    ///
    /// - **Critical**: more than half of requests denied, or more than half
    ///   of telemetry lost
    /// - **Degraded**: under pressure, or losing any telemetry
    /// - **Healthy**: otherwise
    pub fn health_status(&self) -> HealthStatus {
        if self.denial_rate() > CRITICAL_RATE || self.telemetry_loss_rate() > CRITICAL_RATE {
            HealthStatus::Critical
        } else if self.is_under_pressure() || self.is_losing_telemetry() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Human-readable multi-line report.
    ///
    /// # Example Output
    ///
    /// ```text
    /// Admission Metrics:
    /// ├─ Admission:
    /// │  ├─ Allow Rate: 92.00%
    /// │  ├─ Denial Rate: 8.00%
    /// │  └─ Tracked Clients: 12
    /// ├─ Telemetry:
    /// │  ├─ Flushes: 40
    /// │  ├─ Delivered: 996
    /// │  ├─ Dropped: 4
    /// │  ├─ Sink Failures: 0
    /// │  └─ Loss Rate: 0.40%
    /// └─ Health:
    ///    └─ Status: Degraded
    /// ```
    pub fn summary(&self) -> String {
        format!(
            "Admission Metrics:\n\
             ├─ Admission:\n\
             │  ├─ Allow Rate: {:.2}%\n\
             │  ├─ Denial Rate: {:.2}%\n\
             │  ├─ Total Allowed: {}\n\
             │  ├─ Total Denied: {}\n\
             │  └─ Tracked Clients: {}\n\
             ├─ Telemetry:\n\
             │  ├─ Flushes: {}\n\
             │  ├─ Delivered: {}\n\
             │  ├─ Dropped: {}\n\
             │  ├─ Sink Failures: {}\n\
             │  └─ Loss Rate: {:.2}%\n\
             └─ Health:\n\
                └─ Status: {:?}",
            self.allow_rate() * 100.0,
            self.denial_rate() * 100.0,
            self.total_allowed,
            self.total_denied,
            self.tracked_clients,
            self.flushes,
            self.events_delivered,
            self.events_dropped,
            self.sink_failures,
            self.telemetry_loss_rate() * 100.0,
            self.health_status(),
        )
    }
}

impl fmt::Display for AdmissionMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

/// Three-level health assessment.
///
/// ```text
///     Healthy ──────► admitting most traffic, telemetry intact
///        │
///     Degraded ─────► noticeable denials or some telemetry lost
///        │
///     Critical ─────► mostly denying, or telemetry mostly lost
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Operating normally.
    Healthy,

    /// Functional, but denying noticeably or losing telemetry.
    Degraded,

    /// Needs intervention.
    Critical,
}

impl HealthStatus {
    /// `true` for anything but [`Healthy`](Self::Healthy).
    pub fn is_unhealthy(&self) -> bool {
        !matches!(self, Self::Healthy)
    }

    /// Operator guidance for this status.
    pub fn suggested_action(&self) -> &'static str {
        match self {
            Self::Healthy => "No action needed",
            Self::Degraded => "Monitor closely, consider raising limits or flushing more often",
            Self::Critical => "Immediate action required: reduce load or fix the monitoring sink",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "✅ Healthy"),
            Self::Degraded => write!(f, "⚠️ Degraded"),
            Self::Critical => write!(f, "🔴 Critical"),
        }
    }
}
