//! # Error Types
//!
//! Nothing in the admission path or the worker pool is fatal. A denied request
//! is a plain `false`, and a full queue is a [`Rejection`], not an error. The
//! types here cover the few places where something can genuinely go wrong:
//!
//! ```text
//!     Error ──────────► construction: bad config, thread spawn failure
//!     SinkError ──────► monitoring sink refused an event (logged, swallowed)
//!     ValidationError ► an inbound metric batch is malformed
//!     Rejection ──────► why the pool said "no" (backpressure signal)
//! ```

use std::io;

/// Convenience alias used by constructors throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Construction-time failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A configuration value failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// The OS refused to spawn a worker or background thread.
    #[error("failed to spawn thread `{name}`: {source}")]
    Spawn {
        /// Name the thread would have carried.
        name: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
}

/// Failure reported by a [`MonitoringSink`](crate::MonitoringSink).
///
/// The flush path never propagates these. It counts them and moves on to the
/// next event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The sink is temporarily unable to accept events.
    #[error("monitoring sink unavailable: {0}")]
    Unavailable(String),

    /// The sink rejected this particular event.
    #[error("monitoring sink rejected event: {0}")]
    Rejected(String),
}

/// Reasons a metric batch fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The batch carries no metrics.
    #[error("batch cannot be empty")]
    EmptyBatch,

    /// The batch exceeds the per-request metric limit.
    #[error("batch size {size} exceeds maximum ({max} metrics)")]
    BatchTooLarge {
        /// Number of metrics submitted.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Metric name is empty.
    #[error("metric name cannot be empty")]
    EmptyName,

    /// Metric name is longer than allowed.
    #[error("metric name too long ({len} bytes, max {max})")]
    NameTooLong {
        /// Actual length in bytes.
        len: usize,
        /// Maximum length in bytes.
        max: usize,
    },

    /// Metric value is NaN or infinite.
    #[error("metric value must be a finite number")]
    NonFiniteValue,

    /// One metric inside a batch failed validation.
    #[error("invalid metric at index {index}: {reason}")]
    InvalidMetric {
        /// Position of the offending metric within the batch.
        index: usize,
        /// What was wrong with it.
        reason: Box<ValidationError>,
    },
}

/// Why [`WorkerPool::submit`](crate::WorkerPool::submit) refused a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// The queue is at `max_queue_size`.
    #[error("work queue is full")]
    QueueFull,

    /// The pool has begun shutting down and accepts nothing new.
    #[error("worker pool is shutting down")]
    ShuttingDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("window must be greater than zero");
        assert_eq!(
            err.to_string(),
            "invalid configuration: window must be greater than zero"
        );

        let err = Error::Spawn {
            name: "metricstream-worker-0".into(),
            source: io::Error::new(io::ErrorKind::Other, "no threads left"),
        };
        assert!(err.to_string().contains("metricstream-worker-0"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_nested_validation_error() {
        let err = ValidationError::InvalidMetric {
            index: 3,
            reason: Box::new(ValidationError::NonFiniteValue),
        };
        assert_eq!(
            err.to_string(),
            "invalid metric at index 3: metric value must be a finite number"
        );
    }

    #[test]
    fn test_rejection_display() {
        assert_eq!(Rejection::QueueFull.to_string(), "work queue is full");
        assert!(Rejection::ShuttingDown.to_string().contains("shutting down"));
    }
}
