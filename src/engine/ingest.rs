//! # Metric Ingestion Model
//!
//! The payload an admitted request carries, and the checks it has to pass
//! before it is handed to the worker pool.
//!
//! ```text
//!     MetricBatch { source_id, received_at }
//!       ├─ Metric { name, value, kind, tags, timestamp }
//!       ├─ Metric { ... }
//!       └─ ...                     ≤ 1000 metrics
//!
//!     MetricValidator:
//!       batch non-empty, ≤ max_batch_size
//!       name non-empty, ≤ max_name_len bytes
//!       value finite
//! ```

use super::error::ValidationError;
use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

/// Longest metric name accepted, in bytes.
pub const MAX_METRIC_NAME_LEN: usize = 255;

/// Most metrics accepted in one batch.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Kind of a metric sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MetricType {
    /// Monotonic count.
    Counter,
    /// Point-in-time value.
    #[default]
    Gauge,
    /// Bucketed distribution.
    Histogram,
    /// Quantile summary.
    Summary,
}

impl MetricType {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
            Self::Summary => "summary",
        }
    }

    /// Parses a wire name. Anything unrecognised is a gauge.
    ///
    /// ```rust
    /// use metricstream::MetricType;
    ///
    /// assert_eq!(MetricType::parse("counter"), MetricType::Counter);
    /// assert_eq!(MetricType::parse("temperature"), MetricType::Gauge);
    /// ```
    pub fn parse(name: &str) -> Self {
        match name {
            "counter" => Self::Counter,
            "histogram" => Self::Histogram,
            "summary" => Self::Summary,
            _ => Self::Gauge,
        }
    }
}

impl From<&str> for MetricType {
    fn from(name: &str) -> Self {
        Self::parse(name)
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    /// Metric name, e.g. `http.requests`.
    pub name: String,
    /// Sample value. Must be finite to pass validation.
    pub value: f64,
    /// Sample kind.
    pub kind: MetricType,
    /// Free-form dimensions.
    pub tags: HashMap<String, String>,
    /// When the sample was taken (wall clock).
    pub timestamp: SystemTime,
}

impl Metric {
    /// Creates an untagged metric stamped with the current wall-clock time.
    pub fn new(name: impl Into<String>, value: f64, kind: MetricType) -> Self {
        Self {
            name: name.into(),
            value,
            kind,
            tags: HashMap::new(),
            timestamp: SystemTime::now(),
        }
    }

    /// Adds a tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Overrides the sample time.
    pub fn at(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Metrics submitted together by one source.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricBatch {
    /// Samples in submission order.
    pub metrics: Vec<Metric>,
    /// Identifier of the submitting source.
    pub source_id: String,
    /// When the batch arrived (wall clock).
    pub received_at: SystemTime,
}

impl MetricBatch {
    /// Creates an empty batch received now.
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            metrics: Vec::new(),
            source_id: source_id.into(),
            received_at: SystemTime::now(),
        }
    }

    /// Appends a metric.
    pub fn push(&mut self, metric: Metric) {
        self.metrics.push(metric);
    }

    /// Builder form of [`push`](Self::push).
    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.push(metric);
        self
    }

    /// Number of metrics.
    #[inline]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// `true` if the batch carries no metrics.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Iterates over the metrics.
    pub fn iter(&self) -> std::slice::Iter<'_, Metric> {
        self.metrics.iter()
    }
}

impl<'a> IntoIterator for &'a MetricBatch {
    type Item = &'a Metric;
    type IntoIter = std::slice::Iter<'a, Metric>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Structural checks on inbound metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricValidator {
    /// Longest accepted name, in bytes.
    pub max_name_len: usize,
    /// Most metrics accepted per batch.
    pub max_batch_size: usize,
}

impl Default for MetricValidator {
    fn default() -> Self {
        Self {
            max_name_len: MAX_METRIC_NAME_LEN,
            max_batch_size: MAX_BATCH_SIZE,
        }
    }
}

impl MetricValidator {
    /// Checks one metric.
    ///
    /// # Errors
    ///
    /// [`ValidationError::EmptyName`], [`ValidationError::NameTooLong`] or
    /// [`ValidationError::NonFiniteValue`], in that order of precedence.
    pub fn validate_metric(&self, metric: &Metric) -> Result<(), ValidationError> {
        if metric.name.is_empty() {
            return Err(ValidationError::EmptyName);
        }

        if metric.name.len() > self.max_name_len {
            return Err(ValidationError::NameTooLong {
                len: metric.name.len(),
                max: self.max_name_len,
            });
        }

        if !metric.value.is_finite() {
            return Err(ValidationError::NonFiniteValue);
        }

        Ok(())
    }

    /// Checks a batch and every metric in it.
    ///
    /// ```rust
    /// use metricstream::{Metric, MetricBatch, MetricType, MetricValidator, ValidationError};
    ///
    /// let validator = MetricValidator::default();
    /// let batch = MetricBatch::new("host-1")
    ///     .with_metric(Metric::new("cpu", 0.5, MetricType::Gauge))
    ///     .with_metric(Metric::new("", 1.0, MetricType::Counter));
    ///
    /// assert_eq!(
    ///     validator.validate_batch(&batch),
    ///     Err(ValidationError::InvalidMetric {
    ///         index: 1,
    ///         reason: Box::new(ValidationError::EmptyName),
    ///     })
    /// );
    /// ```
    ///
    /// # Errors
    ///
    /// [`ValidationError::EmptyBatch`], [`ValidationError::BatchTooLarge`], or
    /// [`ValidationError::InvalidMetric`] for the first bad metric.
    pub fn validate_batch(&self, batch: &MetricBatch) -> Result<(), ValidationError> {
        if batch.is_empty() {
            return Err(ValidationError::EmptyBatch);
        }

        if batch.len() > self.max_batch_size {
            return Err(ValidationError::BatchTooLarge {
                size: batch.len(),
                max: self.max_batch_size,
            });
        }

        for (index, metric) in batch.iter().enumerate() {
            self.validate_metric(metric)
                .map_err(|reason| ValidationError::InvalidMetric {
                    index,
                    reason: Box::new(reason),
                })?;
        }

        Ok(())
    }
}
