use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{MetricsError, MetricsResult};

/// Oldest accepted measure time: one year before the library was first used.
///
/// Fixed when the first [`Client`](crate::Client) is created, or on the
/// first validation if that comes earlier. Older times fail with
/// [`MetricsError::InvalidMeasureTime`].
pub static MIN_MEASURE_TIME: Lazy<i64> =
    Lazy::new(|| chrono::Utc::now().timestamp() - 3600 * 24 * 365);

static METRIC_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9.:_\-]{1,255}$").expect("valid metric name pattern"));

/// Whether a measurement is a point-in-time value or an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }

    /// Key of this kind's array in a submitted batch.
    pub fn plural(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counters",
            MetricKind::Gauge => "gauges",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = MetricsError;

    fn from_str(s: &str) -> MetricsResult<Self> {
        match s {
            "counter" | "counters" => Ok(MetricKind::Counter),
            "gauge" | "gauges" => Ok(MetricKind::Gauge),
            other => Err(MetricsError::validation(format!(
                "unknown metric type '{other}', expected counter or gauge"
            ))),
        }
    }
}

/// One counter or gauge observation.
///
/// The kind is not serialized; it decides which array of the batch the entry
/// lands in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    #[serde(skip)]
    pub kind: MetricKind,
    pub name: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measure_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl Measurement {
    pub fn new(kind: MetricKind, name: impl Into<String>, value: f64) -> Self {
        Self {
            kind,
            name: name.into(),
            value,
            measure_time: None,
            source: None,
            tags: BTreeMap::new(),
        }
    }

    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self::new(MetricKind::Gauge, name, value)
    }

    pub fn counter(name: impl Into<String>, value: f64) -> Self {
        Self::new(MetricKind::Counter, name, value)
    }

    /// Build a measurement from a kind given by name, e.g. from configuration.
    pub fn parse(kind: &str, name: impl Into<String>, value: f64) -> MetricsResult<Self> {
        Ok(Self::new(kind.parse()?, name, value))
    }

    pub fn with_measure_time(mut self, epoch_secs: i64) -> Self {
        self.measure_time = Some(epoch_secs);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Checks the name, value and measure time.
    pub fn validate(&self) -> MetricsResult<()> {
        if self.name.is_empty() {
            return Err(MetricsError::validation("metric name can't be blank"));
        }
        if !METRIC_NAME.is_match(&self.name) {
            return Err(MetricsError::validation(format!(
                "invalid metric name '{}': use 1-255 of A-Za-z0-9.:-_",
                self.name
            )));
        }
        if !self.value.is_finite() {
            return Err(MetricsError::validation(format!(
                "value of '{}' must be a finite number",
                self.name
            )));
        }
        if let Some(measure_time) = self.measure_time {
            if measure_time < *MIN_MEASURE_TIME {
                return Err(MetricsError::InvalidMeasureTime {
                    measure_time,
                    min_measure_time: *MIN_MEASURE_TIME,
                });
            }
        }
        if self.tags.keys().any(|k| k.is_empty()) {
            return Err(MetricsError::validation(format!(
                "tags of '{}' contain an empty key",
                self.name
            )));
        }
        Ok(())
    }
}

/// Bare `(name, value)` pairs are gauges.
impl<S: Into<String>> From<(S, f64)> for Measurement {
    fn from((name, value): (S, f64)) -> Self {
        Measurement::gauge(name, value)
    }
}

impl<S: Into<String>> From<(S, i64)> for Measurement {
    fn from((name, value): (S, i64)) -> Self {
        Measurement::gauge(name, value as f64)
    }
}
