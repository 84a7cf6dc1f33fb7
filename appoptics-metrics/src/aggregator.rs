use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use serde::Serialize;

use crate::error::MetricsResult;
use crate::measurement::{MetricKind, Measurement};

/// Aggregated measurements sent in one request.
///
/// Empty arrays and unset batch-level fields are omitted from the JSON body.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Batch {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gauges: Vec<Measurement>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub counters: Vec<Measurement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measure_time: Option<i64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl Batch {
    /// Number of entries across both arrays.
    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty() && self.counters.is_empty()
    }

    /// The entry recorded for `name` of the given kind, if any.
    pub fn get(&self, kind: MetricKind, name: &str) -> Option<&Measurement> {
        let entries = match kind {
            MetricKind::Gauge => &self.gauges,
            MetricKind::Counter => &self.counters,
        };
        entries.iter().find(|m| m.name == name)
    }

    /// Serialized request body.
    pub fn to_body(&self) -> MetricsResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Split into batches of at most `per_request` entries.
    ///
    /// Gauges are emitted before counters; batch-level fields are copied into
    /// every chunk. A `per_request` of zero yields the batch unchanged.
    pub fn chunks(&self, per_request: usize) -> Vec<Batch> {
        if per_request == 0 || self.len() <= per_request {
            return vec![self.clone()];
        }

        let mut chunks = Vec::new();
        let mut current = self.empty_like();
        let entries = self
            .gauges
            .iter()
            .chain(self.counters.iter())
            .cloned();

        for measurement in entries {
            current.push(measurement);
            if current.len() == per_request {
                chunks.push(std::mem::replace(&mut current, self.empty_like()));
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }

    pub(crate) fn empty_like(&self) -> Batch {
        Batch {
            source: self.source.clone(),
            measure_time: self.measure_time,
            tags: self.tags.clone(),
            ..Batch::default()
        }
    }

    fn push(&mut self, measurement: Measurement) {
        match measurement.kind {
            MetricKind::Gauge => self.gauges.push(measurement),
            MetricKind::Counter => self.counters.push(measurement),
        }
    }
}

/// Merges repeated measurements of the same (kind, name).
///
/// Gauges keep the last value seen; counters are summed. The merged entry
/// takes source, tags and measure time from the last measurement merged into
/// it. Entries stay in the order their name first appeared, so identical
/// input always produces an identical body.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aggregator;

impl Aggregator {
    /// Validate every measurement, then merge them into a batch.
    ///
    /// Nothing is merged unless all measurements are valid.
    pub fn aggregate(measurements: &[Measurement]) -> MetricsResult<Batch> {
        Self::aggregate_with_origins(measurements).map(|(batch, _)| batch)
    }

    /// Like [`Aggregator::aggregate`], also returning for every batch entry
    /// the input indices merged into it.
    ///
    /// Origins follow the batch's send order: gauges, then counters. This is
    /// the order [`Batch::chunks`] splits in.
    pub fn aggregate_with_origins(
        measurements: &[Measurement],
    ) -> MetricsResult<(Batch, Vec<Vec<usize>>)> {
        for measurement in measurements {
            measurement.validate()?;
        }

        let mut merged: Vec<(Measurement, Vec<usize>)> = Vec::with_capacity(measurements.len());
        let mut index: HashMap<(MetricKind, &str), usize> = HashMap::new();

        for (position, measurement) in measurements.iter().enumerate() {
            match index.get(&(measurement.kind, measurement.name.as_str())) {
                Some(&slot) => {
                    let (existing, origins) = &mut merged[slot];
                    let value = match measurement.kind {
                        MetricKind::Gauge => measurement.value,
                        MetricKind::Counter => existing.value + measurement.value,
                    };
                    *existing = measurement.clone();
                    existing.value = value;
                    origins.push(position);
                }
                None => {
                    index.insert((measurement.kind, measurement.name.as_str()), merged.len());
                    merged.push((measurement.clone(), vec![position]));
                }
            }
        }

        let mut batch = Batch::default();
        let mut gauge_origins = Vec::new();
        let mut counter_origins = Vec::new();
        for (measurement, origins) in merged {
            match measurement.kind {
                MetricKind::Gauge => gauge_origins.push(origins),
                MetricKind::Counter => counter_origins.push(origins),
            }
            batch.push(measurement);
        }
        gauge_origins.extend(counter_origins);
        Ok((batch, gauge_origins))
    }
}
