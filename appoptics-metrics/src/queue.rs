use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::aggregator::{Aggregator, Batch};
use crate::client::Client;
use crate::error::MetricsResult;
use crate::global;
use crate::measurement::{MetricKind, Measurement};
use crate::persistence::{Persister, MAX_MEASUREMENTS_PER_REQUEST};

/// Options for a [`Queue`].
#[derive(Debug, Clone)]
pub struct QueueOptions {
    client: Option<Client>,
    prefix: Option<String>,
    source: Option<String>,
    tags: BTreeMap<String, String>,
    skip_measurement_times: bool,
    autosubmit_count: Option<usize>,
    autosubmit_interval: Option<Duration>,
    per_request: usize,
    clear_failures: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            client: None,
            prefix: None,
            source: None,
            tags: BTreeMap::new(),
            skip_measurement_times: false,
            autosubmit_count: None,
            autosubmit_interval: None,
            per_request: MAX_MEASUREMENTS_PER_REQUEST,
            clear_failures: false,
        }
    }
}

impl QueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client used for submission. Without one the global client is used.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Prefix added to every metric name as `prefix.name`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Default source for the whole batch.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Default tag for the whole batch.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Leave measure times unset instead of stamping them at `add`.
    pub fn with_skip_measurement_times(mut self, skip: bool) -> Self {
        self.skip_measurement_times = skip;
        self
    }

    pub fn with_autosubmit_count(mut self, count: usize) -> Self {
        self.autosubmit_count = Some(count);
        self
    }

    pub fn with_autosubmit_interval(mut self, interval: Duration) -> Self {
        self.autosubmit_interval = Some(interval);
        self
    }

    /// Maximum measurements per request; 0 sends everything at once.
    pub fn with_per_request(mut self, per_request: usize) -> Self {
        self.per_request = per_request;
        self
    }

    /// Discard pending measurements when a submit fails.
    pub fn with_clear_failures(mut self, clear: bool) -> Self {
        self.clear_failures = clear;
        self
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn per_request(&self) -> usize {
        self.per_request
    }

    pub fn autosubmit_count(&self) -> Option<usize> {
        self.autosubmit_count
    }
}

#[derive(Debug)]
struct Queued {
    seq: u64,
    measurement: Measurement,
}

#[derive(Debug, Default)]
struct Pending {
    next_seq: u64,
    entries: Vec<Queued>,
}

impl Pending {
    fn push(&mut self, measurement: Measurement) {
        self.entries.push(Queued {
            seq: self.next_seq,
            measurement,
        });
        self.next_seq += 1;
    }

    fn remove(&mut self, seqs: &HashSet<u64>) {
        self.entries.retain(|queued| !seqs.contains(&queued.seq));
    }

    fn snapshot(&self) -> (Vec<u64>, Vec<Measurement>) {
        self.entries
            .iter()
            .map(|q| (q.seq, q.measurement.clone()))
            .unzip()
    }

    fn measurements(&self) -> Vec<Measurement> {
        self.entries.iter().map(|q| q.measurement.clone()).collect()
    }
}

/// Buffer of measurements submitted together.
///
/// `add` only touches memory. `submit` sends a snapshot of what is pending;
/// on success exactly that snapshot is removed, so measurements added while a
/// submit is in flight stay for the next one. When a batch is split into
/// several requests and one fails, the measurements of the requests already
/// accepted are removed and the rest stay pending (all of them are dropped
/// when `clear_failures` is set).
#[derive(Debug)]
pub struct Queue {
    options: QueueOptions,
    pending: Mutex<Pending>,
    submitting: tokio::sync::Mutex<()>,
    persister: OnceCell<Arc<dyn Persister>>,
    created_at: Instant,
    last_submit: Mutex<Option<(Instant, DateTime<Utc>)>>,
}

impl Default for Queue {
    fn default() -> Self {
        Self::new(QueueOptions::default())
    }
}

impl Queue {
    pub fn new(options: QueueOptions) -> Self {
        Self {
            options,
            pending: Mutex::new(Pending::default()),
            submitting: tokio::sync::Mutex::new(()),
            persister: OnceCell::new(),
            created_at: Instant::now(),
            last_submit: Mutex::new(None),
        }
    }

    /// The client this queue submits through.
    pub fn client(&self) -> Client {
        self.options.client.clone().unwrap_or_else(global::client)
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    /// Persister chosen from the client's persistence on first use.
    pub fn persister(&self) -> Arc<dyn Persister> {
        Arc::clone(
            self.persister
                .get_or_init(|| self.client().persistence().persister()),
        )
    }

    /// Queue measurements. Either all of them are accepted or none.
    pub fn add<I, M>(&self, measurements: I) -> MetricsResult<()>
    where
        I: IntoIterator<Item = M>,
        M: Into<Measurement>,
    {
        let now = Utc::now().timestamp();
        let prepared = measurements
            .into_iter()
            .map(|m| {
                let measurement = self.prepare(m.into(), now);
                measurement.validate().map(|_| measurement)
            })
            .collect::<MetricsResult<Vec<_>>>()?;

        let mut pending = self.pending();
        for measurement in prepared {
            pending.push(measurement);
        }
        Ok(())
    }

    /// Queue measurements, then submit if the autosubmit count or interval
    /// has been reached. Returns whether a submit happened.
    pub async fn add_and_autosubmit<I, M>(&self, measurements: I) -> MetricsResult<bool>
    where
        I: IntoIterator<Item = M>,
        M: Into<Measurement>,
    {
        self.add(measurements)?;
        if !self.autosubmit_due() {
            return Ok(false);
        }
        debug!(pending = self.size(), "Autosubmit threshold reached");
        self.submit().await
    }

    fn autosubmit_due(&self) -> bool {
        if let Some(count) = self.options.autosubmit_count {
            if self.size() >= count {
                return true;
            }
        }
        if let Some(interval) = self.options.autosubmit_interval {
            let since = self
                .last_submit()
                .map(|(at, _)| at)
                .unwrap_or(self.created_at);
            return since.elapsed() >= interval;
        }
        false
    }

    /// Append another queue's pending measurements.
    pub fn merge(&self, other: &Queue) {
        let incoming = other.pending().measurements();
        let mut pending = self.pending();
        for measurement in incoming {
            pending.push(measurement);
        }
    }

    pub fn size(&self) -> usize {
        self.pending().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending().entries.is_empty()
    }

    /// Drop every pending measurement.
    pub fn clear(&self) {
        self.pending().entries.clear();
    }

    pub fn flush(&self) {
        self.clear();
    }

    /// Pending gauges as added, before aggregation.
    pub fn gauges(&self) -> Vec<Measurement> {
        self.of_kind(MetricKind::Gauge)
    }

    /// Pending counters as added, before aggregation.
    pub fn counters(&self) -> Vec<Measurement> {
        self.of_kind(MetricKind::Counter)
    }

    /// The batch a submit would send now.
    pub fn queued(&self) -> MetricsResult<Batch> {
        self.batch_of(&self.pending().measurements())
    }

    /// When the last successful submit finished.
    pub fn last_submit_time(&self) -> Option<DateTime<Utc>> {
        self.last_submit().map(|(_, at)| at)
    }

    /// Aggregate and send what is pending.
    ///
    /// An empty queue succeeds without touching the network.
    #[instrument(skip(self), fields(pending))]
    pub async fn submit(&self) -> MetricsResult<bool> {
        let _submitting = self.submitting.lock().await;

        let (seqs, snapshot) = self.pending().snapshot();
        if snapshot.is_empty() {
            return Ok(true);
        }
        tracing::Span::current().record("pending", snapshot.len());

        let (batch, origins) = self.batch_with_origins(&snapshot)?;
        let chunks = batch.chunks(self.options.per_request);
        let client = self.client();
        let persister = self.persister();

        let outcome = persister.persist(&client, &chunks).await;

        // Accepted chunks hold the first entries in send order.
        let done: HashSet<u64> = if outcome.is_success() || self.options.clear_failures {
            seqs.iter().copied().collect()
        } else {
            let accepted_entries: usize = chunks[..outcome.accepted.min(chunks.len())]
                .iter()
                .map(Batch::len)
                .sum();
            origins[..accepted_entries.min(origins.len())]
                .iter()
                .flatten()
                .map(|&i| seqs[i])
                .collect()
        };
        self.pending().remove(&done);

        match outcome.error {
            None => {
                *lock(&self.last_submit) = Some((Instant::now(), Utc::now()));
                info!(
                    measurements = snapshot.len(),
                    entries = batch.len(),
                    requests = chunks.len(),
                    "Submitted measurements"
                );
                Ok(true)
            }
            Some(err) => {
                warn!(
                    error = %err,
                    accepted_requests = outcome.accepted,
                    requests = chunks.len(),
                    kept = snapshot.len() - done.len(),
                    "Submit failed"
                );
                Err(err)
            }
        }
    }

    fn prepare(&self, mut measurement: Measurement, now: i64) -> Measurement {
        if let Some(prefix) = self.options.prefix.as_deref().filter(|p| !p.is_empty()) {
            measurement.name = format!("{prefix}.{}", measurement.name);
        }
        if !self.options.skip_measurement_times && measurement.measure_time.is_none() {
            measurement.measure_time = Some(now);
        }
        measurement
    }

    fn batch_of(&self, measurements: &[Measurement]) -> MetricsResult<Batch> {
        self.batch_with_origins(measurements).map(|(batch, _)| batch)
    }

    fn batch_with_origins(
        &self,
        measurements: &[Measurement],
    ) -> MetricsResult<(Batch, Vec<Vec<usize>>)> {
        let (mut batch, origins) = Aggregator::aggregate_with_origins(measurements)?;
        batch.source = self.options.source.clone();
        batch.tags = self.options.tags.clone();
        Ok((batch, origins))
    }

    fn of_kind(&self, kind: MetricKind) -> Vec<Measurement> {
        self.pending()
            .entries
            .iter()
            .filter(|q| q.measurement.kind == kind)
            .map(|q| q.measurement.clone())
            .collect()
    }

    fn pending(&self) -> MutexGuard<'_, Pending> {
        lock(&self.pending)
    }

    fn last_submit(&self) -> Option<(Instant, DateTime<Utc>)> {
        *lock(&self.last_submit)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
