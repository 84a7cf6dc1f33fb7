//! Where submitted batches go.
//!
//! [`Persistence`] names a strategy; [`Persistence::persister`] resolves it
//! to a [`Persister`]. A queue resolves its persister once, on first submit.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::aggregator::Batch;
use crate::client::Client;
use crate::error::{MetricsError, MetricsResult};
use crate::transport::Body;

/// Resource batches are posted to, relative to `/v1/`.
pub const METRICS_RESOURCE: &str = "metrics";

/// Largest number of measurements sent in one request by default.
pub const MAX_MEASUREMENTS_PER_REQUEST: usize = 300;

/// Available persistence strategies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Persistence {
    /// POST to the API through the client's connection.
    #[default]
    Direct,
    /// Keep the last batch in memory; no network.
    Test,
}

impl Persistence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Persistence::Direct => "direct",
            Persistence::Test => "test",
        }
    }

    pub fn persister(&self) -> Arc<dyn Persister> {
        match self {
            Persistence::Direct => Arc::new(DirectPersister),
            Persistence::Test => Arc::new(TestPersister::default()),
        }
    }
}

impl fmt::Display for Persistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Persistence {
    type Err = MetricsError;

    fn from_str(s: &str) -> MetricsResult<Self> {
        match s {
            "direct" => Ok(Persistence::Direct),
            "test" => Ok(Persistence::Test),
            other => Err(MetricsError::InvalidParameters {
                message: format!("unknown persistence '{other}', expected direct or test"),
            }),
        }
    }
}

/// How far a sequence of chunks got.
#[derive(Debug, Default)]
pub struct PersistOutcome {
    /// Chunks accepted, counted from the first.
    pub accepted: usize,
    /// The error that stopped persisting; `None` when every chunk went through.
    pub error: Option<MetricsError>,
}

impl PersistOutcome {
    pub fn success(accepted: usize) -> Self {
        Self {
            accepted,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// `Ok(true)` when every chunk was accepted, otherwise the stopping error.
    pub fn into_result(self) -> MetricsResult<bool> {
        match self.error {
            None => Ok(true),
            Some(err) => Err(err),
        }
    }
}

/// Delivers aggregated chunks.
#[async_trait]
pub trait Persister: Send + Sync + fmt::Debug {
    /// Persist `chunks` in order, stopping at the first failure.
    ///
    /// Chunks before the failing one stay accepted; the outcome says how many
    /// there were so the caller can forget exactly those.
    async fn persist(&self, client: &Client, chunks: &[Batch]) -> PersistOutcome;

    /// The last submission persisted, for persisters that keep one.
    fn persisted(&self) -> Option<Batch> {
        None
    }
}

/// Posts chunks to the metrics API, one request each.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectPersister;

#[async_trait]
impl Persister for DirectPersister {
    async fn persist(&self, client: &Client, chunks: &[Batch]) -> PersistOutcome {
        let connection = match client.connection() {
            Ok(connection) => connection,
            Err(err) => {
                return PersistOutcome {
                    accepted: 0,
                    error: Some(err),
                }
            }
        };
        let total = chunks.len();

        for (i, chunk) in chunks.iter().enumerate() {
            debug!(
                request = i + 1,
                requests = total,
                measurements = chunk.len(),
                "Posting batch"
            );
            let posted = match Body::json(chunk) {
                Ok(body) => connection.post(METRICS_RESOURCE, body).await,
                Err(err) => Err(err),
            };
            if let Err(err) = posted {
                return PersistOutcome {
                    accepted: i,
                    error: Some(err),
                };
            }
        }
        PersistOutcome::success(total)
    }
}

/// Records the last submission instead of sending it.
///
/// Chunks of one call are joined back into a single batch.
#[derive(Debug, Default)]
pub struct TestPersister {
    persisted: Mutex<Option<Batch>>,
}

#[async_trait]
impl Persister for TestPersister {
    async fn persist(&self, _client: &Client, chunks: &[Batch]) -> PersistOutcome {
        let mut joined = chunks.first().map(Batch::empty_like).unwrap_or_default();
        for chunk in chunks {
            joined.gauges.extend(chunk.gauges.iter().cloned());
            joined.counters.extend(chunk.counters.iter().cloned());
        }
        *self
            .persisted
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(joined);
        PersistOutcome::success(chunks.len())
    }

    fn persisted(&self) -> Option<Batch> {
        self.persisted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
