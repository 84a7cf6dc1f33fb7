//! # appoptics-metrics
//!
//! A client for submitting counters and gauges to the AppOptics metrics API.
//!
//! ## Overview
//!
//! Measurements are collected in a [`Queue`], merged per kind and name by the
//! [`Aggregator`] and posted in batches through a lazily built
//! [`Connection`](connection::Connection). Every request passes through a
//! small middleware pipeline that encodes the body, retries server errors and
//! network failures, counts attempts, and turns error statuses into typed
//! [`MetricsError`]s.
//!
//! ## Quick Start
//!
//! ```no_run
//! use appoptics_metrics::prelude::*;
//!
//! # async fn example() -> MetricsResult<()> {
//! let client = Client::with_config(ClientConfig::new("my-api-key"));
//!
//! // One-off submission
//! client.submit([("app.requests", 12.0)]).await?;
//!
//! // Buffered submission
//! let queue = client.new_queue(QueueOptions::new().with_source("web-1"));
//! queue.add([
//!     Measurement::counter("app.jobs", 1.0),
//!     Measurement::gauge("app.memory", 512.0).with_tag("region", "us-east-1"),
//! ])?;
//! queue.submit().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`measurement`**: a single counter or gauge value and its validation
//! - **`aggregator`**: merges measurements into a [`Batch`] and splits batches
//! - **`queue`**: buffers measurements and submits them
//! - **`client`**: credentials, settings and the cached connection
//! - **`connection`**: URL, default headers and the request pipeline
//! - **`middleware`**: request body encoding, retry, counting, status checks
//! - **`transport`**: the HTTP seam; reqwest by default, swappable for tests
//! - **`persistence`**: direct submission or in-memory capture
//! - **`global`**: a process-wide default client
//! - **`logging`**: `tracing` subscriber setup

pub mod aggregator;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod global;
pub mod logging;
pub mod measurement;
pub mod middleware;
pub mod persistence;
pub mod prelude;
pub mod queue;
pub mod transport;

pub use aggregator::{Aggregator, Batch};
pub use client::{compose_agent_identifier, Client};
pub use config::{ApiKey, ClientConfig, DEFAULT_API_ENDPOINT};
pub use connection::{Connection, ConnectionOptions};
pub use error::{MetricsError, MetricsResult};
pub use measurement::{MetricKind, Measurement, MIN_MEASURE_TIME};
pub use middleware::{RequestCounter, RetryPolicy};
pub use persistence::{PersistOutcome, Persistence, Persister, MAX_MEASUREMENTS_PER_REQUEST};
pub use queue::{Queue, QueueOptions};
pub use transport::{Adapter, Transport};
