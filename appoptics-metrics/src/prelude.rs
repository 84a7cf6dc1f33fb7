//! Prelude for commonly used types in appoptics-metrics.

pub use crate::aggregator::{Aggregator, Batch};
pub use crate::client::Client;
pub use crate::config::ClientConfig;
pub use crate::error::{MetricsError, MetricsResult};
pub use crate::logging::setup::{init_logging, LoggingConfig};
pub use crate::measurement::{MetricKind, Measurement};
pub use crate::persistence::Persistence;
pub use crate::queue::{Queue, QueueOptions};
pub use crate::transport::Adapter;
