use thiserror::Error;

use crate::transport::Response;

/// Errors that can occur when building, queueing or submitting measurements.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A measurement is malformed (bad kind, missing name, non-finite value).
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// A measurement carries a timestamp older than the service accepts.
    ///
    /// Kept apart from [`MetricsError::Validation`] so callers can report the
    /// accepted bound; [`MetricsError::is_validation_error`] covers both.
    #[error("Invalid measure time {measure_time}: must be at or after {min_measure_time}")]
    InvalidMeasureTime {
        measure_time: i64,
        min_measure_time: i64,
    },

    /// A caller passed arguments of the wrong shape.
    #[error("Invalid parameters: {message}")]
    InvalidParameters { message: String },

    /// A connection was used without an owning client.
    #[error("No client provided.")]
    NoClientProvided,

    /// A connection was requested before an API key was set.
    #[error("Credentials missing: call authenticate before using the connection")]
    CredentialsMissing,

    /// The transport could not be configured (bad endpoint, proxy, header).
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The server rejected the credentials (401).
    #[error("Unauthorized: {response}")]
    Unauthorized { response: Box<Response> },

    /// The credentials lack access to the resource (403).
    #[error("Forbidden: {response}")]
    Forbidden { response: Box<Response> },

    /// The resource does not exist (404).
    #[error("Not found: {response}")]
    NotFound { response: Box<Response> },

    /// The entity already exists (422).
    #[error("Entity already exists: {response}")]
    EntityAlreadyExists { response: Box<Response> },

    /// Any other 4xx response.
    #[error("Client error: {response}")]
    ClientError { response: Box<Response> },

    /// A 5xx response, surfaced after the retry budget is spent.
    #[error("Server error: {response}")]
    ServerError { response: Box<Response> },

    /// Network error (connection refused, timeout, etc.).
    #[error("Network error: {message}")]
    Network { message: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl MetricsError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        MetricsError::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        MetricsError::Configuration {
            message: message.into(),
        }
    }

    /// Returns true if this error is transient and the request should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MetricsError::ServerError { .. } | MetricsError::Network { .. }
        )
    }

    /// Returns true when a measurement or argument was rejected locally,
    /// before anything was sent. Old measure times count as validation errors.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            MetricsError::Validation { .. }
                | MetricsError::InvalidMeasureTime { .. }
                | MetricsError::InvalidParameters { .. }
        )
    }

    /// Returns true for the 4xx family, which is never retried.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            MetricsError::Unauthorized { .. }
                | MetricsError::Forbidden { .. }
                | MetricsError::NotFound { .. }
                | MetricsError::EntityAlreadyExists { .. }
                | MetricsError::ClientError { .. }
        )
    }

    /// The response that caused this error, for errors raised from a status code.
    pub fn response(&self) -> Option<&Response> {
        match self {
            MetricsError::Unauthorized { response }
            | MetricsError::Forbidden { response }
            | MetricsError::NotFound { response }
            | MetricsError::EntityAlreadyExists { response }
            | MetricsError::ClientError { response }
            | MetricsError::ServerError { response } => Some(response),
            _ => None,
        }
    }

    /// HTTP status of the offending response, if any.
    pub fn status(&self) -> Option<u16> {
        self.response().map(|response| response.status().as_u16())
    }
}

impl From<serde_json::Error> for MetricsError {
    fn from(err: serde_json::Error) -> Self {
        MetricsError::Serialization {
            message: err.to_string(),
        }
    }
}

/// Result type for metrics operations.
pub type MetricsResult<T> = std::result::Result<T, MetricsError>;
