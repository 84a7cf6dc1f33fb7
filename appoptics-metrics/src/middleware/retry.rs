use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{MetricsError, MetricsResult};
use crate::middleware::{Middleware, Next};
use crate::transport::{Body, Request, Response};

/// How many attempts a logical request gets and how long to wait between them.
///
/// Delays grow as `base_delay * 2^(attempt - 1)` and never exceed `max_delay`.
/// With the defaults four attempts wait 100 ms, 200 ms and 400 ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Create a policy allowing `max_attempts` total attempts (at least one).
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1)
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Progress of one logical request through its retry budget.
#[derive(Debug, Clone)]
pub struct RetryState {
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_status: Option<u16>,
    body: Option<Bytes>,
}

impl RetryState {
    fn new(max_attempts: u32, body: Option<Bytes>) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            last_status: None,
            body,
        }
    }

    /// The body snapshot replayed on every attempt.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    fn attempt_request(&self, template: &Request) -> Request {
        let mut request = template.clone();
        request.body = match &self.body {
            Some(bytes) => Body::Bytes(bytes.clone()),
            None => Body::Empty,
        };
        request
    }
}

/// Retries server errors and network failures within a [`RetryPolicy`].
///
/// The request body is snapshotted before the first attempt; every attempt
/// sends that snapshot. Client errors (4xx) are returned immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct Retry {
    policy: RetryPolicy,
}

impl Retry {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl Middleware for Retry {
    async fn handle(&self, request: Request, next: Next<'_>) -> MetricsResult<Response> {
        let mut state = RetryState::new(self.policy.max_attempts, request.body.encode()?);

        loop {
            state.attempt += 1;
            let outcome = next.run(state.attempt_request(&request)).await;

            let retryable = match &outcome {
                Ok(response) => {
                    state.last_status = Some(response.status().as_u16());
                    response.status().is_server_error()
                }
                Err(err) => {
                    state.last_status = err.status();
                    err.is_retryable()
                }
            };

            if !retryable || state.exhausted() {
                if retryable {
                    warn!(
                        attempts = state.attempt,
                        status = ?state.last_status,
                        url = %request.url,
                        "Retry budget exhausted"
                    );
                }
                return outcome;
            }

            let delay = self.policy.backoff(state.attempt);
            debug!(
                attempt = state.attempt,
                max_attempts = state.max_attempts,
                status = ?state.last_status,
                delay_ms = delay.as_millis() as u64,
                error = %describe(&outcome),
                "Retrying request"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn describe(outcome: &MetricsResult<Response>) -> String {
    match outcome {
        Ok(response) => response.status().to_string(),
        Err(MetricsError::Network { message }) => message.clone(),
        Err(err) => err.to_string(),
    }
}
