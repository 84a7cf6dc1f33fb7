use async_trait::async_trait;
use tracing::debug;

use crate::error::{MetricsError, MetricsResult};
use crate::logging::truncate_field;
use crate::middleware::{Middleware, Next};
use crate::transport::{Request, Response};

/// Maps a completed response to `Ok` for 2xx and a typed error otherwise.
///
/// The response is moved into the error so callers can inspect status and
/// body.
pub fn classify(response: Response) -> MetricsResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    debug!(
        status = status.as_u16(),
        body = %truncate_field(&response.text(), 256),
        "Request failed"
    );

    let response = Box::new(response);
    Err(match status.as_u16() {
        401 => MetricsError::Unauthorized { response },
        403 => MetricsError::Forbidden { response },
        404 => MetricsError::NotFound { response },
        422 => MetricsError::EntityAlreadyExists { response },
        500..=599 => MetricsError::ServerError { response },
        _ => MetricsError::ClientError { response },
    })
}

/// Pipeline stage applying [`classify`] to every attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpectsStatus;

#[async_trait]
impl Middleware for ExpectsStatus {
    async fn handle(&self, request: Request, next: Next<'_>) -> MetricsResult<Response> {
        classify(next.run(request).await?)
    }
}
