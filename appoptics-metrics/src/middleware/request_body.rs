use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};

use crate::error::MetricsResult;
use crate::middleware::{Middleware, Next};
use crate::transport::{Body, Request, Response};

/// Encodes JSON bodies to bytes before any retry logic sees the request.
///
/// Stages behind this one only ever see `Body::Bytes`, so a replayed attempt
/// carries exactly the bytes of the first one.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestBody;

#[async_trait]
impl Middleware for RequestBody {
    async fn handle(&self, mut request: Request, next: Next<'_>) -> MetricsResult<Response> {
        if let Body::Json(_) = request.body {
            request.body = match request.body.encode()? {
                Some(bytes) => Body::Bytes(bytes),
                None => Body::Empty,
            };
            request
                .headers
                .entry(CONTENT_TYPE)
                .or_insert(HeaderValue::from_static("application/json"));
        }
        next.run(request).await
    }
}
