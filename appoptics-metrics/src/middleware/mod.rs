//! Request pipeline.
//!
//! A [`Pipeline`] is an ordered list of [`Middleware`] stages in front of a
//! [`Transport`]. Each stage receives the request and a [`Next`] cursor over
//! the stages behind it; calling [`Next::run`] hands the request inward and
//! returns the inner stages' result. Stages are composed once when a
//! connection is built and never change afterwards.
//!
//! The connection uses this order, outermost first:
//!
//! 1. [`RequestBody`] encodes JSON bodies once
//! 2. [`Retry`] replays the encoded request on retryable failures
//! 3. [`CountRequests`] observes every physical attempt
//! 4. [`ExpectsStatus`] turns non-2xx responses into typed errors

mod count_requests;
mod expects_status;
mod request_body;
mod retry;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::MetricsResult;
use crate::transport::{Request, Response, Transport};

pub use count_requests::{CountRequests, RequestCounter};
pub use expects_status::{classify, ExpectsStatus};
pub use request_body::RequestBody;
pub use retry::{Retry, RetryPolicy, RetryState};

/// One stage of the request pipeline.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, request: Request, next: Next<'_>) -> MetricsResult<Response>;
}

/// Cursor over the stages that have not run yet.
///
/// `Next` is `Copy`, so a stage may run the rest of the pipeline more than
/// once.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Middleware>],
    transport: &'a dyn Transport,
}

impl<'a> Next<'a> {
    pub(crate) fn new(stages: &'a [Arc<dyn Middleware>], transport: &'a dyn Transport) -> Self {
        Self { stages, transport }
    }

    /// Run the remaining stages and the transport.
    pub async fn run(self, request: Request) -> MetricsResult<Response> {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                stage
                    .handle(request, Next::new(rest, self.transport))
                    .await
            }
            None => self.transport.send(request).await,
        }
    }
}

/// An ordered set of stages terminated by a transport.
#[derive(Clone)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Middleware>>,
    transport: Arc<dyn Transport>,
}

impl Pipeline {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            stages: Vec::new(),
            transport,
        }
    }

    /// Append a stage. Stages added first wrap the ones added later.
    pub fn with(mut self, stage: impl Middleware + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub async fn call(&self, request: Request) -> MetricsResult<Response> {
        Next::new(&self.stages, self.transport.as_ref())
            .run(request)
            .await
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages.len())
            .field("transport", &self.transport.name())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use reqwest::StatusCode;

    use crate::error::{MetricsError, MetricsResult};
    use crate::transport::{Request, Response, Transport};

    /// Transport that answers from a fixed script and records what it saw.
    #[derive(Default)]
    pub struct ScriptedTransport {
        script: Mutex<VecDeque<Option<StatusCode>>>,
        pub seen: Mutex<Vec<Option<Bytes>>>,
    }

    impl ScriptedTransport {
        /// `None` entries simulate a connection failure.
        pub fn new(script: impl IntoIterator<Item = Option<StatusCode>>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn statuses(statuses: &[u16]) -> Self {
            Self::new(
                statuses
                    .iter()
                    .map(|s| Some(StatusCode::from_u16(*s).unwrap())),
            )
        }

        pub fn bodies(&self) -> Vec<Option<Bytes>> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: Request) -> MetricsResult<Response> {
            self.seen.lock().unwrap().push(request.body.encode()?);
            let next = self.script.lock().unwrap().pop_front().flatten();
            match next {
                Some(status) => Ok(Response::new(status, format!("status {}", status.as_u16()))),
                None => Err(MetricsError::Network {
                    message: "connection refused".to_string(),
                }),
            }
        }

        fn name(&self) -> String {
            "scripted/1.0".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedTransport;
    use super::*;
    use crate::error::MetricsError;
    use reqwest::{Method, Url};
    use std::sync::Mutex;
    use std::time::Duration;

    struct Tag(&'static str, Arc<Mutex<Vec<&'static str>>>);

    #[async_trait]
    impl Middleware for Tag {
        async fn handle(&self, request: Request, next: Next<'_>) -> MetricsResult<Response> {
            self.1.lock().unwrap().push(self.0);
            next.run(request).await
        }
    }

    fn request() -> Request {
        Request::new(
            Method::POST,
            Url::parse("http://localhost/v1/metrics").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(Arc::new(ScriptedTransport::statuses(&[200])))
            .with(Tag("outer", order.clone()))
            .with(Tag("inner", order.clone()));

        let response = pipeline.call(request()).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(*order.lock().unwrap(), vec!["outer", "inner"]);
        assert_eq!(pipeline.len(), 2);
    }

    #[tokio::test]
    async fn test_full_stack_counts_every_attempt() {
        let counter = Arc::new(RequestCounter::default());
        let transport = Arc::new(ScriptedTransport::statuses(&[503, 503, 200]));
        let pipeline = Pipeline::new(transport.clone())
            .with(RequestBody)
            .with(Retry::new(
                RetryPolicy::default().with_base_delay(Duration::from_millis(1)),
            ))
            .with(CountRequests::new(counter.clone()))
            .with(ExpectsStatus);

        let response = pipeline
            .call(request().with_body(r#"{"foo": "bar"}"#))
            .await
            .unwrap();
        assert!(response.status().is_success());
        assert_eq!(counter.total_requests(), 3);
        assert_eq!(transport.bodies().len(), 3);
    }

    #[tokio::test]
    async fn test_client_error_short_circuits_retry() {
        let counter = Arc::new(RequestCounter::default());
        let pipeline = Pipeline::new(Arc::new(ScriptedTransport::statuses(&[404, 200])))
            .with(Retry::new(
                RetryPolicy::default().with_base_delay(Duration::from_millis(1)),
            ))
            .with(CountRequests::new(counter.clone()))
            .with(ExpectsStatus);

        let err = pipeline.call(request()).await.unwrap_err();
        assert!(matches!(err, MetricsError::NotFound { .. }));
        assert_eq!(counter.total_requests(), 1);
    }
}
