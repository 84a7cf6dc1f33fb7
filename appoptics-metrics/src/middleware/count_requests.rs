use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::MetricsResult;
use crate::middleware::{Middleware, Next};
use crate::transport::{Request, Response};

/// Running count of physical requests made through a pipeline.
#[derive(Debug, Default)]
pub struct RequestCounter {
    total: AtomicU64,
}

impl RequestCounter {
    pub fn total_requests(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.total.store(0, Ordering::SeqCst);
    }

    fn increment(&self) {
        self.total.fetch_add(1, Ordering::SeqCst);
    }
}

/// Increments a shared [`RequestCounter`] for every request that passes.
///
/// Placed inside the retry stage, so each retried attempt is counted.
#[derive(Debug, Clone)]
pub struct CountRequests {
    counter: Arc<RequestCounter>,
}

impl CountRequests {
    pub fn new(counter: Arc<RequestCounter>) -> Self {
        Self { counter }
    }
}

#[async_trait]
impl Middleware for CountRequests {
    async fn handle(&self, request: Request, next: Next<'_>) -> MetricsResult<Response> {
        self.counter.increment();
        next.run(request).await
    }
}
