#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use appoptics_metrics::transport::{Request, Response};
use appoptics_metrics::{
    Adapter, Client, ClientConfig, MetricsError, MetricsResult, RetryPolicy, Transport,
};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;

/// Retry policy with millisecond delays so tests stay fast.
pub fn fast_retries() -> RetryPolicy {
    RetryPolicy::default()
        .with_base_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5))
}

/// Client authenticated as "foo" pointed at `endpoint`.
pub fn client_for(endpoint: &str) -> Client {
    Client::with_config(
        ClientConfig::new("foo")
            .with_api_endpoint(endpoint)
            .with_retry_policy(fast_retries()),
    )
}

/// Client whose requests are answered by `transport`.
pub fn scripted_client(transport: Arc<ScriptedTransport>) -> Client {
    Client::with_config(
        ClientConfig::new("foo")
            .with_api_endpoint("http://localhost:9296")
            .with_adapter(Adapter::Custom(transport))
            .with_retry_policy(fast_retries()),
    )
}

/// Answers requests from a fixed list of statuses and records request bodies.
///
/// `None` in the script is answered with a network error; an exhausted script
/// answers 200.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Option<u16>>>,
    seen: Mutex<Vec<Request>>,
}

impl ScriptedTransport {
    pub fn new(script: impl IntoIterator<Item = Option<u16>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn statuses(statuses: &[u16]) -> Arc<Self> {
        Self::new(statuses.iter().copied().map(Some))
    }

    pub fn requests(&self) -> Vec<Request> {
        self.seen.lock().unwrap().clone()
    }

    pub fn bodies(&self) -> Vec<Bytes> {
        self.requests()
            .iter()
            .map(|r| r.body.encode().unwrap().unwrap_or_default())
            .collect()
    }

    pub fn json_bodies(&self) -> Vec<serde_json::Value> {
        self.bodies()
            .iter()
            .map(|b| serde_json::from_slice(b).unwrap())
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: Request) -> MetricsResult<Response> {
        self.seen.lock().unwrap().push(request);
        match self.script.lock().unwrap().pop_front() {
            Some(None) => Err(MetricsError::Network {
                message: "connection reset by peer".to_string(),
            }),
            Some(Some(status)) => Ok(Response::new(
                StatusCode::from_u16(status).unwrap(),
                format!("status {status}"),
            )),
            None => Ok(Response::new(StatusCode::OK, "")),
        }
    }

    fn name(&self) -> String {
        "scripted/1.0".to_string()
    }
}
