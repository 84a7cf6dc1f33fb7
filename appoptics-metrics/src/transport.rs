//! HTTP request/response types and the adapters that put them on the wire.
//!
//! The middleware pipeline only ever sees [`Request`] and [`Response`]; the
//! [`Transport`] at the end of the pipeline is chosen through [`Adapter`] when
//! a connection is built.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{MetricsError, MetricsResult};

/// Version of the HTTP library reported in the user agent.
pub const REQWEST_VERSION: &str = "0.12";

/// Body of an outgoing request.
///
/// `Json` bodies are encoded exactly once by the request body stage; every
/// later stage, retries included, sees the resulting bytes.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Bytes),
    Json(serde_json::Value),
}

impl Body {
    /// Build a JSON body from any serializable value.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> MetricsResult<Self> {
        Ok(Body::Json(serde_json::to_value(value)?))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Bytes(bytes) => bytes.is_empty(),
            Body::Json(_) => false,
        }
    }

    /// Encode the body, returning `None` for an empty body.
    pub fn encode(&self) -> MetricsResult<Option<Bytes>> {
        match self {
            Body::Empty => Ok(None),
            Body::Bytes(bytes) => Ok(Some(bytes.clone())),
            Body::Json(value) => Ok(Some(Bytes::from(serde_json::to_vec(value)?))),
        }
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        Body::Json(value)
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Bytes(Bytes::from(text))
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Body::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

/// An outgoing HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Body,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Body::Empty,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }
}

/// A completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body as UTF-8 text, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> MetricsResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.body.is_empty() {
            write!(f, "{}", self.status)
        } else {
            write!(f, "{} {}", self.status, self.text())
        }
    }
}

/// The last stage of a pipeline: sends one request and returns its response.
///
/// Implementations must not inspect the status code; classification is the
/// job of the middleware in front of them.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> MetricsResult<Response>;

    /// Token reported in the user agent, e.g. `reqwest/0.12`.
    fn name(&self) -> String {
        "custom".to_string()
    }
}

/// Transport backed by a `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with the given timeouts and optional proxy URL.
    pub fn new(
        connect_timeout: Duration,
        timeout: Duration,
        proxy: Option<&str>,
    ) -> MetricsResult<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout);

        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| {
                MetricsError::configuration(format!("Invalid proxy '{proxy}': {e}"))
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|e| {
            MetricsError::configuration(format!("Failed to create HTTP client: {e}"))
        })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: Request) -> MetricsResult<Response> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body.encode()? {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| MetricsError::Network {
            message: e.to_string(),
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| MetricsError::Network {
            message: e.to_string(),
        })?;

        Ok(Response::new(status, body).with_headers(headers))
    }

    fn name(&self) -> String {
        format!("reqwest/{REQWEST_VERSION}")
    }
}

/// Which transport a connection puts at the end of its pipeline.
#[derive(Clone, Default)]
pub enum Adapter {
    /// HTTP over `reqwest`, honoring the configured timeouts and proxy.
    #[default]
    Reqwest,
    /// A caller-supplied transport, used as-is.
    Custom(Arc<dyn Transport>),
}

impl Adapter {
    pub fn custom(transport: impl Transport + 'static) -> Self {
        Adapter::Custom(Arc::new(transport))
    }

    /// Resolve the adapter into a transport.
    pub fn build(
        &self,
        connect_timeout: Duration,
        timeout: Duration,
        proxy: Option<&str>,
    ) -> MetricsResult<Arc<dyn Transport>> {
        match self {
            Adapter::Reqwest => Ok(Arc::new(ReqwestTransport::new(
                connect_timeout,
                timeout,
                proxy,
            )?)),
            Adapter::Custom(transport) => Ok(Arc::clone(transport)),
        }
    }

    /// Token describing the adapter for the user agent.
    pub fn name(&self) -> String {
        match self {
            Adapter::Reqwest => format!("reqwest/{REQWEST_VERSION}"),
            Adapter::Custom(transport) => transport.name(),
        }
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Adapter::Reqwest => write!(f, "Adapter::Reqwest"),
            Adapter::Custom(transport) => write!(f, "Adapter::Custom({})", transport.name()),
        }
    }
}

impl PartialEq for Adapter {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Adapter::Reqwest, Adapter::Reqwest) => true,
            (Adapter::Custom(a), Adapter::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_body_encodes_once() {
        let body = Body::json(&serde_json::json!({"gauges": [{"name": "foo", "value": 1.0}]}))
            .unwrap();
        let first = body.encode().unwrap().unwrap();
        let second = body.encode().unwrap().unwrap();
        assert_eq!(first, second);
        assert!(!body.is_empty());
        assert!(Body::Empty.encode().unwrap().is_none());
    }

    #[test]
    fn test_response_display_includes_body() {
        let response = Response::new(StatusCode::SERVICE_UNAVAILABLE, "try later");
        assert_eq!(response.to_string(), "503 Service Unavailable try later");
        let empty = Response::new(StatusCode::NOT_FOUND, Bytes::new());
        assert_eq!(empty.to_string(), "404 Not Found");
    }

    #[test]
    fn test_invalid_proxy_is_configuration_error() {
        let result = ReqwestTransport::new(
            Duration::from_secs(1),
            Duration::from_secs(1),
            Some("http://[invalid"),
        );
        assert!(matches!(result, Err(MetricsError::Configuration { .. })));
    }

    #[test]
    fn test_adapter_names() {
        assert_eq!(Adapter::Reqwest.name(), "reqwest/0.12");
        assert_eq!(Adapter::default(), Adapter::Reqwest);
    }
}
