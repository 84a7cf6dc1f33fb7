use std::sync::{Arc, Weak};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use once_cell::sync::OnceCell;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT,
};
use reqwest::{Method, Url};
use tracing::{debug, instrument};

use crate::client::{Client, ClientInner};
use crate::config::{ApiKey, DEFAULT_API_ENDPOINT};
use crate::error::{MetricsError, MetricsResult};
use crate::global;
use crate::middleware::{
    CountRequests, ExpectsStatus, Pipeline, RequestBody, RequestCounter, Retry,
};
use crate::transport::{Adapter, Body, Request, Response};

/// Library token that leads the default user agent.
pub const DEFAULT_USER_AGENT: &str = concat!("appoptics-api-rust/", env!("CARGO_PKG_VERSION"));

/// Options for [`Connection::new`].
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    pub client: Option<Client>,
    pub api_endpoint: Option<String>,
    pub adapter: Option<Adapter>,
    pub proxy: Option<String>,
}

struct Transport {
    base_url: Url,
    headers: HeaderMap,
    pipeline: Pipeline,
}

/// Authenticated access to the `/v1/` API of one endpoint.
///
/// The transport (pipeline, default headers, base URL) is built on first use
/// from the owning client's state at that moment and reused afterwards.
pub struct Connection {
    client: Option<Weak<ClientInner>>,
    api_endpoint: Option<String>,
    adapter: Option<Adapter>,
    proxy: Option<String>,
    counter: Arc<RequestCounter>,
    transport: OnceCell<Transport>,
}

impl Connection {
    pub fn new(options: ConnectionOptions) -> Self {
        Self {
            client: options.client.as_ref().map(Client::downgrade),
            api_endpoint: options.api_endpoint,
            adapter: options.adapter,
            proxy: options.proxy,
            counter: Arc::new(RequestCounter::default()),
            transport: OnceCell::new(),
        }
    }

    /// API endpoint used for requests.
    pub fn api_endpoint(&self) -> &str {
        self.api_endpoint.as_deref().unwrap_or(DEFAULT_API_ENDPOINT)
    }

    /// The adapter this connection was given, or the process-wide default.
    pub fn adapter(&self) -> Adapter {
        self.adapter.clone().unwrap_or_else(global::default_adapter)
    }

    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// Counter of physical requests made through this connection.
    pub fn request_counter(&self) -> &Arc<RequestCounter> {
        &self.counter
    }

    /// User agent sent with every request.
    pub fn user_agent(&self) -> MetricsResult<String> {
        let config = self.client()?.config();
        Ok(compose_user_agent(
            config.custom_user_agent(),
            config.agent_identifier(),
            &self.adapter(),
        ))
    }

    /// The request pipeline, building it on first use.
    pub fn transport(&self) -> MetricsResult<&Pipeline> {
        Ok(&self.built()?.pipeline)
    }

    /// Absolute URL of a path relative to `/v1/`.
    pub fn build_url(&self, path: &str) -> MetricsResult<Url> {
        let base = self.base_url()?;
        base.join(path.trim_start_matches('/'))
            .map_err(|e| MetricsError::configuration(format!("Invalid path '{path}': {e}")))
    }

    /// A request for `path` carrying the connection's default headers.
    pub fn request(&self, method: Method, path: &str) -> MetricsResult<Request> {
        let transport = self.built()?;
        let url = transport
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| MetricsError::configuration(format!("Invalid path '{path}': {e}")))?;
        Ok(Request::new(method, url).with_headers(transport.headers.clone()))
    }

    /// Send a request through the pipeline.
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn send(&self, request: Request) -> MetricsResult<Response> {
        self.transport()?.call(request).await
    }

    pub async fn get(&self, path: &str) -> MetricsResult<Response> {
        self.send(self.request(Method::GET, path)?).await
    }

    pub async fn head(&self, path: &str) -> MetricsResult<Response> {
        self.send(self.request(Method::HEAD, path)?).await
    }

    pub async fn delete(&self, path: &str) -> MetricsResult<Response> {
        self.send(self.request(Method::DELETE, path)?).await
    }

    pub async fn post(&self, path: &str, body: impl Into<Body>) -> MetricsResult<Response> {
        self.send(self.request(Method::POST, path)?.with_body(body))
            .await
    }

    pub async fn put(&self, path: &str, body: impl Into<Body>) -> MetricsResult<Response> {
        self.send(self.request(Method::PUT, path)?.with_body(body))
            .await
    }

    fn client(&self) -> MetricsResult<Client> {
        self.client
            .as_ref()
            .and_then(Client::upgrade)
            .ok_or(MetricsError::NoClientProvided)
    }

    fn base_url(&self) -> MetricsResult<Url> {
        let base = format!("{}/v1/", self.api_endpoint().trim_end_matches('/'));
        Url::parse(&base).map_err(|e| {
            MetricsError::configuration(format!(
                "Invalid API endpoint '{}': {e}",
                self.api_endpoint()
            ))
        })
    }

    fn built(&self) -> MetricsResult<&Transport> {
        self.transport.get_or_try_init(|| self.build())
    }

    fn build(&self) -> MetricsResult<Transport> {
        let client = self.client()?;
        let config = client.config();
        let api_key = config
            .api_key()
            .filter(|key| !key.is_empty())
            .ok_or(MetricsError::CredentialsMissing)?;

        let adapter = self.adapter();
        let user_agent = compose_user_agent(
            config.custom_user_agent(),
            config.agent_identifier(),
            &adapter,
        );

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value(&user_agent)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, basic_auth(api_key)?);
        for (name, value) in config.custom_headers() {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                MetricsError::configuration(format!("Invalid header name '{name}': {e}"))
            })?;
            headers.insert(name, header_value(value)?);
        }

        let transport = adapter.build(config.connect_timeout(), config.timeout(), self.proxy())?;
        let pipeline = Pipeline::new(transport)
            .with(RequestBody)
            .with(Retry::new(config.retry_policy()))
            .with(CountRequests::new(Arc::clone(&self.counter)))
            .with(ExpectsStatus);

        debug!(
            endpoint = self.api_endpoint(),
            user_agent = %user_agent,
            adapter = ?adapter,
            "Built metrics transport"
        );

        Ok(Transport {
            base_url: self.base_url()?,
            headers,
            pipeline,
        })
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("api_endpoint", &self.api_endpoint())
            .field("adapter", &self.adapter)
            .field("proxy", &self.proxy)
            .field("built", &self.transport.get().is_some())
            .finish()
    }
}

/// Space-joined user agent: agent identifier, library, platform, transport.
///
/// A custom user agent replaces the whole string.
pub fn compose_user_agent(
    custom_user_agent: Option<&str>,
    agent_identifier: Option<&str>,
    adapter: &Adapter,
) -> String {
    if let Some(custom) = custom_user_agent {
        return custom.to_string();
    }

    let mut chunks = Vec::with_capacity(4);
    if let Some(identifier) = agent_identifier.filter(|id| !id.is_empty()) {
        chunks.push(identifier.to_string());
    }
    chunks.push(DEFAULT_USER_AGENT.to_string());
    chunks.push(format!(
        "(rust; {}; {})",
        std::env::consts::OS,
        std::env::consts::ARCH
    ));
    chunks.push(format!("direct-{}", adapter.name()));
    chunks.join(" ")
}

fn header_value(value: &str) -> MetricsResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| MetricsError::configuration(format!("Invalid header value '{value}': {e}")))
}

/// `Authorization` value with the API key as user and no password.
fn basic_auth(api_key: &ApiKey) -> MetricsResult<HeaderValue> {
    let encoded = STANDARD.encode(format!("{}:", api_key.expose()));
    let mut value = HeaderValue::from_str(&format!("Basic {encoded}"))
        .map_err(|_| MetricsError::configuration("API key is not a valid header value"))?;
    value.set_sensitive(true);
    Ok(value)
}
