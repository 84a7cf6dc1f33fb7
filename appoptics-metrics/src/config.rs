use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::middleware::RetryPolicy;
use crate::persistence::Persistence;
use crate::transport::Adapter;

/// Default API endpoint.
pub const DEFAULT_API_ENDPOINT: &str = "https://api.appoptics.com";

/// An API key that is wiped from memory on drop and never printed.
#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw key. Avoid storing or logging the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume the key, wiping the original buffer.
    pub fn into_string(mut self) -> String {
        let value = self.0.clone();
        self.0.zeroize();
        value
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey(***)")
    }
}

impl From<&str> for ApiKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ApiKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Settings a [`Client`](crate::Client) is built from.
///
/// Everything that shapes the transport is read when the connection is first
/// built; configure before first use.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    api_key: Option<ApiKey>,
    api_endpoint: Option<String>,
    adapter: Option<Adapter>,
    proxy: Option<String>,
    custom_headers: HashMap<String, String>,
    custom_user_agent: Option<String>,
    agent_identifier: Option<String>,
    persistence: Persistence,
    connect_timeout: Duration,
    timeout: Duration,
    retry_policy: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_endpoint: None,
            adapter: None,
            proxy: None,
            custom_headers: HashMap::new(),
            custom_user_agent: None,
            agent_identifier: None,
            persistence: Persistence::default(),
            connect_timeout: Duration::from_secs(20),
            timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Create a configuration authenticated with the given API key.
    pub fn new(api_key: impl Into<ApiKey>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    /// Read settings from `APPOPTICS_*` environment variables.
    ///
    /// Recognized: `APPOPTICS_API_KEY`, `APPOPTICS_API_ENDPOINT`,
    /// `APPOPTICS_PROXY`, `APPOPTICS_USER_AGENT`. Unset or empty variables
    /// leave the default in place.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());
        Self {
            api_key: get("APPOPTICS_API_KEY").map(ApiKey::from),
            api_endpoint: get("APPOPTICS_API_ENDPOINT"),
            proxy: get("APPOPTICS_PROXY"),
            custom_user_agent: get("APPOPTICS_USER_AGENT"),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<ApiKey>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.api_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_adapter(mut self, adapter: Adapter) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Add a header sent with every request, overriding defaults of the same name.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_custom_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.custom_user_agent = Some(user_agent.into());
        self
    }

    pub fn with_persistence(mut self, persistence: Persistence) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn api_key(&self) -> Option<&ApiKey> {
        self.api_key.as_ref()
    }

    /// The configured endpoint, or [`DEFAULT_API_ENDPOINT`].
    pub fn api_endpoint(&self) -> &str {
        self.api_endpoint.as_deref().unwrap_or(DEFAULT_API_ENDPOINT)
    }

    /// The configured adapter, if one was set explicitly.
    pub fn adapter(&self) -> Option<&Adapter> {
        self.adapter.as_ref()
    }

    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    pub fn custom_headers(&self) -> &HashMap<String, String> {
        &self.custom_headers
    }

    pub fn custom_user_agent(&self) -> Option<&str> {
        self.custom_user_agent.as_deref()
    }

    pub fn agent_identifier(&self) -> Option<&str> {
        self.agent_identifier.as_deref()
    }

    pub fn persistence(&self) -> Persistence {
        self.persistence
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    pub(crate) fn set_api_key(&mut self, api_key: Option<ApiKey>) {
        self.api_key = api_key;
    }

    pub(crate) fn set_api_endpoint(&mut self, endpoint: Option<String>) {
        self.api_endpoint = endpoint;
    }

    pub(crate) fn set_adapter(&mut self, adapter: Option<Adapter>) {
        self.adapter = adapter;
    }

    pub(crate) fn set_proxy(&mut self, proxy: Option<String>) {
        self.proxy = proxy;
    }

    pub(crate) fn set_custom_headers(&mut self, headers: HashMap<String, String>) {
        self.custom_headers = headers;
    }

    pub(crate) fn set_custom_user_agent(&mut self, user_agent: Option<String>) {
        self.custom_user_agent = user_agent;
    }

    pub(crate) fn set_agent_identifier(&mut self, identifier: Option<String>) {
        self.agent_identifier = identifier;
    }

    pub(crate) fn set_persistence(&mut self, persistence: Persistence) {
        self.persistence = persistence;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert!(config.api_key().is_none());
        assert_eq!(config.api_endpoint(), "https://api.appoptics.com");
        assert_eq!(config.connect_timeout(), Duration::from_secs(20));
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.persistence(), Persistence::Direct);
        assert_eq!(config.retry_policy().max_attempts(), 4);
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::new("my-api-key")
            .with_api_endpoint("http://test.com/")
            .with_proxy("http://proxy.local:3128")
            .with_header("Foo-Header", "bar")
            .with_custom_user_agent("foo agent")
            .with_timeout(Duration::from_secs(5));

        assert_eq!(config.api_key().unwrap().expose(), "my-api-key");
        assert_eq!(config.api_endpoint(), "http://test.com/");
        assert_eq!(config.proxy(), Some("http://proxy.local:3128"));
        assert_eq!(
            config.custom_headers().get("Foo-Header").map(String::as_str),
            Some("bar")
        );
        assert_eq!(config.custom_user_agent(), Some("foo agent"));
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_api_key_is_redacted() {
        let key = ApiKey::new("super-secret");
        assert_eq!(format!("{key:?}"), "ApiKey(***)");
        assert!(!format!("{:?}", ClientConfig::new("super-secret")).contains("super-secret"));
        assert_eq!(key.into_string(), "super-secret");
    }

    #[test]
    fn test_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("APPOPTICS_API_KEY", "env-key"),
            ("APPOPTICS_API_ENDPOINT", "http://localhost:9296"),
            ("APPOPTICS_PROXY", ""),
        ]
        .into_iter()
        .collect();

        let config = ClientConfig::from_lookup(|name| env.get(name).map(|v| v.to_string()));
        assert_eq!(config.api_key().unwrap().expose(), "env-key");
        assert_eq!(config.api_endpoint(), "http://localhost:9296");
        assert!(config.proxy().is_none());
        assert!(config.custom_user_agent().is_none());
    }
}
