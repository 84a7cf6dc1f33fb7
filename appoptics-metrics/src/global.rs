//! Process-wide default client and transport adapter.
//!
//! The default client is created lazily with default settings. Functions here
//! forward to it, so code that only ever talks to one account can skip
//! building a [`Client`] by hand:
//!
//! ```no_run
//! # async fn run() -> appoptics_metrics::MetricsResult<()> {
//! use appoptics_metrics::global;
//!
//! global::authenticate("my-api-key");
//! global::submit([("app.requests", 12.0)]).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::Lazy;

use crate::client::Client;
use crate::config::ApiKey;
use crate::connection::Connection;
use crate::error::MetricsResult;
use crate::measurement::Measurement;
use crate::persistence::{Persistence, Persister};
use crate::queue::{Queue, QueueOptions};
use crate::transport::Adapter;

static CLIENT: Lazy<RwLock<Client>> = Lazy::new(|| RwLock::new(Client::new()));

static DEFAULT_ADAPTER: Lazy<RwLock<Adapter>> = Lazy::new(|| RwLock::new(Adapter::default()));

/// The default client. Clones share state with the global instance.
pub fn client() -> Client {
    CLIENT
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Replace the default client with a fresh, unconfigured one.
///
/// Clones handed out earlier keep their old state.
pub fn reset() {
    *CLIENT.write().unwrap_or_else(PoisonError::into_inner) = Client::new();
}

/// Adapter used by clients that have none configured.
pub fn default_adapter() -> Adapter {
    DEFAULT_ADAPTER
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

pub fn set_default_adapter(adapter: Adapter) {
    *DEFAULT_ADAPTER
        .write()
        .unwrap_or_else(PoisonError::into_inner) = adapter;
}

pub fn reset_default_adapter() {
    set_default_adapter(Adapter::default());
}

pub fn authenticate(api_key: impl Into<ApiKey>) {
    client().authenticate(api_key);
}

pub fn flush_authentication() {
    client().flush_authentication();
}

pub fn api_key() -> Option<ApiKey> {
    client().api_key()
}

pub fn api_endpoint() -> String {
    client().api_endpoint()
}

pub fn set_api_endpoint(endpoint: impl Into<String>) {
    client().set_api_endpoint(endpoint);
}

pub fn adapter() -> Adapter {
    client().adapter()
}

pub fn set_adapter(adapter: Adapter) {
    client().set_adapter(adapter);
}

pub fn proxy() -> Option<String> {
    client().proxy()
}

pub fn set_proxy(proxy: Option<String>) {
    client().set_proxy(proxy);
}

pub fn custom_headers() -> HashMap<String, String> {
    client().custom_headers()
}

pub fn set_custom_headers(headers: HashMap<String, String>) {
    client().set_custom_headers(headers);
}

pub fn custom_user_agent() -> Option<String> {
    client().custom_user_agent()
}

pub fn set_custom_user_agent(user_agent: Option<String>) {
    client().set_custom_user_agent(user_agent);
}

pub fn agent_identifier() -> Option<String> {
    client().agent_identifier()
}

pub fn set_agent_identifier(parts: &[&str]) -> MetricsResult<()> {
    client().set_agent_identifier(parts)
}

pub fn persistence() -> Persistence {
    client().persistence()
}

pub fn set_persistence(persistence: Persistence) {
    client().set_persistence(persistence);
}

pub fn persister() -> Option<Arc<dyn Persister>> {
    client().persister()
}

pub fn connection() -> MetricsResult<Arc<Connection>> {
    client().connection()
}

pub fn new_queue(options: QueueOptions) -> Queue {
    client().new_queue(options)
}

pub async fn submit<I, M>(measurements: I) -> MetricsResult<bool>
where
    I: IntoIterator<Item = M>,
    M: Into<Measurement>,
{
    client().submit(measurements).await
}
