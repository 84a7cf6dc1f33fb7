use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use once_cell::sync::Lazy;
use tracing::{debug, instrument};

use crate::config::{ApiKey, ClientConfig};
use crate::connection::{Connection, ConnectionOptions};
use crate::error::{MetricsError, MetricsResult};
use crate::global;
use crate::measurement::{Measurement, MIN_MEASURE_TIME};
use crate::persistence::{Persistence, Persister};
use crate::queue::{Queue, QueueOptions};
use crate::transport::Adapter;

pub(crate) struct ClientInner {
    config: RwLock<ClientConfig>,
    connection: Mutex<Option<Arc<Connection>>>,
    last_persister: Mutex<Option<Arc<dyn Persister>>>,
}

/// Entry point for submitting measurements.
///
/// A `Client` is cheap to clone; clones share credentials, configuration and
/// the cached connection. Settings that shape the transport (endpoint,
/// adapter, proxy, headers, user agent) should be set before the first
/// request. Changing them afterwards drops the cached connection, and the
/// next request builds a new one; requests already in flight finish on the
/// old transport.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Create an unauthenticated client with default settings.
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Lazy::force(&MIN_MEASURE_TIME);
        Self {
            inner: Arc::new(ClientInner {
                config: RwLock::new(config),
                connection: Mutex::new(None),
                last_persister: Mutex::new(None),
            }),
        }
    }

    /// Client configured from `APPOPTICS_*` environment variables.
    pub fn from_env() -> Self {
        Self::with_config(ClientConfig::from_env())
    }

    pub(crate) fn downgrade(&self) -> Weak<ClientInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(inner: &Weak<ClientInner>) -> Option<Client> {
        inner.upgrade().map(|inner| Client { inner })
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> ClientConfig {
        self.read().clone()
    }

    /// Set the API key, discarding any existing connection.
    pub fn authenticate(&self, api_key: impl Into<ApiKey>) {
        self.update(|config| config.set_api_key(Some(api_key.into())));
    }

    /// Forget the API key and the connection built with it.
    pub fn flush_authentication(&self) {
        self.update(|config| config.set_api_key(None));
    }

    pub fn api_key(&self) -> Option<ApiKey> {
        self.read().api_key().cloned()
    }

    pub fn api_endpoint(&self) -> String {
        self.read().api_endpoint().to_string()
    }

    pub fn set_api_endpoint(&self, endpoint: impl Into<String>) {
        let endpoint = endpoint.into();
        self.update(|config| config.set_api_endpoint(Some(endpoint)));
    }

    /// The configured adapter, falling back to the process-wide default.
    pub fn adapter(&self) -> Adapter {
        self.read()
            .adapter()
            .cloned()
            .unwrap_or_else(global::default_adapter)
    }

    pub fn set_adapter(&self, adapter: Adapter) {
        self.update(|config| config.set_adapter(Some(adapter)));
    }

    pub fn proxy(&self) -> Option<String> {
        self.read().proxy().map(str::to_string)
    }

    pub fn set_proxy(&self, proxy: Option<String>) {
        self.update(|config| config.set_proxy(proxy));
    }

    pub fn custom_headers(&self) -> HashMap<String, String> {
        self.read().custom_headers().clone()
    }

    /// Replace the headers sent with every request.
    pub fn set_custom_headers(&self, headers: HashMap<String, String>) {
        self.update(|config| config.set_custom_headers(headers));
    }

    pub fn custom_user_agent(&self) -> Option<String> {
        self.read().custom_user_agent().map(str::to_string)
    }

    pub fn set_custom_user_agent(&self, user_agent: Option<String>) {
        self.update(|config| config.set_custom_user_agent(user_agent));
    }

    pub fn agent_identifier(&self) -> Option<String> {
        self.read().agent_identifier().map(str::to_string)
    }

    /// Set the agent identifier from one literal string or from
    /// `[name, version, dev_id]`.
    ///
    /// ```
    /// # use appoptics_metrics::Client;
    /// let client = Client::new();
    /// client.set_agent_identifier(&["test_app", "0.5", "foobar"]).unwrap();
    /// assert_eq!(client.agent_identifier().as_deref(), Some("test_app/0.5 (dev_id:foobar)"));
    /// assert!(client.set_agent_identifier(&["test_app", "0.5"]).is_err());
    /// ```
    pub fn set_agent_identifier(&self, parts: &[&str]) -> MetricsResult<()> {
        let identifier = compose_agent_identifier(parts)?;
        self.update(|config| config.set_agent_identifier(Some(identifier)));
        Ok(())
    }

    pub fn persistence(&self) -> Persistence {
        self.read().persistence()
    }

    /// Select the persistence used by queues created after this call.
    pub fn set_persistence(&self, persistence: Persistence) {
        self.write().set_persistence(persistence);
    }

    /// The persister used by the most recent [`Client::submit`].
    pub fn persister(&self) -> Option<Arc<dyn Persister>> {
        lock(&self.inner.last_persister).clone()
    }

    /// The connection for this client, built on first call.
    pub fn connection(&self) -> MetricsResult<Arc<Connection>> {
        // Read the config while holding the slot: an `update` that lands
        // after this read clears the slot only once we release it.
        let mut slot = lock(&self.inner.connection);
        let config = self.config();
        if config.api_key().map_or(true, ApiKey::is_empty) {
            return Err(MetricsError::CredentialsMissing);
        }
        if let Some(connection) = slot.as_ref() {
            return Ok(Arc::clone(connection));
        }

        let connection = Arc::new(Connection::new(ConnectionOptions {
            client: Some(self.clone()),
            api_endpoint: Some(config.api_endpoint().to_string()),
            adapter: config.adapter().cloned(),
            proxy: config.proxy().map(str::to_string),
        }));
        *slot = Some(Arc::clone(&connection));
        Ok(connection)
    }

    /// A queue bound to this client.
    pub fn new_queue(&self, options: QueueOptions) -> Queue {
        Queue::new(options.with_client(self.clone()))
    }

    /// Submit `(name, value)` pairs or measurements immediately.
    ///
    /// Bare pairs become gauges.
    #[instrument(skip(self, measurements))]
    pub async fn submit<I, M>(&self, measurements: I) -> MetricsResult<bool>
    where
        I: IntoIterator<Item = M>,
        M: Into<Measurement>,
    {
        let queue = self.new_queue(
            QueueOptions::default()
                .with_skip_measurement_times(true)
                .with_clear_failures(true),
        );
        queue.add(measurements)?;
        let persister = queue.persister();
        *lock(&self.inner.last_persister) = Some(persister);
        debug!(measurements = queue.size(), "Submitting measurements");
        queue.submit().await
    }

    fn read(&self) -> RwLockReadGuard<'_, ClientConfig> {
        self.inner
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ClientConfig> {
        self.inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a change that affects the transport and drop the cached connection.
    ///
    /// The config lock is released before the slot is taken; `connection`
    /// takes them in the opposite order.
    fn update(&self, change: impl FnOnce(&mut ClientConfig)) {
        change(&mut self.write());
        *lock(&self.inner.connection) = None;
    }
}

impl PartialEq for Client {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &*self.read())
            .finish()
    }
}

/// Compose an agent identifier from one literal or `[name, version, dev_id]`.
pub fn compose_agent_identifier(parts: &[&str]) -> MetricsResult<String> {
    match parts {
        [literal] => Ok(literal.to_string()),
        [name, version, dev_id] => Ok(format!("{name}/{version} (dev_id:{dev_id})")),
        _ => Err(MetricsError::InvalidParameters {
            message: format!(
                "agent_identifier accepts 1 or 3 arguments, got {}",
                parts.len()
            ),
        }),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
