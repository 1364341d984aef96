use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    executor::RequestExecutor,
    options::validate_proxy_address,
    proxy::{ProxyEntry, ProxyPool, ProxyProbe, ReqwestProbe},
    rate_limit::RateLimiter,
    transport::{ReqwestTransport, Transport},
    ClientConfig, Request, ResponseResult, Result,
};

const USER_AGENT: &str = "User-Agent";

/// HTTP client with retries, proxy rotation and request pacing.
///
/// Cloning is cheap; clones share the rate limiter and the proxy pool, so
/// pacing and rotation stay serialized across every clone and task.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    probe: Arc<dyn ProxyProbe>,
    limiter: Mutex<RateLimiter>,
    pool: Mutex<ProxyPool>,
    user_agent: Option<String>,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("config", &self.inner.config)
            .field("user_agent", &self.inner.user_agent)
            .finish()
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl HttpClient {
    /// Creates a client that dispatches through `reqwest`.
    pub fn new(config: ClientConfig) -> Self {
        let probe = ReqwestProbe::new(config.probe_target().clone(), config.probe_timeout());
        Self::with_transport(config, Arc::new(ReqwestTransport::new()), Arc::new(probe))
    }

    /// Creates a client with a custom transport and proxy probe.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        probe: Arc<dyn ProxyProbe>,
    ) -> Self {
        let pool = ProxyPool::from_addresses(config.proxies().iter().cloned())
            .with_cooldown(config.proxy_cooldown());
        let limiter = RateLimiter::new(config.request_delay());
        let user_agent = pick_user_agent(&config);

        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                probe,
                limiter: Mutex::new(limiter),
                pool: Mutex::new(pool),
                user_agent,
            }),
        }
    }

    /// Creates a client from `RESILIENT_HTTP_*` environment variables.
    ///
    /// See [`ClientConfig::from_env`] for the recognized names.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(ClientConfig::from_env()?))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// `User-Agent` chosen at construction, if random user agents are enabled.
    pub fn user_agent(&self) -> Option<&str> {
        self.inner.user_agent.as_deref()
    }

    /// Appends a proxy to the rotation.
    pub async fn add_proxy(&self, address: impl Into<String>) -> Result<()> {
        let address = address.into();
        validate_proxy_address(&address)?;
        self.inner.pool.lock().await.add(address);
        Ok(())
    }

    /// Snapshot of the pool, including each entry's last known health.
    pub async fn proxies(&self) -> Vec<ProxyEntry> {
        self.inner.pool.lock().await.entries().to_vec()
    }

    pub async fn active_proxy(&self) -> Option<String> {
        self.inner.pool.lock().await.active().map(str::to_owned)
    }

    /// Changes the pacing interval for subsequent dispatches.
    pub async fn set_request_delay(&self, delay: Duration) {
        self.inner.limiter.lock().await.set_delay(delay);
    }

    pub async fn get(&self, url: &str) -> ResponseResult {
        self.execute(&Request::get(url)).await
    }

    /// Sends a `GET` with URL-encoded query parameters.
    pub async fn get_with_query<I, K, V>(&self, url: &str, params: I) -> ResponseResult
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.execute(&Request::get(url).with_query(params)).await
    }

    pub async fn post(
        &self,
        url: &str,
        body: impl Into<Vec<u8>>,
        content_type: &str,
    ) -> ResponseResult {
        self.execute(&Request::post(url, body, content_type)).await
    }

    /// Sends an `application/x-www-form-urlencoded` `POST`.
    pub async fn post_form<I, K, V>(&self, url: &str, pairs: I) -> ResponseResult
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.execute(&Request::post_form(url, pairs)).await
    }

    /// Executes `request` with retries. Never fails; inspect the result's outcome.
    pub async fn execute(&self, request: &Request) -> ResponseResult {
        self.execute_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), but stops as soon as `cancel` fires.
    ///
    /// The in-flight step (pacing, dispatch or rotation) is dropped and the
    /// result carries [`Outcome::Cancelled`](crate::Outcome::Cancelled).
    pub async fn execute_with_cancel(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> ResponseResult {
        let inner = &*self.inner;
        let prepared = self.prepare(request);
        let executor = RequestExecutor {
            config: &inner.config,
            transport: inner.transport.as_ref(),
            probe: inner.probe.as_ref(),
            limiter: &inner.limiter,
            pool: &inner.pool,
        };
        executor.execute(&prepared, cancel).await
    }

    fn prepare(&self, request: &Request) -> Request {
        let inner = &*self.inner;
        let user_agent = inner
            .user_agent
            .as_deref()
            .map(|value| (USER_AGENT, value));
        let defaults = inner
            .config
            .default_headers()
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()));
        request.with_defaults(defaults.chain(user_agent))
    }
}

fn pick_user_agent(config: &ClientConfig) -> Option<String> {
    if !config.random_user_agent() {
        return None;
    }
    let overridden = config
        .default_headers()
        .keys()
        .any(|name| name.eq_ignore_ascii_case(USER_AGENT));
    if overridden {
        return None;
    }
    config.user_agents().pick()
}
