use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use rand::seq::IndexedRandom;
use reqwest::Url;
use serde::Deserialize;

use crate::{proxy::redact_proxy, HttpClientError, Result};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_REDIRECTS: usize = 5;
const DEFAULT_PROBE_TARGET: &str = "https://www.google.com";
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const ENV_PREFIX: &str = "RESILIENT_HTTP_";

/// Operating system and browser fragments combined into random `User-Agent` values.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct UserAgentPool {
    pub os: Vec<String>,
    pub browsers: Vec<String>,
}

impl UserAgentPool {
    pub fn new<O, B>(os: O, browsers: B) -> Self
    where
        O: IntoIterator,
        O::Item: Into<String>,
        B: IntoIterator,
        B::Item: Into<String>,
    {
        Self {
            os: os.into_iter().map(Into::into).collect(),
            browsers: browsers.into_iter().map(Into::into).collect(),
        }
    }

    /// Picks a random combination, or `None` when either list is empty.
    pub fn pick(&self) -> Option<String> {
        let mut rng = rand::rng();
        let os = self.os.choose(&mut rng)?;
        let browser = self.browsers.choose(&mut rng)?;
        Some(format!(
            "Mozilla/5.0 ({os}) AppleWebKit/537.36 (KHTML, like Gecko) {browser}"
        ))
    }
}

impl Default for UserAgentPool {
    fn default() -> Self {
        Self::new(
            [
                "Windows NT 10.0",
                "Macintosh; Intel Mac OS X 10_15_7",
                "X11; Ubuntu",
                "Android 12; SM-S908B",
            ],
            [
                "Chrome/100.0.4896.127",
                "Firefox/99.0",
                "Safari/605.1.15",
                "Edge/100.0.1185.39",
            ],
        )
    }
}

/// Immutable client configuration.
///
/// Construct through [`ClientConfig::builder`], [`ClientConfig::from_json_str`]
/// or [`ClientConfig::from_env`]; every path validates the same way.
#[derive(Clone, PartialEq)]
pub struct ClientConfig {
    max_retries: u32,
    request_delay: Duration,
    connect_timeout: Duration,
    total_timeout: Duration,
    follow_redirects: bool,
    max_redirects: usize,
    verify_tls: bool,
    proxies: Vec<String>,
    base_url: Option<Url>,
    default_headers: BTreeMap<String, String>,
    random_user_agent: bool,
    user_agents: UserAgentPool,
    probe_target: Url,
    probe_timeout: Duration,
    proxy_cooldown: Duration,
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Ceiling on attempts per `execute` call.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Minimum spacing between two consecutive dispatches.
    pub fn request_delay(&self) -> Duration {
        self.request_delay
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn total_timeout(&self) -> Duration {
        self.total_timeout
    }

    pub fn follow_redirects(&self) -> bool {
        self.follow_redirects
    }

    pub fn max_redirects(&self) -> usize {
        self.max_redirects
    }

    /// `false` disables certificate and hostname verification.
    pub fn verify_tls(&self) -> bool {
        self.verify_tls
    }

    /// Proxies seeded into the pool, in rotation order.
    pub fn proxies(&self) -> &[String] {
        &self.proxies
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    pub fn default_headers(&self) -> &BTreeMap<String, String> {
        &self.default_headers
    }

    pub fn random_user_agent(&self) -> bool {
        self.random_user_agent
    }

    pub fn user_agents(&self) -> &UserAgentPool {
        &self.user_agents
    }

    /// Fixed target the proxy liveness probe connects to.
    pub fn probe_target(&self) -> &Url {
        &self.probe_target
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// How long an unhealthy proxy is skipped by rotation. Zero re-probes every time.
    pub fn proxy_cooldown(&self) -> Duration {
        self.proxy_cooldown
    }

    /// Parses a JSON document with millisecond duration fields.
    ///
    /// ```
    /// use resilient_http::ClientConfig;
    ///
    /// let config = ClientConfig::from_json_str(r#"{"max_retries": 5, "request_delay_ms": 250}"#)
    ///     .unwrap();
    /// assert_eq!(config.max_retries(), 5);
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(json)
            .map_err(|err| HttpClientError::invalid_config(format!("malformed config JSON: {err}")))?;
        file.into_builder().build()
    }

    /// Creates a config from `RESILIENT_HTTP_*` environment variables.
    ///
    /// Recognized: `MAX_RETRIES`, `REQUEST_DELAY_MS`, `CONNECT_TIMEOUT_MS`,
    /// `TOTAL_TIMEOUT_MS`, `FOLLOW_REDIRECTS`, `MAX_REDIRECTS`, `VERIFY_TLS`,
    /// `PROXIES` (comma separated) and `BASE_URL`. Unset variables keep their
    /// defaults; unparsable values are rejected.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(format!("{ENV_PREFIX}{name}")).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();
        if let Some(value) = lookup("MAX_RETRIES") {
            builder = builder.max_retries(parse_env("MAX_RETRIES", &value)?);
        }
        if let Some(value) = lookup("REQUEST_DELAY_MS") {
            builder = builder.request_delay(Duration::from_millis(parse_env(
                "REQUEST_DELAY_MS",
                &value,
            )?));
        }
        if let Some(value) = lookup("CONNECT_TIMEOUT_MS") {
            builder = builder.connect_timeout(Duration::from_millis(parse_env(
                "CONNECT_TIMEOUT_MS",
                &value,
            )?));
        }
        if let Some(value) = lookup("TOTAL_TIMEOUT_MS") {
            builder = builder.total_timeout(Duration::from_millis(parse_env(
                "TOTAL_TIMEOUT_MS",
                &value,
            )?));
        }
        if let Some(value) = lookup("FOLLOW_REDIRECTS") {
            builder = builder.follow_redirects(parse_env("FOLLOW_REDIRECTS", &value)?);
        }
        if let Some(value) = lookup("MAX_REDIRECTS") {
            builder = builder.max_redirects(parse_env("MAX_REDIRECTS", &value)?);
        }
        if let Some(value) = lookup("VERIFY_TLS") {
            builder = builder.verify_tls(parse_env("VERIFY_TLS", &value)?);
        }
        if let Some(value) = lookup("PROXIES") {
            builder = builder.proxies(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|proxy| !proxy.is_empty()),
            );
        }
        if let Some(value) = lookup("BASE_URL") {
            builder = builder.base_url(value);
        }
        builder.build()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            request_delay: Duration::ZERO,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            total_timeout: DEFAULT_TOTAL_TIMEOUT,
            follow_redirects: true,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            verify_tls: true,
            proxies: Vec::new(),
            base_url: None,
            default_headers: BTreeMap::new(),
            random_user_agent: true,
            user_agents: UserAgentPool::default(),
            probe_target: default_probe_target(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            proxy_cooldown: Duration::ZERO,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proxies: Vec<String> = self.proxies.iter().map(|p| redact_proxy(p)).collect();
        f.debug_struct("ClientConfig")
            .field("max_retries", &self.max_retries)
            .field("request_delay", &self.request_delay)
            .field("connect_timeout", &self.connect_timeout)
            .field("total_timeout", &self.total_timeout)
            .field("follow_redirects", &self.follow_redirects)
            .field("max_redirects", &self.max_redirects)
            .field("verify_tls", &self.verify_tls)
            .field("proxies", &proxies)
            .field("base_url", &self.base_url.as_ref().map(Url::as_str))
            .field("default_headers", &self.default_headers.keys())
            .field("random_user_agent", &self.random_user_agent)
            .field("probe_target", &self.probe_target.as_str())
            .field("probe_timeout", &self.probe_timeout)
            .field("proxy_cooldown", &self.proxy_cooldown)
            .finish()
    }
}

/// Builder producing a validated [`ClientConfig`]. Consumed by [`build`](Self::build).
#[derive(Clone, Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
    base_url: Option<String>,
    probe_target: Option<String>,
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self {
            config: ClientConfig::default(),
            base_url: None,
            probe_target: None,
        }
    }
}

impl ClientConfigBuilder {
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn request_delay(mut self, delay: Duration) -> Self {
        self.config.request_delay = delay;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn total_timeout(mut self, timeout: Duration) -> Self {
        self.config.total_timeout = timeout;
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.config.max_redirects = max_redirects;
        self
    }

    /// Passing `false` accepts any certificate. Insecure; opt-in only.
    pub fn verify_tls(mut self, verify: bool) -> Self {
        self.config.verify_tls = verify;
        self
    }

    pub fn proxy(mut self, address: impl Into<String>) -> Self {
        self.config.proxies.push(address.into());
        self
    }

    pub fn proxies<I>(mut self, addresses: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.config
            .proxies
            .extend(addresses.into_iter().map(Into::into));
        self
    }

    /// Relative request URLs are joined onto this base.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config
            .default_headers
            .insert(name.into(), value.into());
        self
    }

    pub fn random_user_agent(mut self, enabled: bool) -> Self {
        self.config.random_user_agent = enabled;
        self
    }

    pub fn user_agents(mut self, pool: UserAgentPool) -> Self {
        self.config.user_agents = pool;
        self
    }

    pub fn probe_target(mut self, target: impl Into<String>) -> Self {
        self.probe_target = Some(target.into());
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.config.probe_timeout = timeout;
        self
    }

    pub fn proxy_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.proxy_cooldown = cooldown;
        self
    }

    /// Validates and returns the finished configuration.
    pub fn build(self) -> Result<ClientConfig> {
        let mut config = self.config;

        if config.max_retries == 0 {
            return Err(HttpClientError::invalid_config(
                "max_retries must be a positive integer",
            ));
        }
        if config.connect_timeout.is_zero() {
            return Err(HttpClientError::invalid_config(
                "connect_timeout must be greater than zero",
            ));
        }
        if config.total_timeout.is_zero() {
            return Err(HttpClientError::invalid_config(
                "total_timeout must be greater than zero",
            ));
        }
        if config.probe_timeout.is_zero() {
            return Err(HttpClientError::invalid_config(
                "probe_timeout must be greater than zero",
            ));
        }
        for proxy in &config.proxies {
            validate_proxy_address(proxy)?;
        }
        if let Some(base_url) = self.base_url {
            config.base_url = Some(parse_url("base_url", &base_url)?);
        }
        if let Some(target) = self.probe_target {
            config.probe_target = parse_url("probe_target", &target)?;
        }

        Ok(config)
    }
}

pub(crate) fn validate_proxy_address(address: &str) -> Result<()> {
    if address.trim().is_empty() {
        return Err(HttpClientError::invalid_config("proxy address is empty"));
    }
    reqwest::Proxy::all(address).map(|_| ()).map_err(|err| {
        HttpClientError::invalid_config(format!(
            "invalid proxy address {}: {err}",
            redact_proxy(address)
        ))
    })
}

fn parse_url(field: &str, value: &str) -> Result<Url> {
    Url::parse(value.trim())
        .map_err(|err| HttpClientError::invalid_config(format!("invalid {field} '{value}': {err}")))
}

fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|err| {
        HttpClientError::invalid_config(format!("{ENV_PREFIX}{name}='{value}': {err}"))
    })
}

fn default_probe_target() -> Url {
    Url::parse(DEFAULT_PROBE_TARGET).unwrap_or_else(|_| unreachable!("static probe target"))
}

/// On-disk shape accepted by [`ClientConfig::from_json_str`].
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    max_retries: Option<u32>,
    request_delay_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    total_timeout_ms: Option<u64>,
    follow_redirects: Option<bool>,
    max_redirects: Option<usize>,
    verify_tls: Option<bool>,
    proxies: Vec<String>,
    base_url: Option<String>,
    default_headers: BTreeMap<String, String>,
    random_user_agent: Option<bool>,
    user_agents: Option<UserAgentPool>,
    probe_target: Option<String>,
    probe_timeout_ms: Option<u64>,
    proxy_cooldown_ms: Option<u64>,
}

impl ConfigFile {
    fn into_builder(self) -> ClientConfigBuilder {
        let mut builder = ClientConfig::builder().proxies(self.proxies);
        if let Some(value) = self.max_retries {
            builder = builder.max_retries(value);
        }
        if let Some(value) = self.request_delay_ms {
            builder = builder.request_delay(Duration::from_millis(value));
        }
        if let Some(value) = self.connect_timeout_ms {
            builder = builder.connect_timeout(Duration::from_millis(value));
        }
        if let Some(value) = self.total_timeout_ms {
            builder = builder.total_timeout(Duration::from_millis(value));
        }
        if let Some(value) = self.follow_redirects {
            builder = builder.follow_redirects(value);
        }
        if let Some(value) = self.max_redirects {
            builder = builder.max_redirects(value);
        }
        if let Some(value) = self.verify_tls {
            builder = builder.verify_tls(value);
        }
        if let Some(value) = self.base_url {
            builder = builder.base_url(value);
        }
        for (name, value) in self.default_headers {
            builder = builder.default_header(name, value);
        }
        if let Some(value) = self.random_user_agent {
            builder = builder.random_user_agent(value);
        }
        if let Some(value) = self.user_agents {
            builder = builder.user_agents(value);
        }
        if let Some(value) = self.probe_target {
            builder = builder.probe_target(value);
        }
        if let Some(value) = self.probe_timeout_ms {
            builder = builder.probe_timeout(Duration::from_millis(value));
        }
        if let Some(value) = self.proxy_cooldown_ms {
            builder = builder.proxy_cooldown(Duration::from_millis(value));
        }
        builder
    }
}
