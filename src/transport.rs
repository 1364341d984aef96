use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, redirect};

use crate::{proxy::redact_proxy, ClientConfig, HttpClientError, Request, Result};

/// What a single completed attempt returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Performs one physical dispatch of a request.
///
/// Implementations must honor the timeouts, redirect policy and TLS
/// verification setting in `config`. Network failures are reported as
/// [`HttpClientError::Transport`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &Request,
        proxy: Option<&str>,
        config: &ClientConfig,
    ) -> Result<RawResponse>;
}

/// [`Transport`] backed by `reqwest`.
///
/// Proxies, timeouts, redirect policy and TLS verification are client-level
/// settings in `reqwest`, so one client is built and cached per proxy address
/// and distinct set of those settings. A shared transport therefore honors
/// every config it is handed.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    clients: Arc<Mutex<HashMap<ClientKey, reqwest::Client>>>,
}

/// Everything a cached `reqwest::Client` is built from.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct ClientKey {
    proxy: Option<String>,
    connect_timeout: Duration,
    total_timeout: Duration,
    follow_redirects: bool,
    max_redirects: usize,
    verify_tls: bool,
}

impl ClientKey {
    fn new(proxy: Option<&str>, config: &ClientConfig) -> Self {
        Self {
            proxy: proxy.map(str::to_owned),
            connect_timeout: config.connect_timeout(),
            total_timeout: config.total_timeout(),
            follow_redirects: config.follow_redirects(),
            max_redirects: config.max_redirects(),
            verify_tls: config.verify_tls(),
        }
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("ReqwestTransport")
            .field("cached_clients", &cached)
            .finish()
    }
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn client_for(&self, proxy: Option<&str>, config: &ClientConfig) -> Result<reqwest::Client> {
        let key = ClientKey::new(proxy, config);
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        let client = build_client(proxy, config)?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

fn build_client(proxy: Option<&str>, config: &ClientConfig) -> Result<reqwest::Client> {
    let redirect_policy = if config.follow_redirects() {
        redirect::Policy::limited(config.max_redirects())
    } else {
        redirect::Policy::none()
    };

    let mut builder = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout())
        .timeout(config.total_timeout())
        .redirect(redirect_policy)
        .danger_accept_invalid_certs(!config.verify_tls())
        .http1_only();

    builder = match proxy {
        Some(address) => {
            let proxy = reqwest::Proxy::all(address).map_err(|err| {
                HttpClientError::Transport(format!(
                    "invalid proxy {}: {err}",
                    redact_proxy(address)
                ))
            })?;
            builder.proxy(proxy)
        }
        None => builder.no_proxy(),
    };

    builder.build().map_err(HttpClientError::transport)
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: &Request,
        proxy: Option<&str>,
        config: &ClientConfig,
    ) -> Result<RawResponse> {
        let client = self.client_for(proxy, config)?;
        let url = request.resolve_url(config.base_url())?;

        let mut builder = client.request(request.method().clone(), url);
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body() {
            let declared = request
                .headers()
                .keys()
                .any(|name| name.eq_ignore_ascii_case(header::CONTENT_TYPE.as_str()));
            if let (Some(content_type), false) = (request.content_type(), declared) {
                builder = builder.header(header::CONTENT_TYPE, content_type);
            }
            builder = builder.body(body.to_vec());
        }

        let response = builder.send().await.map_err(HttpClientError::transport)?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(HttpClientError::transport)?;

        Ok(RawResponse {
            status,
            body: body.to_vec(),
        })
    }
}
