use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tokio::time::Instant;

/// Last known health of a proxy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProxyHealth {
    /// The proxy has not been probed yet.
    Untested,
    /// The most recent probe succeeded.
    Healthy,
    /// The most recent probe failed.
    Unhealthy,
}

/// One proxy endpoint in a [`ProxyPool`].
#[derive(Clone, PartialEq)]
pub struct ProxyEntry {
    address: String,
    health: ProxyHealth,
    last_probed: Option<Instant>,
}

impl ProxyEntry {
    fn new(address: String) -> Self {
        Self {
            address,
            health: ProxyHealth::Untested,
            last_probed: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn health(&self) -> ProxyHealth {
        self.health
    }

    pub fn last_probed(&self) -> Option<Instant> {
        self.last_probed
    }

    fn cooling_down(&self, now: Instant, cooldown: Duration) -> bool {
        if cooldown.is_zero() || self.health != ProxyHealth::Unhealthy {
            return false;
        }
        self.last_probed
            .is_some_and(|probed| now.saturating_duration_since(probed) < cooldown)
    }
}

impl fmt::Debug for ProxyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyEntry")
            .field("address", &redact_proxy(&self.address))
            .field("health", &self.health)
            .field("last_probed", &self.last_probed)
            .finish()
    }
}

/// Result of a single [`ProxyPool::rotate`] call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Rotation {
    /// The pool has no entries; nothing changed.
    Empty,
    /// A proxy passed the probe and is now active.
    Selected(String),
    /// Every entry failed the probe; the active proxy is unchanged.
    Exhausted,
}

/// Best-effort liveness check of a proxy.
#[async_trait]
pub trait ProxyProbe: Send + Sync {
    /// Returns `true` when a request through `proxy` completes.
    async fn probe(&self, proxy: &str) -> bool;
}

/// Probes a proxy by fetching a fixed target through it with a short timeout.
///
/// Any completed HTTP exchange counts as alive, whatever its status.
#[derive(Clone, Debug)]
pub struct ReqwestProbe {
    target: Url,
    timeout: Duration,
}

impl ReqwestProbe {
    pub fn new(target: Url, timeout: Duration) -> Self {
        Self { target, timeout }
    }
}

#[async_trait]
impl ProxyProbe for ReqwestProbe {
    async fn probe(&self, proxy: &str) -> bool {
        let Ok(proxy) = reqwest::Proxy::all(proxy) else {
            return false;
        };
        let Ok(client) = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .build()
        else {
            return false;
        };
        client.get(self.target.clone()).send().await.is_ok()
    }
}

/// Ordered set of proxies rotated in insertion order.
#[derive(Clone, Debug, Default)]
pub struct ProxyPool {
    entries: Vec<ProxyEntry>,
    cursor: Option<usize>,
    active: Option<usize>,
    cooldown: Duration,
}

impl ProxyPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a pool with `addresses` in order.
    pub fn from_addresses<I>(addresses: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut pool = Self::new();
        for address in addresses {
            pool.add(address);
        }
        pool
    }

    /// Skips entries that failed a probe less than `cooldown` ago.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Appends an untested entry. Duplicates are kept.
    pub fn add(&mut self, address: impl Into<String>) {
        self.entries.push(ProxyEntry::new(address.into()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ProxyEntry] {
        &self.entries
    }

    /// Position of the last candidate visited by rotation, `None` before the first.
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Address of the proxy attempts are currently routed through.
    pub fn active(&self) -> Option<&str> {
        self.active
            .and_then(|index| self.entries.get(index))
            .map(ProxyEntry::address)
    }

    /// Probes entries starting after the cursor and activates the first live one.
    ///
    /// Visits each entry at most once. The cursor advances for every
    /// candidate, including the ones skipped while cooling down.
    pub async fn rotate(&mut self, probe: &dyn ProxyProbe) -> Rotation {
        let len = self.entries.len();
        if len == 0 {
            return Rotation::Empty;
        }

        for _ in 0..len {
            let index = self.cursor.map_or(0, |cursor| (cursor + 1) % len);
            self.cursor = Some(index);

            let entry = &mut self.entries[index];
            if entry.cooling_down(Instant::now(), self.cooldown) {
                #[cfg(feature = "tracing")]
                tracing::trace!(proxy = %redact_proxy(&entry.address), "skipping proxy in cooldown");
                continue;
            }

            let alive = probe.probe(&entry.address).await;
            entry.last_probed = Some(Instant::now());
            if alive {
                entry.health = ProxyHealth::Healthy;
                self.active = Some(index);

                #[cfg(feature = "tracing")]
                tracing::debug!(proxy = %redact_proxy(&entry.address), index, "selected proxy");

                return Rotation::Selected(entry.address.clone());
            }

            entry.health = ProxyHealth::Unhealthy;
            #[cfg(feature = "tracing")]
            tracing::debug!(proxy = %redact_proxy(&entry.address), index, "proxy failed liveness probe");
        }

        Rotation::Exhausted
    }
}

/// Hides the userinfo part of a proxy address.
pub(crate) fn redact_proxy(address: &str) -> String {
    let (scheme, rest) = match address.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, address),
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let Some(at) = rest[..authority_end].rfind('@') else {
        return address.to_owned();
    };
    let host = &rest[at + 1..];
    match scheme {
        Some(scheme) => format!("{scheme}://<redacted>@{host}"),
        None => format!("<redacted>@{host}"),
    }
}
