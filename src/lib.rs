//! `resilient-http` is an async HTTP client that retries transient failures,
//! rotates through a pool of proxies and paces requests.
//!
//! Every call runs the same pipeline:
//! - wait for the [`RateLimiter`] interval
//! - dispatch through the [`Transport`] with the active proxy
//! - on a non-2xx status or transport error, [`ProxyPool::rotate`] and retry
//!
//! Failures are returned as data on [`ResponseResult`], never as errors.
//!
//! ```no_run
//! use resilient_http::{ClientConfig, HttpClient};
//!
//! # async fn run() -> resilient_http::Result<()> {
//! let config = ClientConfig::builder()
//!     .max_retries(5)
//!     .proxy("http://10.0.0.1:8080")
//!     .build()?;
//! let client = HttpClient::new(config);
//! let response = client.get("https://example.com").await.error_for_status()?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod executor;
mod options;
mod proxy;
mod rate_limit;
mod request;
mod response;
mod transport;

pub use client::HttpClient;
pub use error::HttpClientError;
pub use options::{ClientConfig, ClientConfigBuilder, UserAgentPool};
pub use proxy::{ProxyEntry, ProxyHealth, ProxyPool, ProxyProbe, ReqwestProbe, Rotation};
pub use rate_limit::RateLimiter;
pub use request::{Request, FORM_URLENCODED};
pub use response::{Outcome, ResponseResult};
pub use transport::{RawResponse, ReqwestTransport, Transport};

pub use reqwest::Method;
pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, HttpClientError>;
