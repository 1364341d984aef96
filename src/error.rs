/// Error type returned by this crate.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HttpClientError {
    /// Connection, timeout or TLS failure at the network layer.
    #[error("transport error: {0}")]
    Transport(String),
    /// No proxy in the pool passed the liveness probe during a rotation.
    #[error("no healthy proxy found")]
    ProxyUnavailable,
    /// Every configured attempt failed.
    #[error("retries exhausted after {attempts} attempt(s), last status {status}: {message}")]
    RetriesExhausted {
        /// Number of attempts performed.
        attempts: u32,
        /// Status code of the final attempt (0 if the transport never completed).
        status: u16,
        /// Error text of the final attempt, empty for plain HTTP failures.
        message: String,
    },
    /// Execution was cancelled through its cancellation token.
    #[error("request cancelled after {attempts} attempt(s)")]
    Cancelled {
        /// Number of attempts started before cancellation.
        attempts: u32,
    },
    /// Malformed configuration detected at construction time.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl HttpClientError {
    pub(crate) fn transport(err: reqwest::Error) -> Self {
        Self::Transport(describe_reqwest_error(&err))
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Flattens a `reqwest` error and its source chain into one line.
fn describe_reqwest_error(err: &reqwest::Error) -> String {
    let mut text = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        let inner_text = inner.to_string();
        if !text.contains(&inner_text) {
            text.push_str(": ");
            text.push_str(&inner_text);
        }
        source = inner.source();
    }
    text
}
