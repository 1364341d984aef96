use std::future::Future;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    proxy::{ProxyPool, ProxyProbe, Rotation},
    rate_limit::RateLimiter,
    response::{is_success_status, Outcome},
    transport::{RawResponse, Transport},
    ClientConfig, HttpClientError, Request, ResponseResult, Result,
};

const CANCELLED_MESSAGE: &str = "request cancelled";

/// Steps of one `execute` call. `Success` and `Exhausted` are terminal;
/// cancellation short-circuits from any waiting step.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Idle,
    RateLimiting { attempt: u32 },
    Dispatching { attempt: u32 },
    Failed { attempt: u32 },
    RotateProxy { attempt: u32 },
    Success,
    Exhausted,
}

/// What the most recent attempt observed.
#[derive(Debug, Default)]
struct LastAttempt {
    attempts: u32,
    status: u16,
    body: Vec<u8>,
    error: String,
    proxy: Option<String>,
}

impl LastAttempt {
    fn record(&mut self, attempt: u32, proxy: Option<String>, sent: Result<RawResponse>) {
        self.attempts = attempt;
        self.proxy = proxy;
        match sent {
            Ok(response) => {
                self.status = response.status;
                self.body = response.body;
                self.error.clear();
            }
            Err(err) => {
                self.status = 0;
                self.body.clear();
                self.error = match err {
                    HttpClientError::Transport(message) => message,
                    other => other.to_string(),
                };
            }
        }
    }

    fn finish(self, outcome: Outcome) -> ResponseResult {
        let error_message = if outcome == Outcome::Cancelled && self.error.is_empty() {
            CANCELLED_MESSAGE.to_owned()
        } else {
            self.error
        };
        ResponseResult {
            status_code: self.status,
            body: self.body,
            error_message,
            attempts_used: self.attempts,
            outcome,
            proxy: self.proxy,
        }
    }
}

/// Drives one logical request through pacing, dispatch, classification and rotation.
pub(crate) struct RequestExecutor<'a> {
    pub(crate) config: &'a ClientConfig,
    pub(crate) transport: &'a dyn Transport,
    pub(crate) probe: &'a dyn ProxyProbe,
    pub(crate) limiter: &'a Mutex<RateLimiter>,
    pub(crate) pool: &'a Mutex<ProxyPool>,
}

impl RequestExecutor<'_> {
    pub(crate) async fn execute(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> ResponseResult {
        let max_attempts = self.config.max_retries();
        let mut last = LastAttempt::default();
        let mut state = State::Idle;

        loop {
            state = match state {
                State::Idle => State::RateLimiting { attempt: 1 },
                State::RateLimiting { attempt } => {
                    let paced = until_cancelled(cancel, async {
                        self.limiter.lock().await.wait_if_needed().await;
                    })
                    .await;
                    if paced.is_none() {
                        return cancelled(last);
                    }
                    State::Dispatching { attempt }
                }
                State::Dispatching { attempt } => {
                    let proxy = self.pool.lock().await.active().map(str::to_owned);

                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        attempt,
                        max_attempts,
                        method = %request.method(),
                        url = request.url(),
                        proxied = proxy.is_some(),
                        "dispatching request"
                    );

                    let sent = until_cancelled(
                        cancel,
                        self.transport.send(request, proxy.as_deref(), self.config),
                    )
                    .await;
                    let Some(sent) = sent else {
                        last.attempts = attempt;
                        return cancelled(last);
                    };
                    last.record(attempt, proxy, sent);

                    if is_success_status(last.status) {
                        State::Success
                    } else {
                        State::Failed { attempt }
                    }
                }
                State::Failed { attempt } => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        attempt,
                        status = last.status,
                        error = %last.error,
                        "attempt failed"
                    );

                    if attempt < max_attempts {
                        State::RotateProxy { attempt }
                    } else {
                        State::Exhausted
                    }
                }
                State::RotateProxy { attempt } => {
                    let rotation = until_cancelled(cancel, async {
                        self.pool.lock().await.rotate(self.probe).await
                    })
                    .await;
                    match rotation {
                        None => return cancelled(last),
                        Some(Rotation::Exhausted) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(
                                "{}; retrying with the previous route",
                                HttpClientError::ProxyUnavailable
                            );
                        }
                        Some(Rotation::Empty | Rotation::Selected(_)) => {}
                    }
                    State::RateLimiting {
                        attempt: attempt + 1,
                    }
                }
                State::Success => return last.finish(Outcome::Success),
                State::Exhausted => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        attempts = last.attempts,
                        status = last.status,
                        "retries exhausted"
                    );

                    return last.finish(Outcome::Exhausted);
                }
            };
        }
    }
}

fn cancelled(last: LastAttempt) -> ResponseResult {
    #[cfg(feature = "tracing")]
    tracing::debug!(attempts = last.attempts, "request cancelled");

    last.finish(Outcome::Cancelled)
}

/// Runs `future` unless `cancel` fires first, in which case it is dropped.
async fn until_cancelled<F: Future>(cancel: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = future => Some(output),
    }
}
