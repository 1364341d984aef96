use crate::{HttpClientError, Result};

/// Terminal state of one `execute` call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// An attempt returned a 2xx status.
    Success,
    /// Every attempt failed.
    Exhausted,
    /// The cancellation token fired before a terminal state was reached.
    Cancelled,
}

/// Final result of a request, returned as data rather than as an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseResult {
    /// Status of the last attempt, 0 if the transport never completed.
    pub status_code: u16,
    pub body: Vec<u8>,
    /// Transport error text of the last attempt, empty if none.
    pub error_message: String,
    pub attempts_used: u32,
    pub outcome: Outcome,
    /// Proxy the last attempt was routed through.
    pub proxy: Option<String>,
}

impl ResponseResult {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Converts a non-successful result into an error for `?` call sites.
    pub fn error_for_status(self) -> Result<Self> {
        match self.outcome {
            Outcome::Success => Ok(self),
            Outcome::Exhausted => Err(HttpClientError::RetriesExhausted {
                attempts: self.attempts_used,
                status: self.status_code,
                message: self.error_message,
            }),
            Outcome::Cancelled => Err(HttpClientError::Cancelled {
                attempts: self.attempts_used,
            }),
        }
    }
}

/// Classifies a status code: success iff it lies in `[200, 300)`.
pub(crate) fn is_success_status(status: u16) -> bool {
    (200..300).contains(&status)
}
