use std::time::Duration;

use tokio::time::{sleep, Instant};

/// Enforces a minimum interval between consecutive dispatches.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    delay: Duration,
    last_dispatch: Option<Instant>,
}

impl RateLimiter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_dispatch: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay;
    }

    pub fn last_dispatch(&self) -> Option<Instant> {
        self.last_dispatch
    }

    /// Sleeps until `delay` has passed since the last dispatch, then records now.
    ///
    /// The timestamp is recorded even when the delay is zero so that a later
    /// [`set_delay`](Self::set_delay) takes effect from the right point.
    pub async fn wait_if_needed(&mut self) {
        if let Some(remaining) = self.remaining(Instant::now()) {
            #[cfg(feature = "tracing")]
            tracing::debug!("pacing next dispatch by {} ms", remaining.as_millis());

            sleep(remaining).await;
        }
        self.last_dispatch = Some(Instant::now());
    }

    fn remaining(&self, now: Instant) -> Option<Duration> {
        if self.delay.is_zero() {
            return None;
        }
        let elapsed = now.saturating_duration_since(self.last_dispatch?);
        self.delay
            .checked_sub(elapsed)
            .filter(|remaining| !remaining.is_zero())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}
