use std::time::Duration;

use crate::pipeline::cancel::CancelToken;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Fixed-delay retry schedule for broker connections.
///
/// Attempts are unbounded unless [`ReconnectPolicy::max_attempts`] is set.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Give up after `max` consecutive failed attempts. `None` retries forever.
    pub fn max_attempts(mut self, max: Option<u32>) -> Self {
        self.max_attempts = max.map(|m| m.max(1));
        self
    }

    /// Whether another attempt is allowed after `failures` consecutive failures.
    pub fn allows(&self, failures: u32) -> bool {
        self.max_attempts.map_or(true, |max| failures < max)
    }

    /// Sleep for the configured delay. Returns `false` when cancelled first.
    pub async fn wait(&self, cancel: &CancelToken) -> bool {
        if self.delay.is_zero() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.delay) => true,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAY)
    }
}
