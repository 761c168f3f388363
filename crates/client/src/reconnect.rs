//! Reconnect policy: exponential back-off with a cap.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub base_delay: Duration,
    /// Cap on the delay between attempts.
    pub max_delay: Duration,
    /// Consecutive failures before giving up. `0` retries forever.
    pub max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_retries: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay for the given attempt (0-indexed): `min(base · 2^n, max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(1u64 << attempt.min(30));
        Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as u64))
    }

    pub fn should_give_up(&self, attempt: u32) -> bool {
        self.max_retries > 0 && attempt >= self.max_retries
    }
}
