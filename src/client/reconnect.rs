use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the connection driver retries after the transport drops or fails to open.
///
/// The delay before attempt `n` (zero based) is `initial_delay * multiplier^n`, capped
/// at `max_delay`. The attempt counter restarts after every acknowledged handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconnectPolicy {
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    #[serde(with = "crate::config::millis")]
    pub initial_delay: Duration,
    #[serde(with = "crate::config::millis")]
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(20),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2,
        }
    }
}

impl ReconnectPolicy {
    /// Retry immediately, forever.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1,
        }
    }

    /// Delay before reconnect attempt `attempt`, or `None` once the budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| attempt >= max) {
            return None;
        }

        let factor = self.multiplier.saturating_pow(attempt);
        Some(self.initial_delay.saturating_mul(factor).min(self.max_delay))
    }
}
