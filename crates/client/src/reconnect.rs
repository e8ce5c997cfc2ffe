//! Jittered exponential back-off for callers that choose to retry a failed
//! connect. The client itself never retries.

use std::time::Duration;

use mc_domain::config::ReconnectConfig;
use rand::Rng;

/// Delay schedule between connect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    pub initial_delay: Duration,
    /// Cap applied before jitter.
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Attempts allowed before giving up. `0` means unlimited.
    pub max_attempts: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectBackoff {
    fn from(cfg: &ReconnectConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            backoff_factor: cfg.backoff_factor.max(1.0),
            max_attempts: cfg.max_attempts,
        }
    }
}

impl ReconnectBackoff {
    /// Un-jittered delay before retry number `attempt` (0-indexed).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.backoff_factor.powi(attempt.min(63) as i32);
        Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as f64) as u64)
    }

    /// [`base_delay`](Self::base_delay) plus up to 25% random jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = base.mul_f64(0.25 * rand::thread_rng().gen::<f64>());
        base + jitter
    }

    /// Whether `attempts` failures exhaust the budget.
    pub fn should_give_up(&self, attempts: u32) -> bool {
        self.max_attempts > 0 && attempts >= self.max_attempts
    }
}
