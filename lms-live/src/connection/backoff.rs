//! Reconnect backoff policy
//!
//! Exponential backoff with jitter:
//! `min(base * 2^(attempt-1), max) * (1 + (random*2 - 1) * jitter)`

use lms_common::config::ReconnectConfig;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Retries after a failure before going offline
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 0.0 - 1.0
    pub jitter_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_factor: config.jitter_factor,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_with_random(attempt, rand::random::<f64>())
    }

    /// Deterministic variant; `random` is in [0, 1)
    pub fn delay_with_random(&self, attempt: u32, random: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let capped = (base_ms * 2f64.powi(exponent as i32)).min(max_ms);

        let jitter = self.jitter_factor.clamp(0.0, 1.0);
        let factor = 1.0 + (random.clamp(0.0, 1.0) * 2.0 - 1.0) * jitter;
        Duration::from_millis((capped * factor).round().max(0.0) as u64)
    }
}
