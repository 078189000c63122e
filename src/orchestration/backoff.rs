use rand::Rng;
use std::time::Duration;

use crate::config::BackoffConfig;

/// Exponential backoff with proportional jitter for requeued dispatch jobs
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_secs(config.max_delay_seconds),
            jitter_ratio: config.jitter_ratio,
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.powi(exponent);
        let max_secs = self.max_delay.as_secs_f64();
        let base_secs = (self.initial_delay.as_secs_f64() * factor).min(max_secs);

        let jittered_secs = if self.jitter_ratio > 0.0 {
            let jitter = rand::thread_rng().gen_range(-self.jitter_ratio..=self.jitter_ratio);
            base_secs * (1.0 + jitter)
        } else {
            base_secs
        };

        Duration::from_secs_f64(jittered_secs.clamp(0.0, max_secs))
    }
}
