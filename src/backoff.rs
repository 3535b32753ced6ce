use crate::config::RetryConfig;
use rand::Rng;
use std::time::Duration;

/// Retry delay for rescheduled URIs: `base * 2^attempt`, capped, plus jitter.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    base_ms: u64,
    max_ms: u64,
    jitter_percent: u64,
}

impl ExponentialBackoff {
    pub const fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            jitter_percent: 10,
        }
    }

    pub fn from_config(retry: &RetryConfig) -> Self {
        Self::new(retry.base_delay_ms, retry.max_delay_ms)
    }

    pub fn with_jitter(mut self, jitter_percent: u64) -> Self {
        self.jitter_percent = jitter_percent.min(100);
        self
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let exponential_delay = self.base_ms.saturating_mul(2u64.saturating_pow(attempt.min(20)));
        let capped_delay = exponential_delay.min(self.max_ms);
        let jitter = if self.jitter_percent > 0 {
            rand::thread_rng().gen_range(0..=capped_delay * self.jitter_percent / 100)
        } else {
            0
        };
        Duration::from_millis(capped_delay + jitter)
    }
}
