use std::time::Duration;

use rand::Rng;

use crate::config::{Backoff, RetryConfig};

/// Computes delays between attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// A policy that makes exactly one attempt
    pub fn none() -> Self {
        Self::new(RetryConfig::builder().max_attempts(1).build())
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts().max(1)
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay(&self, retry: u32) -> Duration {
        let retry = retry.max(1);
        let initial = self.config.initial_delay();
        let base = match self.config.backoff() {
            Backoff::Linear => initial.saturating_mul(retry),
            Backoff::Exponential => {
                let factor = 1u32.checked_shl(retry - 1).unwrap_or(u32::MAX);
                initial.saturating_mul(factor)
            }
        };
        let capped = base.min(self.config.max_delay());

        if self.config.use_jitter() && !capped.is_zero() {
            let factor = rand::thread_rng().gen_range(0.75..1.25);
            capped.mul_f64(factor)
        } else {
            capped
        }
    }
}
