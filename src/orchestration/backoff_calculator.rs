//! # Backoff Calculator
//!
//! Exponential backoff between dispatch attempts: the delay after the `n`th
//! failed attempt is `initial * 2^(n-1)`, capped at `max`.

use crate::config::StageConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    pub fn from_stage_config(config: &StageConfig) -> Self {
        Self::new(config.backoff_initial(), config.backoff_max())
    }

    /// Delay after failed attempt number `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// One delay per attempt for `max_retries` attempts. The dispatcher sleeps
    /// every entry but the last.
    pub fn schedule(&self, max_retries: u32) -> Vec<Duration> {
        (1..=max_retries)
            .map(|attempt| self.delay_for_attempt(attempt))
            .collect()
    }
}
