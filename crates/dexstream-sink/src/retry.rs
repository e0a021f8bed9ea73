//! Bounded retry for durable-store commits.
//!
//! The source reconnects forever; the sink does not. After `max_retries`
//! the batch is dead-lettered and the checkpoint freezes, trading liveness
//! for not losing financial data.

use std::time::Duration;

/// Configuration for the commit retry policy.
#[derive(Debug, Clone)]
pub struct CommitRetryConfig {
    /// Retry attempts after the first failure.
    pub max_retries: u32,
    /// Initial backoff delay.
    pub initial_backoff: Duration,
    /// Cap on exponential growth.
    pub max_backoff: Duration,
    /// Multiplier applied per retry.
    pub multiplier: f64,
}

impl Default for CommitRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

/// Stateless policy — computes the delay for a given attempt number.
#[derive(Debug, Clone)]
pub struct CommitRetryPolicy {
    config: CommitRetryConfig,
}

impl CommitRetryPolicy {
    pub fn new(config: CommitRetryConfig) -> Self {
        Self { config }
    }

    /// Policy with `max_retries` and default delays.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self::new(CommitRetryConfig {
            max_retries,
            ..Default::default()
        })
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Delay before the `attempt`-th retry (1-based), or `None` when the
    /// ceiling is reached.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt > self.config.max_retries {
            return None;
        }
        let base_ms = self.config.initial_backoff.as_millis() as f64
            * self.config.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = base_ms.min(self.config.max_backoff.as_millis() as f64);
        Some(Duration::from_millis(capped as u64))
    }
}

impl Default for CommitRetryPolicy {
    fn default() -> Self {
        Self::new(CommitRetryConfig::default())
    }
}
