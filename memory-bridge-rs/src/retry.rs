//! Bounded retry with an explicit backoff schedule

use crate::errors::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Configuration for retry logic
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2,
        }
    }
}

impl RetryConfig {
    /// Delays waited between attempts; one entry per possible retry
    pub fn schedule(&self) -> Vec<Duration> {
        let retries = self.max_attempts.saturating_sub(1);
        let mut delay = self.initial_delay;
        let mut schedule = Vec::with_capacity(retries as usize);
        for _ in 0..retries {
            schedule.push(delay);
            // Stays at the last representable delay once it would overflow
            delay = delay.checked_mul(self.backoff_multiplier).unwrap_or(delay);
        }
        schedule
    }
}

/// Runs an operation until it succeeds, fails terminally, or the schedule runs out
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Execute `operation`, retrying only errors for which
    /// [`crate::BridgeError::is_retryable`] holds
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let schedule = self.config.schedule();
        let total = schedule.len() + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        info!("{} succeeded after {} attempts", operation_name, attempt);
                    }
                    return Ok(result);
                },
                Err(err) if !err.is_retryable() => {
                    error!("{} failed with terminal error: {}", operation_name, err);
                    return Err(err);
                },
                Err(err) => {
                    let Some(delay) = schedule.get(attempt - 1).copied() else {
                        error!(
                            "{} failed after {} attempts: {}",
                            operation_name, attempt, err
                        );
                        return Err(err);
                    };

                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {}ms...",
                        operation_name,
                        attempt,
                        total,
                        err,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                },
            }
        }
    }
}

impl From<&crate::config::BridgeConfig> for RetryConfig {
    fn from(config: &crate::config::BridgeConfig) -> Self {
        Self {
            max_attempts: config.add_memory_attempts.max(1),
            initial_delay: Duration::from_millis(config.add_memory_initial_backoff_ms),
            backoff_multiplier: 2,
        }
    }
}
