//! Bounded exponential backoff with jitter.
//!
//! Only whitelisted errors are retried: an error is transient iff its
//! rendered chain contains one of the configured codes or substrings.
//!
//! # Backoff schedule (defaults: 200ms base, x2, +/-25% jitter)
//!
//! | Retry | Delay (base) | With jitter   |
//! |-------|--------------|---------------|
//! | 1     | 200ms        | 150-250ms     |
//! | 2     | 400ms        | 300-500ms     |
//! | 3     | 800ms        | 600-1000ms    |

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::config::RetryPolicyConfig;
use crate::error::{ResilienceError, ResilienceResult};

/// Metrics handed to the per-retry observer before each backoff sleep.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    /// 1-based retry number.
    pub attempt: u32,

    /// Delay awaited before this retry.
    pub delay: Duration,

    /// Rendered error that triggered the retry.
    pub error: String,
}

/// Observer invoked once per retry, regardless of the eventual outcome.
pub type RetryObserver<'a> = &'a (dyn Fn(&RetryAttempt) + Send + Sync);

/// Retry decorator around async operations.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryPolicyConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryPolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryPolicyConfig {
        &self.config
    }

    /// Whether an error matches one of the configured transient patterns.
    ///
    /// Matching is a case-insensitive substring check over the full error
    /// chain, so both codes ("ETIMEDOUT") and phrases ("rate limit")
    /// work. Circuit-open rejections never match the shipped patterns and
    /// propagate immediately.
    pub fn is_retryable(&self, error: &ResilienceError) -> bool {
        let text = error.chain_text().to_lowercase();
        self.config
            .retryable_errors
            .iter()
            .any(|pattern| text.contains(&pattern.to_lowercase()))
    }

    /// Delay for the given 0-based attempt:
    /// `min(max_delay, initial_delay * multiplier^attempt)` randomized by
    /// +/- `jitter_factor`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.config.initial_delay.as_millis() as f64
            * self.config.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.config.max_delay.as_millis() as f64);

        let jitter = if self.config.jitter_factor > 0.0 {
            let spread = rand::thread_rng().gen_range(-1.0..=1.0);
            1.0 + self.config.jitter_factor * spread
        } else {
            1.0
        };
        Duration::from_millis((capped * jitter).max(0.0) as u64)
    }

    /// Run `operation`, retrying transient failures up to `max_retries`
    /// times. The final attempt's error propagates unchanged.
    pub async fn execute<T, F, Fut>(
        &self,
        mut operation: F,
        observer: Option<RetryObserver<'_>>,
    ) -> ResilienceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= self.config.max_retries || !self.is_retryable(&error) {
                        return Err(error);
                    }

                    let delay = self.delay_for_attempt(attempt);
                    attempt += 1;
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying after transient failure"
                    );
                    if let Some(observer) = observer {
                        observer(&RetryAttempt {
                            attempt,
                            delay,
                            error: error.to_string(),
                        });
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
