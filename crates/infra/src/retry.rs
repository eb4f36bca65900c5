//! Exponential backoff for handler-side publishes.
//!
//! Only business handlers retry. Store appends are never retried internally; a handler
//! that republishes goes through the whole storing bus again.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::event_store::{EventStoreError, PublishError};

/// Errors that can say whether another attempt could succeed.
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

impl RetryableError for PublishError {
    /// A failed append is retried unless the id already exists. A delivery failure is
    /// final: the event is already durable and republishing it would be a duplicate.
    fn is_retryable(&self) -> bool {
        match self {
            PublishError::Store(EventStoreError::DuplicateEvent(_)) => false,
            PublishError::Store(_) => true,
            PublishError::Delivery(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// `base_delay * 2^retry`, capped at `max_delay`. `retry` counts from zero.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(retry);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or the retry
    /// budget is spent. The last error is returned.
    pub async fn run<F, Fut, T, E>(&self, operation_name: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + std::fmt::Display,
    {
        let mut retry = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && retry < self.max_retries => {
                    let delay = self.delay_for_retry(retry);
                    warn!(
                        operation = operation_name,
                        attempt = retry + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient error"
                    );
                    sleep(delay).await;
                    retry += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
