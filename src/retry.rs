//! Retry mechanism with exponential backoff
//!
//! Used for idempotent collaborator reads only. Non-idempotent operations
//! (booking creation) go through the calendar service without this wrapper.

use crate::config::RetryConfig;
use crate::error::{BotError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry policy for a single operation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    attempt: usize,
    next_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            next_delay: config.initial_delay,
            config,
            attempt: 0,
        }
    }

    pub fn should_retry(&self) -> bool {
        self.attempt < self.config.max_retries
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// Next backoff delay, with optional jitter
    pub fn next_delay(&mut self) -> Duration {
        let mut delay = self.next_delay;

        if self.config.jitter {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            let jitter = rng.gen_range(0.0..0.3);
            let jitter_ms = (delay.as_millis() as f64 * jitter) as u64;
            delay += Duration::from_millis(jitter_ms);
        }

        self.attempt += 1;
        self.next_delay = Duration::from_secs_f32(
            (self.next_delay.as_secs_f32() * self.config.backoff_multiplier)
                .min(self.config.max_delay.as_secs_f32()),
        );

        delay
    }
}

/// Whether an error class is worth retrying
pub fn is_retryable(error: &BotError) -> bool {
    match error {
        BotError::OpenAIError(_) => true,
        BotError::HttpError(_) => true,
        BotError::IoError(_) => true,
        BotError::Timeout(_) => true,
        BotError::YieldError(_) => true,
        // a slot race or a bad address does not improve on retry
        BotError::SlotTaken => false,
        BotError::GeocodingError(_) => false,
        _ => false,
    }
}

/// Retry an async operation with exponential backoff
pub async fn retry_async<F, Fut, T>(mut operation: F, policy: &mut RetryPolicy) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    loop {
        match operation().await {
            Ok(result) => {
                if policy.attempt() > 0 {
                    debug!("operation succeeded after {} attempts", policy.attempt() + 1);
                }
                return Ok(result);
            }
            Err(error) => {
                if !is_retryable(&error) {
                    debug!("non-retryable error: {}", error);
                    return Err(error);
                }

                if !policy.should_retry() {
                    warn!(
                        "retries ({}) exhausted, last error: {}",
                        policy.config.max_retries, error
                    );
                    return Err(error);
                }

                let delay = policy.next_delay();
                warn!(
                    "attempt {} failed: {}, retrying in {:?}",
                    policy.attempt(),
                    error,
                    delay
                );

                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            jitter: false,
        })
    }

    #[test]
    fn test_backoff_progression() {
        let mut policy = RetryPolicy::new(RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: false,
        });

        assert!(policy.should_retry());
        assert_eq!(policy.next_delay(), Duration::from_millis(100));
        let second = policy.next_delay();
        assert!((second.as_millis() as i64 - 200).abs() <= 1);
        let third = policy.next_delay();
        assert!((third.as_millis() as i64 - 400).abs() <= 1);
        assert!(!policy.should_retry());
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&BotError::IoError(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "timeout"
        ))));
        assert!(is_retryable(&BotError::Timeout(Duration::from_secs(5))));
        assert!(!is_retryable(&BotError::SlotTaken));
        assert!(!is_retryable(&BotError::HandoffLimitReached { limit: 5 }));
    }

    #[tokio::test]
    async fn test_retry_async_recovers() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let result = retry_async(
            || {
                let counter = counter_clone.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(BotError::Timeout(Duration::from_secs(1)))
                    } else {
                        Ok(42)
                    }
                }
            },
            &mut policy(1),
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_async_gives_up() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let result: Result<i32> = retry_async(
            || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(BotError::Timeout(Duration::from_secs(1)))
                }
            },
            &mut policy(1),
        )
        .await;

        assert!(result.is_err());
        // initial attempt plus one retry
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_retry_on_non_retryable() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let result: Result<i32> = retry_async(
            || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(BotError::SlotTaken)
                }
            },
            &mut policy(3),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
