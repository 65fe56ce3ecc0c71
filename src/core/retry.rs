//! Bounded retry with a fixed delay.
//!
//! [`RetryPolicy`] is the strategy object shared by the classifier→persistor
//! hop and the startup database connection loop. What happens once every
//! attempt failed is part of the policy: [`OnExhausted::Drop`] keeps the
//! pipeline moving, [`OnExhausted::Fail`] hands the error to the caller.

use crate::core::{PktwatchError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Action taken after the last attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnExhausted {
    /// Log and discard the item; the caller sees success
    Drop,
    /// Return the last error to the caller
    Fail,
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay between attempts
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
    /// Add up to 10% random jitter to each delay
    pub jitter: bool,
    /// What to do once attempts are exhausted
    pub on_exhausted: OnExhausted,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_secs(2),
            jitter: false,
            on_exhausted: OnExhausted::Drop,
        }
    }
}

/// Outcome of a retried operation that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The operation succeeded on the given attempt
    Delivered { value: T, attempts: u32 },
    /// Every attempt failed and the policy dropped the item
    Dropped { attempts: u32 },
}

impl<T> Outcome<T> {
    /// True if the item was dropped.
    pub fn is_dropped(&self) -> bool {
        matches!(self, Outcome::Dropped { .. })
    }
}

impl RetryPolicy {
    /// Policy with the given attempt count and delay.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            ..Self::default()
        }
    }

    /// Set the exhaustion action.
    pub fn on_exhausted(mut self, action: OnExhausted) -> Self {
        self.on_exhausted = action;
        self
    }

    /// Validate the policy
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(PktwatchError::config("max_attempts must be greater than 0"));
        }
        Ok(())
    }

    fn next_delay(&self) -> Duration {
        if self.jitter {
            let jitter_ms = rand::random::<f64>() * self.delay.as_millis() as f64 * 0.1;
            self.delay + Duration::from_millis(jitter_ms as u64)
        } else {
            self.delay
        }
    }

    /// Run `operation` until it succeeds or the attempts run out.
    ///
    /// Errors that are not [recoverable](PktwatchError::is_recoverable) end
    /// the loop at once and are handled like exhaustion. `what` names the
    /// operation in log lines.
    pub async fn run<F, Fut, T>(&self, what: &str, operation: F) -> Result<Outcome<T>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(value) => {
                    return Ok(Outcome::Delivered {
                        value,
                        attempts: attempt,
                    })
                },
                Err(error) if attempt >= max_attempts || !error.is_recoverable() => {
                    tracing::error!(
                        category = error.category(),
                        "{} failed after {} attempts: {}",
                        what,
                        attempt,
                        error
                    );
                    return match self.on_exhausted {
                        OnExhausted::Drop => {
                            tracing::warn!("Dropping item after failed {}", what);
                            Ok(Outcome::Dropped { attempts: attempt })
                        },
                        OnExhausted::Fail => Err(error),
                    };
                },
                Err(error) => {
                    let delay = self.next_delay();
                    tracing::warn!(
                        "{} attempt {}/{} failed: {}. Retrying in {:?}...",
                        what,
                        attempt,
                        max_attempts,
                        error,
                        delay
                    );
                    sleep(delay).await;
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let outcome = fast(5)
            .run("delivery", move || {
                let counter = Arc::clone(&counter);
                async move {
                    let count = counter.fetch_add(1, Ordering::Relaxed) + 1;
                    if count < 3 {
                        Err(PktwatchError::forward("temporary failure"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::Delivered {
                value: 42,
                attempts: 3
            }
        );
    }

    #[tokio::test]
    async fn test_drop_after_exhaustion() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let outcome: Outcome<()> = fast(4)
            .run("delivery", move || {
                counter.fetch_add(1, Ordering::Relaxed);
                async { Err(PktwatchError::forward("down")) }
            })
            .await
            .unwrap();

        assert!(outcome.is_dropped());
        assert_eq!(attempts.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn test_fail_policy_surfaces_last_error() {
        let result: Result<Outcome<()>> = fast(2)
            .on_exhausted(OnExhausted::Fail)
            .run("delivery", || async { Err(PktwatchError::forward("down")) })
            .await;

        assert!(matches!(result, Err(PktwatchError::Forward(_))));
    }

    #[tokio::test]
    async fn test_unrecoverable_error_stops_early() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<Outcome<()>> = fast(5)
            .on_exhausted(OnExhausted::Fail)
            .run("delivery", move || {
                counter.fetch_add(1, Ordering::Relaxed);
                async { Err(PktwatchError::config("bad target")) }
            })
            .await;

        assert!(matches!(result, Err(PktwatchError::Config(_))));
        assert_eq!(attempts.load(Ordering::Relaxed), 1);

        let dropped: Outcome<()> = fast(5)
            .run("delivery", || async { Err(PktwatchError::parse("garbage")) })
            .await
            .unwrap();
        assert_eq!(dropped, Outcome::Dropped { attempts: 1 });
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let policy = RetryPolicy::new(0, Duration::from_millis(1));

        let _ = policy
            .run("delivery", move || {
                counter.fetch_add(1, Ordering::Relaxed);
                async { Ok(()) }
            })
            .await;

        assert_eq!(attempts.load(Ordering::Relaxed), 1);
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_policy_yaml() {
        let policy: RetryPolicy =
            serde_yaml::from_str("max_attempts: 3\ndelay: 250ms\non_exhausted: fail\n").unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_millis(250));
        assert_eq!(policy.on_exhausted, OnExhausted::Fail);
        assert!(!policy.jitter);
    }
}
