//! Caller-side retry for allocation requests.
//!
//! The engine never retries on its own. A caller whose request failed with a
//! retryable error (lock timeout, deadlock, lost connection) may re-run the
//! whole request because nothing is persisted before commit.
//!
//! # Example
//!
//! ```rust
//! use prizedraw_engine::retry::{RetryPolicy, retry_allocation};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), prizedraw_engine::AllocationError> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(3)
//!     .initial_delay(Duration::from_millis(20))
//!     .build();
//!
//! let tickets = retry_allocation(&policy, || async { Ok(4_u32) }).await?;
//! assert_eq!(tickets, 4);
//! # Ok(())
//! # }
//! ```

use crate::error::AllocationError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Exponential backoff policy.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 50ms
/// - `max_delay`: 2 seconds
/// - `multiplier`: 2.0
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Growth factor between delays
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
        }
    }

    /// Delay before retry number `attempt` (0-based), capped at `max_delay`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(31) as i32);
        let delay_ms = (self.initial_delay.as_millis() as f64 * factor).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: Option<u32>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set the delay cap.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(3),
            initial_delay: self.initial_delay.unwrap_or(Duration::from_millis(50)),
            max_delay: self.max_delay.unwrap_or(Duration::from_secs(2)),
            multiplier: self.multiplier.unwrap_or(2.0),
        }
    }
}

/// Run `operation`, retrying with backoff while it fails with a retryable
/// [`AllocationError`].
///
/// Non-retryable errors are returned immediately.
///
/// # Errors
///
/// Returns the last error once it is not retryable or retries are exhausted.
pub async fn retry_allocation<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T, AllocationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AllocationError>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempt, "Allocation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Allocation failed with retryable error, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if err.is_retryable() {
                    tracing::error!(attempt, error = %err, "Allocation failed after max retries");
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use prizedraw_core::StoreError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delays_grow_and_cap() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(250))
            .build();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_lock_timeouts_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_allocation(&RetryPolicy::default(), || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AllocationError::Store(StoreError::LockTimeout))
                } else {
                    Ok("allocated")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "allocated");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn business_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = retry_allocation(&RetryPolicy::default(), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(AllocationError::PurchasesDisabled) }
        })
        .await;

        assert_eq!(result.unwrap_err(), AllocationError::PurchasesDisabled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let policy = RetryPolicy::builder().max_retries(2).build();

        let result: Result<(), _> = retry_allocation(&policy, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(AllocationError::Store(StoreError::Deadlock)) }
        })
        .await;

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
