//! Resilience utilities: bounded exponential backoff and deadline polling.
//!
//! - [`RetryConfig`]: capped exponential backoff with an overall deadline
//! - [`retry_until`]: poll an async condition on that schedule
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() {
//! use catalog_replication::resilience::{retry_until, RetryConfig};
//! use std::sync::atomic::{AtomicBool, Ordering};
//!
//! let done = AtomicBool::new(false);
//! let drained = retry_until(&RetryConfig::default(), || async {
//!     done.load(Ordering::SeqCst)
//! })
//! .await;
//! # let _ = drained;
//! # }
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Backoff schedule with an overall deadline.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Delay before the second check.
    pub initial_delay: Duration,

    /// Ceiling for a single delay.
    pub max_delay: Duration,

    /// Multiplier between consecutive delays (e.g. 2.0 = double each time).
    pub backoff_factor: f64,

    /// Give up once this much time has passed since the first check.
    pub max_duration: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            max_duration: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Short schedule for tests.
    pub fn testing() -> Self {
        Self {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            backoff_factor: 2.0,
            max_duration: Duration::from_millis(500),
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    ///
    /// # Backoff Schedule (defaults)
    ///
    /// ```text
    /// Attempt  Delay
    /// -------  -----
    /// 1        100ms
    /// 2        200ms
    /// 3        400ms
    /// ...
    /// 7+       5s (cap)
    /// ```
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let multiplier = self.backoff_factor.powi(exponent);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }

        std::cmp::min(Duration::from_secs_f64(delay_secs), self.max_delay)
    }
}

/// Poll `condition` until it returns `true` or `config.max_duration` elapses.
///
/// Returns whether the condition held. The condition is always checked at
/// least once, and once more at the deadline.
pub async fn retry_until<F, Fut>(config: &RetryConfig, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + config.max_duration;
    let mut attempt = 0usize;

    loop {
        if condition().await {
            return true;
        }

        let now = Instant::now();
        if now >= deadline {
            return false;
        }

        attempt += 1;
        let delay = config.delay_for_attempt(attempt).min(deadline - now);
        tokio::time::sleep(delay).await;
    }
}
