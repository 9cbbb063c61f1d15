//! Connect retry policy.
//!
//! A failed connect is retried by posting a message back onto the manager's
//! worker queue after [`RetryPolicy::delay_for_attempt`]. The default policy
//! retries forever with no delay, so a peripheral that is merely out of range
//! is picked up again as soon as it comes back.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use relink_core::RetryPolicy;
//!
//! let policy = RetryPolicy::bounded(5)
//!     .initial_delay(Duration::from_millis(500))
//!     .max_delay(Duration::from_secs(30))
//!     .exponential_backoff(true);
//! assert!(policy.validate().is_ok());
//! assert!(policy.allows_attempt(5));
//! assert!(!policy.allows_attempt(6));
//! ```

use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};

/// Minimum spacing between retries when the adapter rejects a connect request
/// synchronously, so a persistent rejection does not spin the worker.
pub const MIN_REJECTION_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How failed connects are retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of connect attempts per connect cycle (None = unlimited).
    pub max_attempts: Option<u32>,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between retries.
    pub max_delay: Duration,
    /// Multiplier applied per attempt when exponential backoff is enabled.
    pub backoff_multiplier: f64,
    /// Whether delays grow exponentially.
    pub use_exponential_backoff: bool,
    /// Whether to add up to 25% random jitter to every non-zero delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl RetryPolicy {
    /// Retry forever, immediately.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::ZERO,
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            use_exponential_backoff: false,
            jitter: false,
        }
    }

    /// Retry forever with a constant delay.
    pub fn fixed_delay(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay.max(Duration::from_secs(60)),
            ..Self::unbounded()
        }
    }

    /// Give up after `attempts` connect attempts.
    pub fn bounded(attempts: u32) -> Self {
        Self {
            max_attempts: Some(attempts),
            ..Self::unbounded()
        }
    }

    /// Set maximum number of attempts.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Remove the attempt limit.
    #[must_use]
    pub fn unlimited(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Set delay before the first retry.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay between retries.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier for exponential backoff.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable exponential backoff.
    #[must_use]
    pub fn exponential_backoff(mut self, enabled: bool) -> Self {
        self.use_exponential_backoff = enabled;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Whether attempt number `attempt` (1-based) may be made.
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max)
    }

    /// Delay before retry number `retry` (0-based: 0 is the first retry).
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let base = if self.use_exponential_backoff {
            let secs = self.initial_delay.as_secs_f64()
                * self.backoff_multiplier.powi(retry.min(i32::MAX as u32) as i32);
            Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
        } else {
            self.initial_delay.min(self.max_delay)
        };

        if self.jitter && !base.is_zero() {
            let jitter_factor = 1.0 + (rand::rng().random::<f64>() * 0.25);
            Duration::from_secs_f64(base.as_secs_f64() * jitter_factor)
        } else {
            base
        }
    }

    /// Validate the policy and return an error if invalid.
    ///
    /// Checks that:
    /// - `max_attempts`, when set, is at least 1
    /// - `backoff_multiplier` is >= 1.0
    /// - `max_delay` >= `initial_delay`
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == Some(0) {
            return Err(Error::invalid_config("max_attempts must be >= 1"));
        }
        if !(self.backoff_multiplier >= 1.0) {
            return Err(Error::invalid_config("backoff_multiplier must be >= 1.0"));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::invalid_config("max_delay must be >= initial_delay"));
        }
        Ok(())
    }
}
