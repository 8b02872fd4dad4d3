//! Retry configuration and strategies.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

use crate::RestClientError;

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Randomization factor in `[0, 1]` applied to each backoff delay.
    pub jitter: f64,
    /// Whether to retry on 5xx responses.
    pub retry_on_5xx: bool,
    /// Whether to retry on connection errors.
    pub retry_on_connection_error: bool,
    /// Whether to retry on timeout errors.
    pub retry_on_timeout: bool,
    /// Maximum total time for all retries.
    pub max_retry_time: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential {
                initial: Duration::from_millis(100),
                max: Duration::from_secs(10),
                multiplier: 2.0,
            },
            jitter: 0.5,
            retry_on_5xx: true,
            retry_on_connection_error: true,
            retry_on_timeout: true,
            max_retry_time: Some(Duration::from_secs(60)),
        }
    }
}

impl RetryConfig {
    /// Create a retry config with exponential backoff.
    pub fn exponential(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: BackoffStrategy::Exponential {
                initial: initial_delay,
                max: Duration::from_secs(30),
                multiplier: 2.0,
            },
            ..Default::default()
        }
    }

    /// Create a retry config with linear backoff.
    pub fn linear(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: BackoffStrategy::Linear {
                delay,
                max: Duration::from_secs(30),
            },
            ..Default::default()
        }
    }

    /// Create a retry config with constant delay.
    pub fn constant(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: BackoffStrategy::Constant(delay),
            ..Default::default()
        }
    }

    /// Create a retry config with no delay.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: BackoffStrategy::None,
            ..Default::default()
        }
    }

    /// A single attempt, never retried.
    pub fn disabled() -> Self {
        Self::immediate(1)
    }

    /// Set the jitter factor, clamped to `[0, 1]`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Disable retry on 5xx responses.
    pub fn no_retry_on_5xx(mut self) -> Self {
        self.retry_on_5xx = false;
        self
    }

    /// Disable retry on connection errors.
    pub fn no_retry_on_connection(mut self) -> Self {
        self.retry_on_connection_error = false;
        self
    }

    /// Disable retry on timeout errors.
    pub fn no_retry_on_timeout(mut self) -> Self {
        self.retry_on_timeout = false;
        self
    }

    /// Set maximum total retry time.
    pub fn with_max_retry_time(mut self, duration: Duration) -> Self {
        self.max_retry_time = Some(duration);
        self
    }

    /// Calculate the jittered delay after the given failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.backoff.delay_for_attempt(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if base.is_zero() || jitter == 0.0 {
            return base;
        }

        let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
        let delay = base.mul_f64(factor);
        match self.backoff.max_delay() {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Check if an error of this shape is covered by the retry flags.
    fn retries_error(&self, error: &RestClientError) -> bool {
        if !error.is_retryable() {
            return false;
        }

        if error.is_timeout() {
            self.retry_on_timeout
        } else if error.status_code().is_some() {
            self.retry_on_5xx
        } else {
            self.retry_on_connection_error
        }
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone)]
pub enum BackoffStrategy {
    /// No delay between retries.
    None,
    /// Constant delay between retries.
    Constant(Duration),
    /// Linear backoff: delay increases by a fixed amount.
    Linear {
        /// Delay increment per attempt.
        delay: Duration,
        /// Maximum delay.
        max: Duration,
    },
    /// Exponential backoff: delay doubles each attempt.
    Exponential {
        /// Initial delay.
        initial: Duration,
        /// Maximum delay.
        max: Duration,
        /// Multiplier (typically 2.0).
        multiplier: f64,
    },
}

impl BackoffStrategy {
    /// Calculate delay for a given attempt (0-indexed), without jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Constant(d) => *d,
            Self::Linear { delay, max } => {
                let total = delay.saturating_mul(attempt.saturating_add(1));
                total.min(*max)
            }
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let factor = multiplier.powi(attempt.min(i32::MAX as u32) as i32);
                let nanos = initial.as_nanos() as f64 * factor;
                if !nanos.is_finite() || nanos >= max.as_nanos() as f64 {
                    *max
                } else {
                    Duration::from_nanos(nanos.round() as u64)
                }
            }
        }
    }

    /// Upper bound on the delay, if the strategy has one.
    pub fn max_delay(&self) -> Option<Duration> {
        match self {
            Self::Linear { max, .. } | Self::Exponential { max, .. } => Some(*max),
            Self::None | Self::Constant(_) => None,
        }
    }
}

/// State of the retry loop for a single call.
#[derive(Debug)]
pub struct RetryContext {
    attempts: u32,
    started: Instant,
    last_error: Option<RestClientError>,
    next_delay: Option<Duration>,
}

impl RetryContext {
    /// Start a new context.
    pub fn new() -> Self {
        Self {
            attempts: 0,
            started: Instant::now(),
            last_error: None,
            next_delay: None,
        }
    }

    /// Number of attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Time since the call started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Error of the most recent failed attempt.
    pub fn last_error(&self) -> Option<&RestClientError> {
        self.last_error.as_ref()
    }

    /// Delay scheduled before the next attempt.
    pub fn next_delay(&self) -> Option<Duration> {
        self.next_delay
    }

    pub(crate) fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.next_delay = None;
        self.attempts
    }

    pub(crate) fn schedule(&mut self, error: RestClientError, delay: Duration) {
        self.last_error = Some(error);
        self.next_delay = Some(delay);
    }

    /// Wrap the final error once no further attempt will be made.
    pub(crate) fn exhausted(&self, error: RestClientError) -> RestClientError {
        if self.attempts > 1 && error.is_retryable() {
            RestClientError::RetryExhausted {
                attempts: self.attempts,
                last: Box::new(error),
            }
        } else {
            error
        }
    }
}

impl Default for RetryContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry strategy trait for custom retry logic.
///
/// The pipeline only consults the strategy for retryable (transient) errors.
pub trait RetryStrategy: Send + Sync {
    /// Check if the call should be attempted again.
    fn should_retry(&self, context: &RetryContext, error: &RestClientError) -> bool;

    /// Get the delay before the next attempt, given the failed attempt (0-indexed).
    fn retry_delay(&self, attempt: u32) -> Duration;
}

impl RetryStrategy for RetryConfig {
    fn should_retry(&self, context: &RetryContext, error: &RestClientError) -> bool {
        if context.attempts() >= self.max_attempts {
            return false;
        }

        if let Some(limit) = self.max_retry_time
            && context.elapsed() >= limit
        {
            return false;
        }

        self.retries_error(error)
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        self.delay_for_attempt(attempt)
    }
}
