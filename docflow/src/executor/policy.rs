//! Timeout and retry policy of one stage.
//!
//! Delays follow a configurable backoff curve with optional jitter to keep
//! retried stages of many jobs from landing on the queue at the same instant.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// delay = base * 2^retry
    Exponential,
    /// delay = base * (retry + 1)
    Linear,
    /// delay = base
    #[default]
    Constant,
}

/// Jitter applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// Deadlines and retry budget of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagePolicy {
    /// Cooperative deadline; the body is signalled to abort.
    pub soft_timeout: Duration,
    /// Forced deadline; the body is terminated.
    pub hard_timeout: Duration,
    /// Retries after the initial attempt.
    pub max_retries: usize,
    /// Base delay before a retry.
    pub retry_delay: Duration,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
    /// Cap applied to the computed delay.
    pub max_delay: Duration,
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self {
            soft_timeout: Duration::from_secs(60),
            hard_timeout: Duration::from_secs(90),
            max_retries: 3,
            retry_delay: Duration::from_secs(30),
            backoff: BackoffStrategy::Constant,
            jitter: JitterStrategy::None,
            max_delay: Duration::from_secs(600),
        }
    }
}

impl StagePolicy {
    /// Creates a policy with the given deadlines and defaults elsewhere.
    #[must_use]
    pub fn new(soft_timeout: Duration, hard_timeout: Duration) -> Self {
        Self {
            soft_timeout,
            hard_timeout,
            ..Self::default()
        }
    }

    /// Policy of the text extraction stage.
    #[must_use]
    pub fn extract() -> Self {
        Self::new(Duration::from_secs(120), Duration::from_secs(180))
            .with_max_retries(3)
            .with_retry_delay(Duration::from_secs(60))
    }

    /// Policy of the chunking stage.
    #[must_use]
    pub fn chunk() -> Self {
        Self::new(Duration::from_secs(90), Duration::from_secs(120))
            .with_max_retries(3)
            .with_retry_delay(Duration::from_secs(30))
    }

    /// Policy of the embedding stage.
    #[must_use]
    pub fn embed() -> Self {
        Self::new(Duration::from_secs(300), Duration::from_secs(420))
            .with_max_retries(2)
            .with_retry_delay(Duration::from_secs(120))
    }

    /// Policy of the persistence stage.
    #[must_use]
    pub fn persist() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(90))
            .with_max_retries(3)
            .with_retry_delay(Duration::from_secs(30))
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the base retry delay.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets both deadlines.
    #[must_use]
    pub fn with_timeouts(mut self, soft: Duration, hard: Duration) -> Self {
        self.soft_timeout = soft;
        self.hard_timeout = hard;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Total attempts allowed: the initial one plus every retry.
    #[must_use]
    pub fn total_attempts(&self) -> usize {
        self.max_retries + 1
    }

    /// Time the body gets after the soft deadline before it is terminated.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        self.hard_timeout.saturating_sub(self.soft_timeout)
    }

    /// Delay before retry number `retry` (0-indexed).
    #[must_use]
    pub fn delay_for(&self, retry: usize) -> Duration {
        let base = u64::try_from(self.retry_delay.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let retry = u32::try_from(retry).unwrap_or(u32::MAX);

        let delay = match self.backoff {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(retry)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(retry) + 1),
            BackoffStrategy::Constant => base,
        }
        .min(max);

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}
