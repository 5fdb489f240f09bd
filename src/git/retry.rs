//! Retry policy for transient git failures.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay every time
    Fixed,
    /// Delay doubles after each failed attempt, capped at `max_delay`
    #[default]
    Exponential,
}

/// Retry configuration for one git invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first
    pub retry_count: u32,
    /// Delay before the first retry
    pub delay: Duration,
    pub backoff: Backoff,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_count: 3,
            delay: Duration::from_millis(100),
            backoff: Backoff::Exponential,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        Self {
            retry_count: 0,
            ..Self::default()
        }
    }

    pub fn fixed(retry_count: u32, delay: Duration) -> Self {
        Self {
            retry_count,
            delay,
            backoff: Backoff::Fixed,
            max_delay: delay,
        }
    }

    pub fn exponential(retry_count: u32, delay: Duration, max_delay: Duration) -> Self {
        Self {
            retry_count,
            delay,
            backoff: Backoff::Exponential,
            max_delay,
        }
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                // 2^(retry-1), capped so the shift cannot overflow
                let factor = 2u32.saturating_pow(retry.saturating_sub(1).min(16));
                self.delay.saturating_mul(factor).min(self.max_delay)
            }
        }
    }

    /// Log and sleep before retry number `retry`.
    pub(crate) async fn wait(&self, retry: u32, command: &str) {
        let delay = self.delay_for(retry);
        tracing::warn!(
            retry,
            max_retries = self.retry_count,
            delay_ms = delay.as_millis() as u64,
            command,
            "Git lock contention, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
